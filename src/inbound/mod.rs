//! 入站事件处理

pub mod dedup;

pub use dedup::{EventDeduplicator, DEFAULT_RETENTION};
