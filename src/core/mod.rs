//! 核心层：错误类型、运行时装配、优雅停机

pub mod builder;
pub mod error;
pub mod shutdown;

pub use builder::{RuntimeBuilder, TaskbotRuntime};
pub use error::TaskError;
pub use shutdown::{ShutdownManager, ShutdownReason};
