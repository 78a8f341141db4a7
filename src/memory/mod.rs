//! 记忆层：会话对话历史

pub mod conversation;

pub use conversation::{concat_history, recent_turns, Message, Role};
