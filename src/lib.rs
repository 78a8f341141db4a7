//! taskbot - 会话式后台任务编排
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、运行时装配、优雅停机
//! - **durable**: 分 scope 的持久化存储、取消标志、工作流实例宿主
//! - **tasks**: 任务类型表、提醒 / 价格监控工作流、调用桥
//! - **session**: 命令解析与解释、会话 actor、SessionHub
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock / Scripted）
//! - **memory**: 对话历史
//! - **notify**: 任务结束通知
//! - **inbound**: 入站事件去重
//! - **web**: HTTP 接入（web feature）

pub mod config;
pub mod core;
pub mod durable;
pub mod inbound;
pub mod llm;
pub mod memory;
pub mod notify;
pub mod observability;
pub mod session;
pub mod tasks;
#[cfg(feature = "web")]
pub mod web;

pub use crate::core::{RuntimeBuilder, TaskError, TaskbotRuntime};
pub use crate::session::{ChatReply, SessionHub};
