//! 会话层：命令解析、prompt、命令解释器、会话 actor 与 hub

pub mod actor;
pub mod command;
pub mod hub;
pub mod interpreter;
pub mod prompt;

pub use actor::{ChatReply, ChatSession, SessionActor, SessionMsg, SessionServices, SessionSettings};
pub use command::{command_schema, parse_command, Action, TaskCommand};
pub use hub::SessionHub;
pub use interpreter::{interpret, ActiveTasks, CommandOutput, RunningTask};
pub use prompt::{build_messages, system_prompt, tasks_to_prompt};
