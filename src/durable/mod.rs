//! 持久化执行底座：实体键值状态、取消标志、工作流实例宿主

pub mod flag;
pub mod host;
pub mod store;

pub use flag::CancellationFlag;
pub use host::{WorkflowContext, WorkflowHost, WorkflowPhase};
#[cfg(feature = "async-sqlite")]
pub use store::SqliteStateStore;
pub use store::{create_state_store, EntityState, MemoryStateStore, StateStore};
