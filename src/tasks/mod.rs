//! 长任务层：任务类型表、工作流实现、调用桥
//!
//! - **workflow**: TaskWorkflow 抽象与 TaskSpec 登记项
//! - **registry**: TaskTable 与 TaskRegistry（start / cancel / status）
//! - **bridge**: 运行工作流并把 TaskResult 投递回会话
//! - **reminder** / **price_watch**: 内置任务类型

pub mod bridge;
pub mod price_watch;
pub mod registry;
pub mod reminder;
pub mod workflow;

pub use bridge::{Completion, DeliveryRetry, Invocation, InvocationBridge, TaskResult};
pub use price_watch::{
    FlightPriceWatch, PriceWatchParams, Quote, QuoteProvider, RoundTrip, SimulatedQuoteProvider,
    FLIGHT_PRICE,
};
pub use registry::{default_task_table, TaskControl, TaskOpts, TaskRegistry, TaskTable, TaskTableBuilder};
pub use reminder::{ReminderParams, ReminderWorkflow, REMINDER};
pub use workflow::{ParamsParser, RunOutcome, TaskSpec, TaskWorkflow, CANCELLED_OUTCOME, NO_PROGRESS};
