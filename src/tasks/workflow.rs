//! 任务工作流抽象
//!
//! 每种任务类型实现 TaskWorkflow（run / cancel / status），由 TaskTable 按类型名分发。
//! 取消是协作式的：run 在检查点读取取消标志，正在进行的工作单元总会先完成。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::TaskError;
use crate::durable::WorkflowContext;

/// 观察到取消时的统一结果文本
pub const CANCELLED_OUTCOME: &str = "(cancelled)";

/// status 没有任何进度快照时的渲染文本
pub const NO_PROGRESS: &str = "no progress yet";

/// run 的正常结束方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(String),
    Cancelled,
}

/// 长任务工作流
#[async_trait]
pub trait TaskWorkflow: Send + Sync {
    /// 任务类型名（LLM 命令中的 task_type）
    fn type_name(&self) -> &str;

    /// 校验并规范化原始参数，结果原样传给 run
    fn parse_params(&self, task_name: &str, raw: &Value) -> Result<Value, TaskError>;

    async fn run(&self, ctx: &WorkflowContext, params: Value) -> Result<RunOutcome, TaskError>;

    /// 决议取消标志；幂等
    async fn cancel(&self, ctx: &WorkflowContext) -> Result<(), TaskError> {
        ctx.cancellation().resolve().await
    }

    /// 最近一次持久化的进度；None 表示尚无进度
    async fn status(&self, ctx: &WorkflowContext) -> Result<Option<Value>, TaskError>;
}

/// 参数解析器：(task_name, raw_params) -> params
pub type ParamsParser = Arc<dyn Fn(&str, &Value) -> Result<Value, TaskError> + Send + Sync>;

/// 任务类型登记项
#[derive(Clone)]
pub struct TaskSpec {
    pub task_type_name: String,
    pub workflow: Arc<dyn TaskWorkflow>,
    pub params_parser: ParamsParser,
}

impl TaskSpec {
    /// 以工作流自身的 parse_params 作为解析器
    pub fn new(workflow: Arc<dyn TaskWorkflow>) -> Self {
        let parser_target = Arc::clone(&workflow);
        Self {
            task_type_name: workflow.type_name().to_string(),
            workflow,
            params_parser: Arc::new(move |name: &str, raw: &Value| {
                parser_target.parse_params(name, raw)
            }),
        }
    }

    pub fn with_params_parser(mut self, parser: ParamsParser) -> Self {
        self.params_parser = parser;
        self
    }
}

impl std::fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("task_type_name", &self.task_type_name)
            .finish()
    }
}

/// 从 task_spec 取必填字符串字段
pub(crate) fn required_str<'a>(raw: &'a Value, field: &str) -> Result<&'a str, TaskError> {
    match raw.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim()),
        Some(Value::String(_)) => Err(TaskError::InvalidParams(format!(
            "field '{}' must not be empty",
            field
        ))),
        Some(other) => Err(TaskError::InvalidParams(format!(
            "field '{}' must be a string, got {}",
            field, other
        ))),
        None => Err(TaskError::InvalidParams(format!(
            "missing required field '{}'",
            field
        ))),
    }
}
