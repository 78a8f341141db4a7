//! 任务注册表
//!
//! TaskTable 在启动时一次性构建（类型名 -> TaskSpec），之后只读，以 Arc 传入 TaskRegistry 与会话层。
//! TaskRegistry 负责 start / cancel / status：start 只派发不等待，cancel / status 同步转发给工作流。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::bridge::{Invocation, InvocationBridge};
use super::price_watch::{FlightPriceWatch, QuoteProvider};
use super::reminder::ReminderWorkflow;
use super::workflow::TaskSpec;
use crate::core::TaskError;
use crate::durable::WorkflowHost;

/// 构建期的登记器；同名登记以最后一次为准
#[derive(Default)]
pub struct TaskTableBuilder {
    specs: HashMap<String, TaskSpec>,
}

impl TaskTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, spec: TaskSpec) -> Self {
        if self
            .specs
            .insert(spec.task_type_name.clone(), spec)
            .is_some()
        {
            tracing::debug!("Task type registered twice, keeping the latest");
        }
        self
    }

    pub fn build(self) -> Arc<TaskTable> {
        Arc::new(TaskTable { specs: self.specs })
    }
}

/// 不可变的任务类型表
#[derive(Debug)]
pub struct TaskTable {
    specs: HashMap<String, TaskSpec>,
}

impl TaskTable {
    pub fn get(&self, task_type: &str) -> Result<&TaskSpec, TaskError> {
        self.specs
            .get(task_type)
            .ok_or_else(|| TaskError::UnknownTaskType(task_type.to_string()))
    }

    /// 已登记的类型名（排序）
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.specs.keys().cloned().collect();
        names.sort();
        names
    }
}

/// 内置任务类型：reminder、flight_price
pub fn default_task_table(quotes: Arc<dyn QuoteProvider>, poll_interval: Duration) -> Arc<TaskTable> {
    TaskTableBuilder::new()
        .register(TaskSpec::new(Arc::new(ReminderWorkflow::new())))
        .register(TaskSpec::new(Arc::new(
            FlightPriceWatch::new(quotes).with_poll_interval(poll_interval),
        )))
        .build()
}

/// 创建任务的选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOpts {
    pub name: String,
    pub task_type: String,
    pub params: Value,
}

/// 会话侧看到的任务控制接口
#[async_trait]
pub trait TaskControl: Send + Sync {
    /// 启动任务，返回新的工作流实例 ID
    async fn start_task(&self, session_id: &str, opts: TaskOpts) -> Result<String, TaskError>;

    async fn cancel_task(&self, task_type: &str, instance_id: &str) -> Result<(), TaskError>;

    async fn get_task_status(
        &self,
        task_type: &str,
        instance_id: &str,
    ) -> Result<Option<Value>, TaskError>;
}

pub struct TaskRegistry {
    table: Arc<TaskTable>,
    host: Arc<WorkflowHost>,
    bridge: Arc<InvocationBridge>,
}

impl TaskRegistry {
    pub fn new(table: Arc<TaskTable>, host: Arc<WorkflowHost>, bridge: Arc<InvocationBridge>) -> Self {
        Self { table, host, bridge }
    }
}

#[async_trait]
impl TaskControl for TaskRegistry {
    async fn start_task(&self, session_id: &str, opts: TaskOpts) -> Result<String, TaskError> {
        let spec = self.table.get(&opts.task_type)?;
        let params = (spec.params_parser)(&opts.name, &opts.params)?;
        let instance_id = uuid::Uuid::new_v4().to_string();

        self.bridge
            .dispatch(Invocation {
                task_name: opts.name,
                task_type: opts.task_type,
                instance_id: instance_id.clone(),
                params,
                session_id: session_id.to_string(),
            })
            .await?;

        Ok(instance_id)
    }

    async fn cancel_task(&self, task_type: &str, instance_id: &str) -> Result<(), TaskError> {
        let spec = self.table.get(task_type)?;
        let ctx = self.host.lookup(task_type, instance_id).await?;
        spec.workflow.cancel(&ctx).await
    }

    async fn get_task_status(
        &self,
        task_type: &str,
        instance_id: &str,
    ) -> Result<Option<Value>, TaskError> {
        let spec = self.table.get(task_type)?;
        let ctx = self.host.lookup(task_type, instance_id).await?;
        spec.workflow.status(&ctx).await
    }
}
