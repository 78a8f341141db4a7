//! 调用桥：运行任务工作流并把结果送回所属会话
//!
//! 派发时先写入日志再 spawn，运行结束后把成功结果或失败原因统一包装为 TaskResult，
//! 通过无界通道发给会话（不阻塞发送方）。会话确认已应用后才清除日志；
//! 确认失败按退避重投，重试耗尽的调用留在日志里，由 recover 在重启时重新派发。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::registry::TaskTable;
use crate::core::TaskError;
use crate::durable::host::failure_text;
use crate::durable::{EntityState, StateStore, WorkflowHost};

const JOURNAL_SCOPE: &str = "bridge/invocations";

/// 一次任务调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub task_name: String,
    pub task_type: String,
    pub instance_id: String,
    pub params: Value,
    pub session_id: String,
}

/// 任务结束通知（成功结果或失败原因）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_name: String,
    /// 工作流实例 ID，会话据此去重
    pub instance_id: String,
    pub result: String,
}

/// 发往会话的完成消息；ack 回报会话是否已应用（重复投递为 Ok(false)）
#[derive(Debug)]
pub struct Completion {
    pub session_id: String,
    pub result: TaskResult,
    pub ack: oneshot::Sender<Result<bool, TaskError>>,
}

/// 结果投递的重试策略
#[derive(Debug, Clone)]
pub struct DeliveryRetry {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for DeliveryRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

pub struct InvocationBridge {
    table: Arc<TaskTable>,
    host: Arc<WorkflowHost>,
    journal: EntityState,
    completions: mpsc::UnboundedSender<Completion>,
    retry: DeliveryRetry,
}

impl InvocationBridge {
    /// 创建调用桥，返回完成消息接收端（交给 SessionHub 路由）
    pub fn new(
        table: Arc<TaskTable>,
        host: Arc<WorkflowHost>,
        store: Arc<dyn StateStore>,
    ) -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (completions, completion_rx) = mpsc::unbounded_channel();
        (
            Self {
                table,
                host,
                journal: EntityState::new(store, JOURNAL_SCOPE),
                completions,
                retry: DeliveryRetry::default(),
            },
            completion_rx,
        )
    }

    pub fn with_delivery_retry(mut self, retry: DeliveryRetry) -> Self {
        self.retry = retry;
        self
    }

    /// 记录并派发调用；不等待任务运行
    pub async fn dispatch(self: &Arc<Self>, invocation: Invocation) -> Result<(), TaskError> {
        self.journal
            .set(&invocation.instance_id, &invocation)
            .await?;
        self.host
            .context(&invocation.task_type, &invocation.instance_id)
            .await?;

        tracing::info!(
            "Dispatched task '{}' ({}) as {}",
            invocation.task_name,
            invocation.task_type,
            invocation.instance_id
        );
        self.spawn(invocation);
        Ok(())
    }

    fn spawn(self: &Arc<Self>, invocation: Invocation) {
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            bridge.invoke(invocation).await;
        });
    }

    /// 运行到结束并投递结果；任务失败只变成结果文本，不会向上传播
    pub async fn invoke(&self, invocation: Invocation) -> TaskResult {
        let outcome = match self.table.get(&invocation.task_type) {
            Ok(spec) => {
                self.host
                    .run(
                        spec.workflow.as_ref(),
                        &invocation.instance_id,
                        invocation.params.clone(),
                    )
                    .await
            }
            Err(e) => Err(e),
        };

        let text = match outcome {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Task '{}' failed: {}", invocation.task_name, e);
                format!("Task failed: {}", failure_text(&e))
            }
        };

        let result = TaskResult {
            task_name: invocation.task_name.clone(),
            instance_id: invocation.instance_id.clone(),
            result: text,
        };

        if self.deliver(&invocation.session_id, &result).await {
            if let Err(e) = self.journal.clear(&invocation.instance_id).await {
                tracing::warn!("Failed to clear journal entry {}: {}", invocation.instance_id, e);
            }
        }
        result
    }

    /// 投递结果直到会话确认；返回是否已确认
    async fn deliver(&self, session_id: &str, result: &TaskResult) -> bool {
        let attempts = self.retry.max_attempts.max(1);
        let mut backoff = self.retry.initial_backoff;

        for attempt in 1..=attempts {
            let (ack, applied) = oneshot::channel();
            let completion = Completion {
                session_id: session_id.to_string(),
                result: result.clone(),
                ack,
            };
            if self.completions.send(completion).is_err() {
                tracing::warn!(
                    "Completion channel closed, keeping {} in journal for redelivery",
                    result.instance_id
                );
                return false;
            }

            match applied.await {
                Ok(Ok(_)) => return true,
                Ok(Err(e)) => tracing::warn!(
                    "Session {} failed to apply result of {} (attempt {}/{}): {}",
                    session_id,
                    result.instance_id,
                    attempt,
                    attempts,
                    e
                ),
                Err(_) => tracing::warn!(
                    "Result of {} dropped before reaching session {} (attempt {}/{})",
                    result.instance_id,
                    session_id,
                    attempt,
                    attempts
                ),
            }

            if attempt < attempts {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        tracing::error!(
            "Giving up on delivering {} to {}, left in journal for recovery",
            result.instance_id,
            session_id
        );
        false
    }

    /// 重新派发日志中尚未送达的调用，返回数量
    pub async fn recover(self: &Arc<Self>) -> Result<usize, TaskError> {
        let pending = self.pending().await?;
        let count = pending.len();
        for invocation in pending {
            self.host
                .context(&invocation.task_type, &invocation.instance_id)
                .await?;
            self.spawn(invocation);
        }
        if count > 0 {
            tracing::info!("Recovered {} pending task invocations", count);
        }
        Ok(count)
    }

    /// 日志中尚未送达的调用
    pub async fn pending(&self) -> Result<Vec<Invocation>, TaskError> {
        let mut pending = Vec::new();
        for key in self.journal.keys().await? {
            if let Some(invocation) = self.journal.get::<Invocation>(&key).await? {
                pending.push(invocation);
            }
        }
        Ok(pending)
    }
}
