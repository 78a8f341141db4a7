//! 工作流实例宿主
//!
//! 按实例 ID 管理工作流上下文：私有状态 scope、取消标志、生命周期阶段。
//! 同一实例只运行一次；终态（完成/取消/失败）连同结果写入日志，再次 run 直接重放结果。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use super::flag::CancellationFlag;
use super::store::{EntityState, StateStore};
use crate::core::TaskError;
use crate::tasks::{RunOutcome, TaskWorkflow, CANCELLED_OUTCOME};

const PHASE_KEY: &str = "phase";

/// 实例生命周期阶段；Running 之外均为终态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum WorkflowPhase {
    Running,
    Completed { outcome: String },
    Cancelled { outcome: String },
    Failed { error: String },
}

/// 单个工作流实例的运行上下文
pub struct WorkflowContext {
    instance_id: String,
    workflow_type: String,
    state: EntityState,
    cancellation: CancellationFlag,
    running: AtomicBool,
}

impl WorkflowContext {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    /// 实例私有的持久化状态
    pub fn state(&self) -> &EntityState {
        &self.state
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.peek()
    }

    /// 睡眠直到超时或被取消；返回是否已取消
    pub async fn sleep_or_cancel(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.cancellation.peek(),
            _ = self.cancellation.cancelled() => true,
        }
    }

    pub async fn phase(&self) -> Result<Option<WorkflowPhase>, TaskError> {
        self.state.get(PHASE_KEY).await
    }
}

/// 工作流宿主：实例目录 + 单次运行保证
pub struct WorkflowHost {
    store: Arc<dyn StateStore>,
    instances: RwLock<HashMap<String, Arc<WorkflowContext>>>,
}

impl WorkflowHost {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            instances: RwLock::new(HashMap::new()),
        }
    }

    fn scope(workflow_type: &str, instance_id: &str) -> String {
        format!("workflow/{}/{}", workflow_type, instance_id)
    }

    async fn load(&self, workflow_type: &str, instance_id: &str) -> Result<WorkflowContext, TaskError> {
        let state = EntityState::new(
            Arc::clone(&self.store),
            Self::scope(workflow_type, instance_id),
        );
        let cancellation = CancellationFlag::load(state.clone()).await?;
        Ok(WorkflowContext {
            instance_id: instance_id.to_string(),
            workflow_type: workflow_type.to_string(),
            state,
            cancellation,
            running: AtomicBool::new(false),
        })
    }

    /// 登记实例（派发时调用），运行结束前 cancel/status 都会命中同一上下文
    pub async fn context(
        &self,
        workflow_type: &str,
        instance_id: &str,
    ) -> Result<Arc<WorkflowContext>, TaskError> {
        if let Some(ctx) = self.instances.read().await.get(instance_id) {
            return Ok(Arc::clone(ctx));
        }

        let mut instances = self.instances.write().await;
        if let Some(ctx) = instances.get(instance_id) {
            return Ok(Arc::clone(ctx));
        }
        let ctx = Arc::new(self.load(workflow_type, instance_id).await?);
        instances.insert(instance_id.to_string(), Arc::clone(&ctx));
        Ok(ctx)
    }

    /// 查找实例；未登记（已结束或从未派发）时从存储临时加载，不进入目录
    pub async fn lookup(
        &self,
        workflow_type: &str,
        instance_id: &str,
    ) -> Result<Arc<WorkflowContext>, TaskError> {
        if let Some(ctx) = self.instances.read().await.get(instance_id) {
            return Ok(Arc::clone(ctx));
        }
        Ok(Arc::new(self.load(workflow_type, instance_id).await?))
    }

    /// 运行实例直到终态
    pub async fn run(
        &self,
        workflow: &dyn TaskWorkflow,
        instance_id: &str,
        params: Value,
    ) -> Result<String, TaskError> {
        let ctx = self.context(workflow.type_name(), instance_id).await?;

        if ctx.running.swap(true, Ordering::SeqCst) {
            return Err(TaskError::WorkflowAlreadyRunning(instance_id.to_string()));
        }

        let replay = match ctx.phase().await {
            Ok(Some(WorkflowPhase::Completed { outcome }))
            | Ok(Some(WorkflowPhase::Cancelled { outcome })) => {
                tracing::debug!("Replaying journaled outcome of {}", instance_id);
                Some(Ok(outcome))
            }
            Ok(Some(WorkflowPhase::Failed { error })) => {
                Some(Err(TaskError::TaskExecutionFailure(error)))
            }
            Ok(Some(WorkflowPhase::Running)) => {
                tracing::info!("Resuming {} instance {}", workflow.type_name(), instance_id);
                None
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        };
        if let Some(ret) = replay {
            ctx.running.store(false, Ordering::SeqCst);
            self.evict(&ctx).await;
            return ret;
        }

        let result = match ctx.state.set(PHASE_KEY, &WorkflowPhase::Running).await {
            Ok(()) => workflow.run(&ctx, params).await,
            Err(e) => Err(e),
        };

        let (phase, ret) = match result {
            Ok(RunOutcome::Completed(outcome)) => (
                WorkflowPhase::Completed {
                    outcome: outcome.clone(),
                },
                Ok(outcome),
            ),
            Ok(RunOutcome::Cancelled) => (
                WorkflowPhase::Cancelled {
                    outcome: CANCELLED_OUTCOME.to_string(),
                },
                Ok(CANCELLED_OUTCOME.to_string()),
            ),
            Err(e) => (
                WorkflowPhase::Failed {
                    error: failure_text(&e),
                },
                Err(e),
            ),
        };

        if let Err(e) = ctx.state.set(PHASE_KEY, &phase).await {
            tracing::warn!("Failed to journal outcome of {}: {}", instance_id, e);
        }
        ctx.running.store(false, Ordering::SeqCst);
        self.evict(&ctx).await;

        ret
    }

    async fn evict(&self, ctx: &Arc<WorkflowContext>) {
        let mut instances = self.instances.write().await;
        if let Some(current) = instances.get(&ctx.instance_id) {
            if Arc::ptr_eq(current, ctx) && !ctx.running.load(Ordering::SeqCst) {
                instances.remove(&ctx.instance_id);
            }
        }
    }

    /// 目录中登记的实例数
    pub async fn live_count(&self) -> usize {
        self.instances.read().await.len()
    }
}

/// 失败文本：执行失败只取原因，其余带错误类别
pub fn failure_text(err: &TaskError) -> String {
    match err {
        TaskError::TaskExecutionFailure(reason) => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::durable::MemoryStateStore;

    /// 等待取消或固定次数后完成，记录运行次数
    struct CountingWorkflow {
        runs: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TaskWorkflow for CountingWorkflow {
        fn type_name(&self) -> &str {
            "counting"
        }

        fn parse_params(&self, _task_name: &str, raw: &Value) -> Result<Value, TaskError> {
            Ok(raw.clone())
        }

        async fn run(&self, ctx: &WorkflowContext, _params: Value) -> Result<RunOutcome, TaskError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TaskError::TaskExecutionFailure("probe exploded".into()));
            }
            if ctx.sleep_or_cancel(Duration::from_millis(50)).await {
                return Ok(RunOutcome::Cancelled);
            }
            Ok(RunOutcome::Completed("done".into()))
        }

        async fn status(&self, _ctx: &WorkflowContext) -> Result<Option<Value>, TaskError> {
            Ok(None)
        }
    }

    fn host() -> WorkflowHost {
        WorkflowHost::new(Arc::new(MemoryStateStore::new()))
    }

    #[tokio::test]
    async fn test_run_completes_and_replays() {
        let host = host();
        let wf = CountingWorkflow { runs: AtomicUsize::new(0), fail: false };

        assert_eq!(host.run(&wf, "i-1", json!({})).await.unwrap(), "done");
        assert_eq!(host.run(&wf, "i-1", json!({})).await.unwrap(), "done");
        assert_eq!(wf.runs.load(Ordering::SeqCst), 1);
        assert_eq!(host.live_count().await, 0);

        let ctx = host.lookup("counting", "i-1").await.unwrap();
        assert_eq!(
            ctx.phase().await.unwrap(),
            Some(WorkflowPhase::Completed { outcome: "done".into() })
        );
    }

    #[tokio::test]
    async fn test_cancel_before_run_is_observed() {
        let host = host();
        let wf = CountingWorkflow { runs: AtomicUsize::new(0), fail: false };

        let ctx = host.context("counting", "i-2").await.unwrap();
        ctx.cancellation().resolve().await.unwrap();

        assert_eq!(host.run(&wf, "i-2", json!({})).await.unwrap(), CANCELLED_OUTCOME);
        let ctx = host.lookup("counting", "i-2").await.unwrap();
        assert!(ctx.is_cancelled());
        assert!(matches!(
            ctx.phase().await.unwrap(),
            Some(WorkflowPhase::Cancelled { .. })
        ));
    }

    #[tokio::test]
    async fn test_failure_is_journaled() {
        let host = host();
        let wf = CountingWorkflow { runs: AtomicUsize::new(0), fail: true };

        let err = host.run(&wf, "i-3", json!({})).await.unwrap_err();
        assert_eq!(err, TaskError::TaskExecutionFailure("probe exploded".into()));

        let replay = host.run(&wf, "i-3", json!({})).await.unwrap_err();
        assert_eq!(replay, err);
        assert_eq!(wf.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_run_is_rejected() {
        let host = Arc::new(host());
        let wf = Arc::new(CountingWorkflow { runs: AtomicUsize::new(0), fail: false });

        let first = {
            let host = Arc::clone(&host);
            let wf = Arc::clone(&wf);
            tokio::spawn(async move { host.run(wf.as_ref(), "i-4", json!({})).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = host.run(wf.as_ref(), "i-4", json!({})).await;
        assert_eq!(second, Err(TaskError::WorkflowAlreadyRunning("i-4".into())));
        assert_eq!(first.await.unwrap().unwrap(), "done");
    }
}
