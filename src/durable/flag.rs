//! 单次决议的取消标志
//!
//! 内存中用 CancellationToken 唤醒等待者，同时把决议写入实体状态，重启后仍可见。

use tokio_util::sync::CancellationToken;

use super::store::EntityState;
use crate::core::TaskError;

const CANCELLED_KEY: &str = "cancelled";

/// 取消标志：peek 非阻塞读取，resolve 幂等写入
#[derive(Clone)]
pub struct CancellationFlag {
    token: CancellationToken,
    state: EntityState,
}

impl CancellationFlag {
    /// 从实体状态加载；已持久化为 true 时立即处于已取消状态
    pub async fn load(state: EntityState) -> Result<Self, TaskError> {
        let token = CancellationToken::new();
        if state.get::<bool>(CANCELLED_KEY).await?.unwrap_or(false) {
            token.cancel();
        }
        Ok(Self { token, state })
    }

    pub fn peek(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 决议标志；已决议时不再写存储
    pub async fn resolve(&self) -> Result<(), TaskError> {
        if self.token.is_cancelled() {
            return Ok(());
        }
        self.state.set(CANCELLED_KEY, &true).await?;
        self.token.cancel();
        Ok(())
    }

    /// 等待标志被决议（用于与睡眠竞争）
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::durable::{MemoryStateStore, StateStore};

    #[tokio::test]
    async fn test_resolve_is_idempotent_and_persisted() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let state = EntityState::new(Arc::clone(&store), "workflow/reminder/1");

        let flag = CancellationFlag::load(state.clone()).await.unwrap();
        assert!(!flag.peek());

        flag.resolve().await.unwrap();
        flag.resolve().await.unwrap();
        assert!(flag.peek());

        let reloaded = CancellationFlag::load(state).await.unwrap();
        assert!(reloaded.peek());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let flag = CancellationFlag::load(EntityState::new(store, "w")).await.unwrap();

        let waiter = flag.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        flag.resolve().await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
