//! 入站事件去重
//!
//! 按频道记住事件 ID，保留期内重复到达的事件返回 false。保留期满后由延迟任务清除；
//! 存储中记录到期时间，进程重启后丢失的延迟清除由读取时的过期判断兜底。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::core::TaskError;
use crate::durable::{EntityState, StateStore};

/// 默认保留 24 小时
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

pub struct EventDeduplicator {
    store: Arc<dyn StateStore>,
    retention: Duration,
    /// 串行化 check-and-set
    guard: Mutex<()>,
}

impl EventDeduplicator {
    pub fn new(store: Arc<dyn StateStore>, retention: Duration) -> Self {
        Self {
            store,
            retention,
            guard: Mutex::new(()),
        }
    }

    fn state(&self, channel: &str) -> EntityState {
        EntityState::new(Arc::clone(&self.store), format!("inbound/dedup/{}", channel))
    }

    /// 首次见到该事件返回 true 并记住它
    pub async fn is_new(&self, channel: &str, event_id: &str) -> Result<bool, TaskError> {
        let _guard = self.guard.lock().await;
        let state = self.state(channel);
        let now = Utc::now().timestamp_millis();

        if let Some(expires_at) = state.get::<i64>(event_id).await? {
            if expires_at > now {
                tracing::debug!("Dropping duplicate event {} on {}", event_id, channel);
                return Ok(false);
            }
        }

        let expires_at = now + self.retention.as_millis() as i64;
        state.set(event_id, &expires_at).await?;

        let retention = self.retention;
        let event_id = event_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if let Err(e) = state.clear(&event_id).await {
                tracing::warn!("Failed to expire event {}: {}", event_id, e);
            }
        });

        Ok(true)
    }
}
