//! 持久化键值存储
//!
//! 每个实体（会话、工作流实例、桥接日志）拥有自己的 scope，只读写自己的键。
//! 内存实现用于测试与控制台模式；SQLite 实现（async-sqlite feature）用于跨重启恢复。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::core::TaskError;

/// 按 scope 分区的键值存储接口
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, scope: &str, key: &str) -> Result<Option<Value>, TaskError>;

    async fn set(&self, scope: &str, key: &str, value: Value) -> Result<(), TaskError>;

    async fn clear(&self, scope: &str, key: &str) -> Result<(), TaskError>;

    /// scope 下的全部键（按字典序）
    async fn keys(&self, scope: &str) -> Result<Vec<String>, TaskError>;
}

/// 内存存储
#[derive(Default)]
pub struct MemoryStateStore {
    scopes: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, scope: &str, key: &str) -> Result<Option<Value>, TaskError> {
        Ok(self
            .scopes
            .read()
            .await
            .get(scope)
            .and_then(|entries| entries.get(key).cloned()))
    }

    async fn set(&self, scope: &str, key: &str, value: Value) -> Result<(), TaskError> {
        self.scopes
            .write()
            .await
            .entry(scope.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn clear(&self, scope: &str, key: &str) -> Result<(), TaskError> {
        let mut scopes = self.scopes.write().await;
        if let Some(entries) = scopes.get_mut(scope) {
            entries.remove(key);
            if entries.is_empty() {
                scopes.remove(scope);
            }
        }
        Ok(())
    }

    async fn keys(&self, scope: &str) -> Result<Vec<String>, TaskError> {
        Ok(self
            .scopes
            .read()
            .await
            .get(scope)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }
}

/// SQLite 存储：单表 (scope, key) -> JSON 文本
#[cfg(feature = "async-sqlite")]
pub struct SqliteStateStore {
    pool: sqlx::sqlite::SqlitePool,
}

#[cfg(feature = "async-sqlite")]
impl SqliteStateStore {
    pub async fn open(db_path: impl AsRef<std::path::Path>) -> Result<Self, sqlx::Error> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(3)
            .connect(&db_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entity_state (
                scope TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (scope, key)
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[cfg(feature = "async-sqlite")]
fn store_err(e: sqlx::Error) -> TaskError {
    TaskError::Store(e.to_string())
}

#[cfg(feature = "async-sqlite")]
#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, scope: &str, key: &str) -> Result<Option<Value>, TaskError> {
        use sqlx::Row;

        let row = sqlx::query("SELECT value FROM entity_state WHERE scope = ? AND key = ?")
            .bind(scope)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        match row {
            Some(row) => {
                let text: String = row.get("value");
                Ok(Some(serde_json::from_str(&text)?))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, scope: &str, key: &str, value: Value) -> Result<(), TaskError> {
        sqlx::query(
            "INSERT OR REPLACE INTO entity_state (scope, key, value, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(scope)
        .bind(key)
        .bind(value.to_string())
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn clear(&self, scope: &str, key: &str) -> Result<(), TaskError> {
        sqlx::query("DELETE FROM entity_state WHERE scope = ? AND key = ?")
            .bind(scope)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn keys(&self, scope: &str) -> Result<Vec<String>, TaskError> {
        use sqlx::Row;

        let rows = sqlx::query("SELECT key FROM entity_state WHERE scope = ? ORDER BY key ASC")
            .bind(scope)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.into_iter().map(|row| row.get("key")).collect())
    }
}

/// 单个实体的带类型视图（scope 固定）
#[derive(Clone)]
pub struct EntityState {
    store: Arc<dyn StateStore>,
    scope: String,
}

impl EntityState {
    pub fn new(store: Arc<dyn StateStore>, scope: impl Into<String>) -> Self {
        Self {
            store,
            scope: scope.into(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, TaskError> {
        match self.store.get(&self.scope, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), TaskError> {
        let value = serde_json::to_value(value)?;
        self.store.set(&self.scope, key, value).await
    }

    pub async fn clear(&self, key: &str) -> Result<(), TaskError> {
        self.store.clear(&self.scope, key).await
    }

    pub async fn keys(&self) -> Result<Vec<String>, TaskError> {
        self.store.keys(&self.scope).await
    }
}

/// 按配置创建存储
///
/// backend = "sqlite" 且启用了 async-sqlite feature 时使用 SQLite；否则退回内存存储
pub async fn create_state_store(
    backend: &str,
    path: Option<&std::path::Path>,
) -> Arc<dyn StateStore> {
    #[cfg(feature = "async-sqlite")]
    if backend == "sqlite" {
        let path = path.unwrap_or_else(|| std::path::Path::new("taskbot.db"));
        match SqliteStateStore::open(path).await {
            Ok(store) => {
                tracing::info!("Using SQLite state store: {:?}", path);
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!("Failed to open SQLite store, falling back to memory: {}", e);
            }
        }
    }

    #[cfg(not(feature = "async-sqlite"))]
    if backend == "sqlite" {
        let _ = path;
        tracing::warn!("SQLite store requested but async-sqlite feature not enabled, using memory store");
    }

    tracing::info!("Using in-memory state store");
    Arc::new(MemoryStateStore::new())
}
