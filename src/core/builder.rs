//! 运行时构建器：统一的装配逻辑
//!
//! 控制台与 HTTP 入口共享同一套装配：存储 -> 工作流宿主 -> 任务表 -> 调用桥 -> 注册表 -> 会话 hub。
//! 默认按配置创建各协作方，测试可逐个替换。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::core::TaskError;
use crate::durable::{create_state_store, StateStore, WorkflowHost};
use crate::inbound::EventDeduplicator;
use crate::llm::{create_llm_client, LlmClient};
use crate::notify::{create_notifier, Notifier};
use crate::session::{SessionHub, SessionServices, SessionSettings};
use crate::tasks::{
    default_task_table, DeliveryRetry, InvocationBridge, QuoteProvider, SimulatedQuoteProvider, TaskRegistry,
    TaskTable,
};

/// 装配完成的运行时
pub struct TaskbotRuntime {
    pub hub: Arc<SessionHub>,
    pub registry: Arc<TaskRegistry>,
    pub bridge: Arc<InvocationBridge>,
    pub host: Arc<WorkflowHost>,
    pub store: Arc<dyn StateStore>,
    pub dedup: Arc<EventDeduplicator>,
    /// 完成消息路由任务
    pub router: JoinHandle<()>,
}

impl TaskbotRuntime {
    /// 停止路由；已派发的工作流实例随进程退出，重启后由 recover 接续
    pub fn shutdown(&self) {
        self.router.abort();
    }
}

pub struct RuntimeBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    notifier: Option<Arc<dyn Notifier>>,
    store: Option<Arc<dyn StateStore>>,
    quotes: Option<Arc<dyn QuoteProvider>>,
    table: Option<Arc<TaskTable>>,
}

impl RuntimeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            notifier: None,
            store: None,
            quotes: None,
            table: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_quote_provider(mut self, quotes: Arc<dyn QuoteProvider>) -> Self {
        self.quotes = Some(quotes);
        self
    }

    /// 替换整张任务表（自定义任务类型）
    pub fn with_task_table(mut self, table: Arc<TaskTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// 装配并启动：开始路由完成消息，随后重新派发日志中未送达的调用
    pub async fn build(self) -> Result<TaskbotRuntime, TaskError> {
        let config = self.config;

        let store = match self.store {
            Some(store) => store,
            None => create_state_store(&config.store.backend, config.store.path.as_deref()).await,
        };

        let table = self.table.unwrap_or_else(|| {
            let quotes = self
                .quotes
                .unwrap_or_else(|| Arc::new(SimulatedQuoteProvider));
            default_task_table(quotes, config.tasks.price_poll_interval())
        });
        tracing::info!("Registered task types: {:?}", table.type_names());

        let host = Arc::new(WorkflowHost::new(Arc::clone(&store)));
        let (bridge, completions) =
            InvocationBridge::new(Arc::clone(&table), Arc::clone(&host), Arc::clone(&store));
        let bridge = Arc::new(bridge.with_delivery_retry(DeliveryRetry {
            max_attempts: config.tasks.delivery_attempts,
            initial_backoff: Duration::from_millis(config.tasks.delivery_backoff_ms),
        }));
        let registry = Arc::new(TaskRegistry::new(table, Arc::clone(&host), Arc::clone(&bridge)));

        let services = SessionServices {
            llm: self.llm.unwrap_or_else(|| create_llm_client(&config.llm)),
            tasks: registry.clone(),
            notifier: self.notifier.unwrap_or_else(|| create_notifier(&config.notify)),
            store: Arc::clone(&store),
            settings: SessionSettings {
                max_context_turns: config.app.max_context_turns,
                delivered_window: config.app.history_dedup_window,
            },
        };
        let hub = Arc::new(SessionHub::new(services));
        let router = hub.route_completions(completions);

        let recovered = bridge.recover().await?;
        if recovered > 0 {
            tracing::info!("Resumed {} task invocations from the journal", recovered);
        }

        let dedup = Arc::new(EventDeduplicator::new(
            Arc::clone(&store),
            Duration::from_secs(config.inbound.dedup_retention_secs),
        ));

        Ok(TaskbotRuntime {
            hub,
            registry,
            bridge,
            host,
            store,
            dedup,
            router,
        })
    }
}
