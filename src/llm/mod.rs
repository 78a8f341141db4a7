//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock / Scripted）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::OpenAiClient;
pub use traits::{LlmClient, RetryConfig, RetryingLlmClient};

use crate::config::LlmSection;

/// 按 [llm] 配置创建客户端，外层包一层有界重试
pub fn create_llm_client(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    let inner: Arc<dyn LlmClient> = match cfg.provider.as_str() {
        "openai" => {
            tracing::info!("Using OpenAI-compatible LLM: {}", cfg.model);
            Arc::new(
                OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, None)
                    .with_temperature(cfg.temperature)
                    .with_request_timeout(Duration::from_secs(cfg.timeouts.request)),
            )
        }
        other => {
            if other != "mock" {
                tracing::warn!("Unknown LLM provider '{}', falling back to mock", other);
            }
            Arc::new(MockLlmClient)
        }
    };

    Arc::new(RetryingLlmClient::new(
        inner,
        RetryConfig {
            max_retries: cfg.max_retries,
            ..RetryConfig::default()
        },
    ))
}
