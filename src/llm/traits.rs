//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock / Scripted）实现 LlmClient；RetryingLlmClient 为任意后端加上有界重试。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::memory::Message;

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；Err 为传输层错误（网络、超时、服务端），调用方可重试
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;
}

/// 重试参数：首次失败后最多再试 max_retries 次，间隔按 2 的幂增长
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    retry: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(messages).await {
                Ok(content) => return Ok(content),
                Err(e) if attempt < self.retry.max_retries => {
                    let delay = self.retry.base_delay * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    tracing::warn!(
                        "LLM call failed (attempt {}/{}): {}, retrying in {:?}",
                        attempt,
                        self.retry.max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
