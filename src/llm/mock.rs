//! 本地 LLM 客户端（用于测试与离线演示，无需 API）
//!
//! - MockLlmClient：用户直接输入 JSON 命令时原样返回，否则回显为 other 动作
//! - ScriptedLlmClient：按顺序返回预设响应，并记录每次收到的 prompt

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::{Message, Role};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.trim())
            .unwrap_or("(no input)");

        let typed_command = serde_json::from_str::<serde_json::Value>(last_user)
            .ok()
            .filter(|v| v.get("action").is_some());
        if typed_command.is_some() {
            return Ok(last_user.to_string());
        }

        Ok(serde_json::json!({
            "action": "other",
            "message": format!("Echo from Mock: {}", last_user),
        })
        .to_string())
    }
}

/// 脚本客户端：依次弹出预设响应，耗尽后返回错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 追加一条成功响应
    pub fn push(&self, response: impl Into<String>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Ok(response.into()));
        }
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// 最近一次调用收到的完整 prompt
    pub fn last_prompt(&self) -> Option<Vec<Message>> {
        self.prompts.lock().ok().and_then(|p| p.last().cloned())
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(messages.to_vec());
        }
        self.responses
            .lock()
            .map_err(|e| e.to_string())?
            .pop_front()
            .unwrap_or_else(|| Err("scripted responses exhausted".to_string()))
    }
}
