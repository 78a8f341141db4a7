//! 用户通知：任务结束时把 "Task <name> says: <result>" 推送给会话
//!
//! - LogNotifier：写日志（控制台模式）
//! - WebhookNotifier：POST JSON `{channel, text}` 到配置的地址，尽力而为
//! - ChannelNotifier：转发到进程内通道，供 REPL 打印

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::NotifySection;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, session_id: &str, text: &str) -> Result<(), String>;
}

#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, session_id: &str, text: &str) -> Result<(), String> {
        tracing::info!(" --- NOTIFICATION from session {} --- : {}", session_id, text);
        Ok(())
    }
}

/// Webhook 请求体（Slack incoming webhook 兼容）
#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    channel: &'a str,
    text: &'a str,
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, session_id: &str, text: &str) -> Result<(), String> {
        let resp = self
            .client
            .post(&self.url)
            .json(&WebhookBody {
                channel: session_id,
                text,
            })
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("webhook returned {}: {}", status, body));
        }
        Ok(())
    }
}

/// 通知条目：(session_id, text)
pub type Notification = (String, String);

pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, session_id: &str, text: &str) -> Result<(), String> {
        self.tx
            .send((session_id.to_string(), text.to_string()))
            .map_err(|_| "notification receiver dropped".to_string())
    }
}

/// 按 [notify] 配置创建：有 webhook_url 用 Webhook，否则写日志
pub fn create_notifier(cfg: &NotifySection) -> Arc<dyn Notifier> {
    match cfg.webhook_url.as_deref() {
        Some(url) if !url.trim().is_empty() => {
            tracing::info!("Notifications go to webhook {}", url);
            Arc::new(WebhookNotifier::new(url.trim()))
        }
        _ => Arc::new(LogNotifier),
    }
}
