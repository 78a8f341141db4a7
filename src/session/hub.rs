//! SessionHub：按会话 key 懒启动 actor，并把调用桥的完成消息路由到对应会话

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

use super::actor::{ChatReply, ChatSession, SessionActor, SessionMsg, SessionServices};
use crate::core::TaskError;
use crate::tasks::{Completion, TaskResult};

pub struct SessionHub {
    services: Arc<SessionServices>,
    sessions: RwLock<HashMap<String, mpsc::UnboundedSender<SessionMsg>>>,
}

impl SessionHub {
    pub fn new(services: SessionServices) -> Self {
        Self {
            services: Arc::new(services),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// 取会话收件箱；首次访问时从存储加载并启动 actor
    ///
    /// 加载在锁外进行；并发激活时只有先插入的 actor 会启动，其余加载结果直接丢弃。
    async fn inbox(&self, session_id: &str) -> Result<mpsc::UnboundedSender<SessionMsg>, TaskError> {
        if let Some(tx) = self.live_inbox(session_id).await {
            return Ok(tx);
        }

        let actor = SessionActor::load(session_id, Arc::clone(&self.services)).await?;

        let mut sessions = self.sessions.write().await;
        if let Some(tx) = sessions.get(session_id) {
            if !tx.is_closed() {
                return Ok(tx.clone());
            }
        }
        let tx = actor.spawn();
        sessions.insert(session_id.to_string(), tx.clone());
        tracing::info!("Session {} activated", session_id);
        Ok(tx)
    }

    async fn live_inbox(&self, session_id: &str) -> Option<mpsc::UnboundedSender<SessionMsg>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .filter(|tx| !tx.is_closed())
            .cloned()
    }

    async fn send(&self, session_id: &str, msg: SessionMsg) -> Result<(), TaskError> {
        self.inbox(session_id)
            .await?
            .send(msg)
            .map_err(|_| TaskError::SessionClosed(session_id.to_string()))
    }

    /// 处理一条用户消息
    pub async fn chat(&self, session_id: &str, message: impl Into<String>) -> Result<ChatReply, TaskError> {
        let (reply, rx) = oneshot::channel();
        self.send(
            session_id,
            SessionMsg::Chat {
                message: message.into(),
                reply,
            },
        )
        .await?;
        rx.await
            .map_err(|_| TaskError::SessionClosed(session_id.to_string()))?
    }

    /// 投递任务结果并等待应用；重复投递返回 false
    pub async fn task_done(&self, session_id: &str, result: TaskResult) -> Result<bool, TaskError> {
        let (ack, rx) = oneshot::channel();
        self.send(
            session_id,
            SessionMsg::TaskDone {
                result,
                ack: Some(ack),
            },
        )
        .await?;
        rx.await
            .map_err(|_| TaskError::SessionClosed(session_id.to_string()))?
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<ChatSession, TaskError> {
        let (reply, rx) = oneshot::channel();
        self.send(session_id, SessionMsg::Snapshot { reply }).await?;
        rx.await
            .map_err(|_| TaskError::SessionClosed(session_id.to_string()))
    }

    /// 已激活的会话
    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 消费完成消息流，逐条投入目标会话的收件箱
    ///
    /// 不等待应用，慢会话不阻塞其他会话；应用结果经 ack 回到调用桥。
    pub fn route_completions(
        self: &Arc<Self>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(Completion {
                session_id,
                result,
                ack,
            }) = completions.recv().await
            {
                let msg = SessionMsg::TaskDone {
                    result,
                    ack: Some(ack),
                };
                if let Err(e) = hub.send(&session_id, msg).await {
                    tracing::error!("Failed to route task result to {}: {}", session_id, e);
                }
            }
            tracing::debug!("Completion stream closed");
        })
    }
}
