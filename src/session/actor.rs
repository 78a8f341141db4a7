//! 会话 Actor
//!
//! 每个会话 key 一个 tokio 任务，顺序处理收件箱中的消息，独占 ChatSession 状态。
//! 每个处理器在副本上计算新状态，持久化成功后才替换内存状态；失败时什么都不落盘。

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use super::command::parse_command;
use super::interpreter::{interpret, ActiveTasks};
use super::prompt::build_messages;
use crate::core::TaskError;
use crate::durable::{EntityState, StateStore};
use crate::llm::LlmClient;
use crate::memory::{concat_history, Message};
use crate::notify::Notifier;
use crate::tasks::{TaskControl, TaskResult};

const SESSION_KEY: &str = "session";

/// 会话持久化状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub chat_history: Vec<Message>,
    pub active_tasks: ActiveTasks,
    /// 已应用过 TaskResult 的实例 ID（有界，最旧的先淘汰）
    #[serde(default)]
    pub delivered: VecDeque<String>,
}

impl ChatSession {
    fn is_delivered(&self, instance_id: &str) -> bool {
        self.delivered.iter().any(|id| id == instance_id)
    }

    fn mark_delivered(&mut self, instance_id: &str, window: usize) {
        self.delivered.push_back(instance_id.to_string());
        while self.delivered.len() > window.max(1) {
            self.delivered.pop_front();
        }
    }
}

/// chat 的回复：LLM 给用户的话，以及任务操作的状态消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
}

/// 会话参数
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_context_turns: usize,
    pub delivered_window: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_context_turns: 20,
            delivered_window: 256,
        }
    }
}

/// 所有会话共享的协作方
#[derive(Clone)]
pub struct SessionServices {
    pub llm: Arc<dyn LlmClient>,
    pub tasks: Arc<dyn TaskControl>,
    pub notifier: Arc<dyn Notifier>,
    pub store: Arc<dyn StateStore>,
    pub settings: SessionSettings,
}

/// 收件箱消息
pub enum SessionMsg {
    Chat {
        message: String,
        reply: oneshot::Sender<Result<ChatReply, TaskError>>,
    },
    /// ack 为 Some 时回报是否实际应用（重复投递为 false）
    TaskDone {
        result: TaskResult,
        ack: Option<oneshot::Sender<Result<bool, TaskError>>>,
    },
    Snapshot {
        reply: oneshot::Sender<ChatSession>,
    },
}

pub struct SessionActor {
    session_id: String,
    services: Arc<SessionServices>,
    state: EntityState,
    session: ChatSession,
}

impl SessionActor {
    /// 从存储恢复会话状态
    pub async fn load(session_id: &str, services: Arc<SessionServices>) -> Result<Self, TaskError> {
        let state = EntityState::new(
            Arc::clone(&services.store),
            format!("session/{}", session_id),
        );
        let session = state.get::<ChatSession>(SESSION_KEY).await?.unwrap_or_default();
        Ok(Self {
            session_id: session_id.to_string(),
            services,
            state,
            session,
        })
    }

    /// 启动 actor 任务，返回收件箱发送端
    pub fn spawn(self) -> mpsc::UnboundedSender<SessionMsg> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.run(rx));
        tx
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<SessionMsg>) {
        tracing::debug!("Session {} started", self.session_id);
        while let Some(msg) = inbox.recv().await {
            match msg {
                SessionMsg::Chat { message, reply } => {
                    let result = self.handle_chat(&message).await;
                    if let Err(e) = &result {
                        tracing::warn!("Session {} chat failed: {}", self.session_id, e);
                    }
                    let _ = reply.send(result);
                }
                SessionMsg::TaskDone { result, ack } => {
                    let applied = self.handle_task_done(result).await;
                    if let Err(e) = &applied {
                        tracing::error!("Session {} failed to apply task result: {}", self.session_id, e);
                    }
                    if let Some(ack) = ack {
                        let _ = ack.send(applied);
                    }
                }
                SessionMsg::Snapshot { reply } => {
                    let _ = reply.send(self.session.clone());
                }
            }
        }
        tracing::debug!("Session {} stopped", self.session_id);
    }

    async fn persist(&self, next: &ChatSession) -> Result<(), TaskError> {
        self.state.set(SESSION_KEY, next).await
    }

    async fn handle_chat(&mut self, message: &str) -> Result<ChatReply, TaskError> {
        let services = Arc::clone(&self.services);
        let prompt = build_messages(
            chrono::Local::now().date_naive(),
            &self.session.chat_history,
            services.settings.max_context_turns,
            &self.session.active_tasks,
            message,
        );

        let response = services
            .llm
            .complete(&prompt)
            .await
            .map_err(TaskError::Llm)?;
        let command = parse_command(&response)?;

        let output = interpret(
            services.tasks.as_ref(),
            &self.session_id,
            &self.session.active_tasks,
            &command,
        )
        .await?;

        let mut next = self.session.clone();
        if let Some(tasks) = output.new_active_tasks {
            next.active_tasks = tasks;
        }
        next.chat_history = concat_history(&next.chat_history, message, Some(response));
        if let Err(e) = self.persist(&next).await {
            self.abandon_started(&next.active_tasks).await;
            return Err(e);
        }
        self.session = next;

        Ok(ChatReply {
            message: command.message,
            quote: output.task_message,
        })
    }

    /// 状态未能落盘时撤销本次 create 已启动的实例，并忽略它们之后到达的结果
    async fn abandon_started(&mut self, proposed: &ActiveTasks) {
        let started: Vec<_> = proposed
            .values()
            .filter(|task| {
                self.session
                    .active_tasks
                    .get(&task.name)
                    .map_or(true, |current| current.workflow_instance_id != task.workflow_instance_id)
            })
            .cloned()
            .collect();

        for task in started {
            tracing::warn!(
                "Session {} could not record task '{}', cancelling {}",
                self.session_id,
                task.name,
                task.workflow_instance_id
            );
            if let Err(e) = self
                .services
                .tasks
                .cancel_task(&task.task_type, &task.workflow_instance_id)
                .await
            {
                tracing::error!("Failed to cancel orphaned {}: {}", task.workflow_instance_id, e);
            }
            self.session
                .mark_delivered(&task.workflow_instance_id, self.services.settings.delivered_window);
        }
    }

    async fn handle_task_done(&mut self, result: TaskResult) -> Result<bool, TaskError> {
        if self.session.is_delivered(&result.instance_id) {
            tracing::debug!(
                "Session {} ignoring duplicate result for {}",
                self.session_id,
                result.instance_id
            );
            return Ok(false);
        }

        let mut next = self.session.clone();
        let owns_entry = next
            .active_tasks
            .get(&result.task_name)
            .is_some_and(|t| t.workflow_instance_id == result.instance_id);
        if owns_entry {
            next.active_tasks.remove(&result.task_name);
        }
        next.mark_delivered(&result.instance_id, self.services.settings.delivered_window);
        next.chat_history = concat_history(
            &next.chat_history,
            format!("The task with name '{}' is finished.", result.task_name),
            None,
        );
        self.persist(&next).await?;
        self.session = next;

        tracing::info!("Session {} task '{}' finished", self.session_id, result.task_name);
        let text = format!("Task {} says: {}", result.task_name, result.result);
        if let Err(e) = self.services.notifier.notify(&self.session_id, &text).await {
            tracing::warn!("Notification to {} failed: {}", self.session_id, e);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::durable::MemoryStateStore;
    use crate::llm::ScriptedLlmClient;
    use crate::notify::ChannelNotifier;
    use crate::tasks::TaskOpts;

    /// 记录取消调用的任务控制
    #[derive(Default)]
    struct StaticControl {
        cancelled: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TaskControl for StaticControl {
        async fn start_task(&self, _session_id: &str, opts: TaskOpts) -> Result<String, TaskError> {
            Ok(format!("wf-{}", opts.name))
        }

        async fn cancel_task(&self, _t: &str, instance_id: &str) -> Result<(), TaskError> {
            self.cancelled.lock().unwrap().push(instance_id.to_string());
            Ok(())
        }

        async fn get_task_status(&self, _t: &str, _i: &str) -> Result<Option<Value>, TaskError> {
            Ok(None)
        }
    }

    /// 会话 scope 的写入可按开关失败
    #[derive(Default)]
    struct DiskFullStore {
        inner: MemoryStateStore,
        full: AtomicBool,
    }

    #[async_trait]
    impl StateStore for DiskFullStore {
        async fn get(&self, scope: &str, key: &str) -> Result<Option<Value>, TaskError> {
            self.inner.get(scope, key).await
        }

        async fn set(&self, scope: &str, key: &str, value: Value) -> Result<(), TaskError> {
            if scope.starts_with("session/") && self.full.load(Ordering::SeqCst) {
                return Err(TaskError::Store("disk full".into()));
            }
            self.inner.set(scope, key, value).await
        }

        async fn clear(&self, scope: &str, key: &str) -> Result<(), TaskError> {
            self.inner.clear(scope, key).await
        }

        async fn keys(&self, scope: &str) -> Result<Vec<String>, TaskError> {
            self.inner.keys(scope).await
        }
    }

    fn services(
        llm: Arc<ScriptedLlmClient>,
        store: Arc<dyn StateStore>,
    ) -> (Arc<SessionServices>, mpsc::UnboundedReceiver<(String, String)>) {
        services_with(llm, store, Arc::new(StaticControl::default()))
    }

    fn services_with(
        llm: Arc<ScriptedLlmClient>,
        store: Arc<dyn StateStore>,
        tasks: Arc<StaticControl>,
    ) -> (Arc<SessionServices>, mpsc::UnboundedReceiver<(String, String)>) {
        let (notifier, notes) = ChannelNotifier::new();
        let services = SessionServices {
            llm,
            tasks,
            notifier: Arc::new(notifier),
            store,
            settings: SessionSettings {
                max_context_turns: 20,
                delivered_window: 2,
            },
        };
        (Arc::new(services), notes)
    }

    fn create_reply(name: &str) -> String {
        json!({
            "action": "create", "message": "Reminder set", "task_name": name,
            "task_type": "reminder", "task_spec": {"date": "2030-01-01"}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_chat_persists_tasks_and_history() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(create_reply("r1"))]));
        let (services, _notes) = services(llm, Arc::clone(&store));

        let mut actor = SessionActor::load("c1", Arc::clone(&services)).await.unwrap();
        let reply = actor.handle_chat("remind me").await.unwrap();
        assert_eq!(reply.message, "Reminder set");
        assert!(reply.quote.unwrap().starts_with("The task 'r1' of type reminder"));

        let reloaded = SessionActor::load("c1", services).await.unwrap();
        assert_eq!(reloaded.session.active_tasks["r1"].workflow_instance_id, "wf-r1");
        assert_eq!(reloaded.session.chat_history.len(), 2);
        assert_eq!(reloaded.session.chat_history[0], Message::user("remind me"));
    }

    #[tokio::test]
    async fn test_failed_chat_persists_nothing() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok("not json".into()),
            Err("connection reset".into()),
        ]));
        let (services, _notes) = services(llm, store);
        let mut actor = SessionActor::load("c1", services).await.unwrap();

        assert!(matches!(
            actor.handle_chat("hi").await,
            Err(TaskError::MalformedCommand(_))
        ));
        assert_eq!(
            actor.handle_chat("hi").await,
            Err(TaskError::Llm("connection reset".into()))
        );
        assert_eq!(actor.session, ChatSession::default());
    }

    #[tokio::test]
    async fn test_task_done_applies_once() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(create_reply("r1"))]));
        let (services, mut notes) = services(llm, store);
        let mut actor = SessionActor::load("c1", services).await.unwrap();
        actor.handle_chat("remind me").await.unwrap();

        let result = TaskResult {
            task_name: "r1".into(),
            instance_id: "wf-r1".into(),
            result: "It is time!".into(),
        };
        assert!(actor.handle_task_done(result.clone()).await.unwrap());
        assert!(!actor.handle_task_done(result).await.unwrap());

        assert!(actor.session.active_tasks.is_empty());
        assert_eq!(actor.session.chat_history.len(), 3);
        assert_eq!(
            actor.session.chat_history[2],
            Message::user("The task with name 'r1' is finished.")
        );
        assert_eq!(
            notes.recv().await,
            Some(("c1".to_string(), "Task r1 says: It is time!".to_string()))
        );
        assert!(notes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stale_result_keeps_newer_task() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(create_reply("r1"))]));
        let (services, _notes) = services(llm, store);
        let mut actor = SessionActor::load("c1", services).await.unwrap();
        actor.handle_chat("remind me").await.unwrap();

        let stale = TaskResult {
            task_name: "r1".into(),
            instance_id: "wf-old".into(),
            result: "(cancelled)".into(),
        };
        assert!(actor.handle_task_done(stale).await.unwrap());
        assert!(actor.session.active_tasks.contains_key("r1"));
    }

    #[tokio::test]
    async fn test_unsaved_create_cancels_started_task() {
        let store = Arc::new(DiskFullStore::default());
        let control = Arc::new(StaticControl::default());
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(create_reply("r1"))]));
        let (services, mut notes) = services_with(llm, store.clone(), Arc::clone(&control));
        let mut actor = SessionActor::load("c1", services).await.unwrap();

        store.full.store(true, Ordering::SeqCst);
        assert_eq!(
            actor.handle_chat("remind me").await,
            Err(TaskError::Store("disk full".into()))
        );
        assert_eq!(*control.cancelled.lock().unwrap(), vec!["wf-r1".to_string()]);
        assert!(actor.session.active_tasks.is_empty());
        assert!(actor.session.chat_history.is_empty());

        store.full.store(false, Ordering::SeqCst);
        let late = TaskResult {
            task_name: "r1".into(),
            instance_id: "wf-r1".into(),
            result: "(cancelled)".into(),
        };
        assert!(!actor.handle_task_done(late).await.unwrap());
        assert!(notes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsaved_task_done_can_be_retried() {
        let store = Arc::new(DiskFullStore::default());
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(create_reply("r1"))]));
        let (services, mut notes) = services(llm, store.clone());
        let mut actor = SessionActor::load("c1", services).await.unwrap();
        actor.handle_chat("remind me").await.unwrap();

        let result = TaskResult {
            task_name: "r1".into(),
            instance_id: "wf-r1".into(),
            result: "It is time!".into(),
        };
        store.full.store(true, Ordering::SeqCst);
        assert!(actor.handle_task_done(result.clone()).await.is_err());
        assert!(actor.session.active_tasks.contains_key("r1"));
        assert!(notes.try_recv().is_err());

        store.full.store(false, Ordering::SeqCst);
        assert!(actor.handle_task_done(result).await.unwrap());
        assert!(actor.session.active_tasks.is_empty());
        assert_eq!(
            notes.recv().await,
            Some(("c1".to_string(), "Task r1 says: It is time!".to_string()))
        );
    }

    #[tokio::test]
    async fn test_prompt_carries_active_tasks() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(create_reply("r1")),
            Ok(json!({"action": "other", "message": "ok"}).to_string()),
        ]));
        let (services, _notes) = services(Arc::clone(&llm), store);
        let mut actor = SessionActor::load("c1", services).await.unwrap();
        actor.handle_chat("remind me").await.unwrap();
        actor.handle_chat("what is running?").await.unwrap();

        let prompt = llm.last_prompt().unwrap();
        assert_eq!(prompt.last(), Some(&Message::user("what is running?")));
        let summary = &prompt[prompt.len() - 2].content;
        assert!(summary.starts_with("This here is the set of currently active tasks"));
        assert!(summary.contains("wf-r1"));
    }

    #[test]
    fn test_delivered_window_is_bounded() {
        let mut session = ChatSession::default();
        for id in ["a", "b", "c"] {
            session.mark_delivered(id, 2);
        }
        assert!(!session.is_delivered("a"));
        assert!(session.is_delivered("b"));
        assert!(session.is_delivered("c"));
    }
}
