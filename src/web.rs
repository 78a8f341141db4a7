//! HTTP 接入（web feature）
//!
//! - POST /sessions/:id/chat  发送消息，返回 {message, quote?}
//! - GET  /sessions/:id       会话快照（历史与活跃任务）
//! - POST /events             入站事件（按 channel + event_id 去重后转给会话）
//! - GET  /health

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::core::TaskError;
use crate::inbound::EventDeduplicator;
use crate::session::{ChatReply, ChatSession, SessionHub};

pub struct WebState {
    pub hub: Arc<SessionHub>,
    pub dedup: Arc<EventDeduplicator>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// 入站事件；type 为 url_verification 时回显 challenge
#[derive(Debug, Deserialize)]
pub struct InboundEvent {
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub challenge: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum EventResponse {
    Challenge { challenge: String },
    Duplicate { duplicate: bool },
    Reply(ChatReply),
}

/// TaskError -> HTTP 响应
pub struct ApiError(pub TaskError);

impl From<TaskError> for ApiError {
    fn from(e: TaskError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            e if e.is_terminal() => StatusCode::UNPROCESSABLE_ENTITY,
            TaskError::Llm(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// 创建路由
pub fn create_router(state: Arc<WebState>) -> Router {
    Router::new()
        .route("/sessions/:id/chat", post(chat))
        .route("/sessions/:id", get(session))
        .route("/events", post(event))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

async fn chat(
    State(state): State<Arc<WebState>>,
    Path(session_id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    Ok(Json(state.hub.chat(&session_id, req.message).await?))
}

async fn session(
    State(state): State<Arc<WebState>>,
    Path(session_id): Path<String>,
) -> Result<Json<ChatSession>, ApiError> {
    Ok(Json(state.hub.snapshot(&session_id).await?))
}

async fn event(
    State(state): State<Arc<WebState>>,
    Json(ev): Json<InboundEvent>,
) -> Result<Response, ApiError> {
    if ev.event_type.as_deref() == Some("url_verification") {
        let challenge = ev.challenge.unwrap_or_default();
        return Ok(Json(EventResponse::Challenge { challenge }).into_response());
    }

    let (Some(event_id), Some(channel), Some(text)) = (ev.event_id, ev.channel, ev.text) else {
        return Ok((StatusCode::BAD_REQUEST, "event_id, channel and text are required").into_response());
    };

    if !state.dedup.is_new(&channel, &event_id).await? {
        return Ok(Json(EventResponse::Duplicate { duplicate: true }).into_response());
    }

    let reply = state.hub.chat(&channel, text).await?;
    Ok(Json(EventResponse::Reply(reply)).into_response())
}
