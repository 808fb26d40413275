//! Chat handlers: SSE streaming, non-streaming, and history.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::events::ChatEvent;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

fn default_history_limit() -> i64 {
    50
}

async fn validate_chat_request(state: &AppState, req: &ChatRequest) -> Result<String, AppError> {
    let message = req.message.trim().to_string();
    if message.is_empty() {
        return Err(AppError::InvalidInput("message is required".to_string()));
    }
    if message.chars().count() > state.config.limits.max_message_chars {
        return Err(AppError::InvalidInput(format!(
            "message exceeds {} characters",
            state.config.limits.max_message_chars
        )));
    }
    state
        .store
        .get_session(req.session_id)
        .await?
        .ok_or(AppError::SessionNotFound)?;
    Ok(message)
}

/// POST /chat: SSE stream of `{chunk}` frames, terminated by
/// `{done, sources}` or `{error}`.
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let message = validate_chat_request(&state, &req).await?;
    let session_id = req.session_id;
    let request_id = uuid::Uuid::new_v4().to_string();

    let handle = state.sessions.handle(session_id);
    // Serialisation point: one answer at a time per session.
    let guard = handle.acquire_answer().await;

    // The session may have been deleted while we waited for the lock.
    state
        .store
        .get_session(session_id)
        .await?
        .ok_or(AppError::SessionGone)?;

    tracing::info!(session_id, request_id = %request_id, "chat stream started");

    let stream = state
        .answerer
        .stream(session_id, message, handle.cancellation(), guard)
        .map(|event: ChatEvent| {
            let json = serde_json::to_string(&event)
                .unwrap_or_else(|e| json!({ "error": e.to_string() }).to_string());
            Ok(Event::default().data(json))
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// POST /chat/non-streaming: whole response in one JSON body.
pub async fn chat_non_streaming(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let message = validate_chat_request(&state, &req).await?;
    let session_id = req.session_id;

    let handle = state.sessions.handle(session_id);
    let guard = handle.acquire_answer().await;

    state
        .store
        .get_session(session_id)
        .await?
        .ok_or(AppError::SessionGone)?;

    let (response, sources) = state
        .answerer
        .collect(session_id, message, handle.cancellation(), guard)
        .await?;

    Ok(Json(json!({ "response": response, "sources": sources })))
}

/// GET /chat/history/{session_id}
pub async fn history(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .store
        .get_session(session_id)
        .await?
        .ok_or(AppError::SessionNotFound)?;

    let messages = state
        .store
        .message_history(session_id, query.limit.clamp(1, 500))
        .await?;

    Ok(Json(json!({
        "session_id": session_id,
        "total_count": messages.len(),
        "messages": messages,
    })))
}
