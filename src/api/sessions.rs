//! Session CRUD handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::error::AppError;
use crate::store::SessionRecord;
use crate::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_list_limit")]
    pub limit: i64,
}

fn default_list_limit() -> i64 {
    100
}

/// POST /sessions
pub async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<SessionRecord>), AppError> {
    let name = body.and_then(|Json(req)| req.name);
    if let Some(name) = &name {
        if name.chars().count() > 255 {
            return Err(AppError::InvalidInput(
                "session name exceeds 255 characters".to_string(),
            ));
        }
    }
    let session = state.store.create_session(name).await?;
    tracing::info!(session_id = session.id, "session created");
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<SessionRecord>>, AppError> {
    let sessions = state
        .store
        .list_sessions(query.skip.max(0), query.limit.clamp(1, 500))
        .await?;
    Ok(Json(sessions))
}

/// GET /sessions/{id}
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SessionRecord>, AppError> {
    let session = state
        .store
        .get_session(id)
        .await?
        .ok_or(AppError::SessionNotFound)?;
    Ok(Json(session))
}

/// PUT /sessions/{id}
pub async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateSessionRequest>,
) -> Result<Json<SessionRecord>, AppError> {
    if req.name.chars().count() > 255 {
        return Err(AppError::InvalidInput(
            "session name exceeds 255 characters".to_string(),
        ));
    }
    let session = state
        .store
        .rename_session(id, &req.name)
        .await?
        .ok_or(AppError::SessionNotFound)?;
    Ok(Json(session))
}

/// DELETE /sessions/{id}
///
/// A barrier: in-flight work for the session is cancelled, then both stores
/// are cleared so no orphan stays observable.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state
        .store
        .get_session(id)
        .await?
        .ok_or(AppError::SessionNotFound)?;

    state.sessions.revoke(id);

    state
        .graph
        .delete_session(id)
        .await
        .map_err(|e| AppError::Internal(format!("failed to clear graph data: {e}")))?;

    state.store.delete_session(id).await?;

    tracing::info!(session_id = id, "session deleted with cascade");
    Ok(StatusCode::NO_CONTENT)
}
