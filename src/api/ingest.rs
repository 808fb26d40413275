//! Ingest handler: multipart PDF upload into a session.

use axum::extract::{Multipart, State};
use axum::Json;
use serde_json::json;

use crate::error::AppError;
use crate::AppState;

/// POST /ingest: multipart `session_id` + `file`.
pub async fn ingest(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut session_id: Option<i64> = None;
    let mut file_name: Option<String> = None;
    let mut content_type = "application/octet-stream".to_string();
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(format!("failed to read multipart field: {e}")))?
    {
        match field.name() {
            Some("session_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::InvalidInput(format!("invalid session_id: {e}")))?;
                session_id = Some(
                    text.trim()
                        .parse::<i64>()
                        .map_err(|_| AppError::InvalidInput("session_id must be an integer".to_string()))?,
                );
            }
            Some("file") => {
                file_name = Some(
                    field
                        .file_name()
                        .map(sanitize_file_name)
                        .unwrap_or_else(|| "upload.pdf".to_string()),
                );
                if let Some(ct) = field.content_type() {
                    content_type = ct.to_string();
                }
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::InvalidInput(format!("failed to read file: {e}")))?;
                bytes = Some(data.to_vec());
            }
            _ => {}
        }
    }

    let session_id =
        session_id.ok_or_else(|| AppError::InvalidInput("session_id is required".to_string()))?;
    let file_name =
        file_name.ok_or_else(|| AppError::InvalidInput("file is required".to_string()))?;
    let bytes = bytes.ok_or_else(|| AppError::InvalidInput("file is required".to_string()))?;

    state
        .store
        .get_session(session_id)
        .await?
        .ok_or(AppError::SessionNotFound)?;

    let size_bytes = bytes.len() as i64;
    // Duplicate intake of the same (file name, size) into a session is a
    // conflict; the record lands before processing and is never rolled back.
    state
        .store
        .record_upload(session_id, &file_name, size_bytes)
        .await?;

    let handle = state.sessions.handle(session_id);
    let cancel = handle.cancellation();

    tracing::info!(
        session_id,
        file_name = %file_name,
        size_bytes,
        "ingest started"
    );

    let report = state
        .ingestor
        .ingest(session_id, &file_name, &content_type, bytes, &cancel)
        .await?;

    Ok(Json(json!({
        "status": "success",
        "session_id": session_id,
        "file_name": file_name,
        "size_bytes": size_bytes,
        "chunks": report.chunks_created,
        "nodes_created": report.nodes_created,
        "relationships_created": report.relationships_created,
        "language_distribution": report.language_distribution,
        "batch_id": report.batch_id,
    })))
}

/// Keep only the final path component of a client-supplied file name.
fn sanitize_file_name(name: &str) -> String {
    let trimmed = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim()
        .to_string();
    if trimmed.is_empty() {
        "upload.pdf".to_string()
    } else {
        trimmed
    }
}
