use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Fixed user-facing sentence for failures we never expose verbatim.
pub const USER_SAFE_FAILURE: &str =
    "I apologize, but I encountered an error while processing your request. Please try again.";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("session not found")]
    SessionNotFound,

    #[error("session deleted")]
    SessionGone,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("extraction output malformed: {0}")]
    ExtractionMalformed(String),

    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound | Self::SessionGone => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::UpstreamUnavailable(_)
            | Self::ExtractionMalformed(_)
            | Self::EmbeddingUnavailable(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to a caller. Downstream failure details stay in
    /// the logs only.
    fn public_message(&self) -> String {
        match self {
            Self::InvalidInput(msg) | Self::Conflict(msg) => msg.clone(),
            Self::SessionNotFound => "Session not found".to_string(),
            Self::SessionGone => "Session has been deleted".to_string(),
            Self::UpstreamUnavailable(_)
            | Self::ExtractionMalformed(_)
            | Self::EmbeddingUnavailable(_)
            | Self::Internal(_) => USER_SAFE_FAILURE.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(serde_json::json!({ "detail": self.public_message() }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(format!("database error: {err}"))
    }
}
