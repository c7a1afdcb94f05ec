use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Failures raised by the durable queue store.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("durable storage unavailable: {0}")]
    StoreUnavailable(String),

    #[error("queue store I/O error: {0}")]
    StoreIo(#[from] sqlx::Error),

    #[error("queue schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("queue entry not found: {0}")]
    NotFound(Uuid),

    #[error("invalid queue entry state: {0}")]
    InvalidState(String),

    #[error("stored entry is malformed: {0}")]
    Malformed(String),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unprocessable(String),
    Unavailable(String),
    Internal(String),
    Queue(QueueError),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not Found: {msg}"),
            AppError::BadRequest(msg) => write!(f, "Bad Request: {msg}"),
            AppError::Conflict(msg) => write!(f, "Conflict: {msg}"),
            AppError::Unprocessable(msg) => write!(f, "Unprocessable: {msg}"),
            AppError::Unavailable(msg) => write!(f, "Service Unavailable: {msg}"),
            AppError::Internal(msg) => write!(f, "Internal Error: {msg}"),
            AppError::Queue(err) => write!(f, "Queue Error: {err}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Queue(err) => {
                tracing::error!("Queue error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::NotFound(id) => AppError::NotFound(format!("Queue entry {id} not found")),
            QueueError::InvalidState(msg) => AppError::Conflict(msg),
            QueueError::StoreUnavailable(msg) => AppError::Unavailable(msg),
            other => AppError::Queue(other),
        }
    }
}
