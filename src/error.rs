use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use uuid::Uuid;

/// Failures produced by the import engine.
///
/// Fatal kinds abort a run and finalize it as failed. `Record` is the only
/// per-item kind: it is tallied by the reconciliation loop and never escapes it.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication failed (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("Rate limited (HTTP 429): {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Malformed response: {message}")]
    MalformedResponse {
        status: Option<u16>,
        message: String,
    },

    #[error("Record error: {0}")]
    Record(String),

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Task {0} already has an active run")]
    AlreadyRunning(Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl SyncError {
    /// HTTP status code of the upstream response, when one was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            SyncError::Auth { status, .. } | SyncError::Http { status, .. } => Some(*status),
            SyncError::RateLimited { .. } => Some(429),
            SyncError::MalformedResponse { status, .. } => *status,
            _ => None,
        }
    }

    /// Transient failures worth another attempt: network errors, 5xx and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Connection(_) | SyncError::RateLimited { .. } => true,
            SyncError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        SyncError::MalformedResponse {
            status: None,
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Sync(e) => {
                let status = match e {
                    SyncError::NotFound(_) => StatusCode::NOT_FOUND,
                    SyncError::Configuration(_) | SyncError::Record(_) => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    SyncError::AlreadyRunning(_) | SyncError::Cancelled => StatusCode::CONFLICT,
                    SyncError::Storage(_) => {
                        tracing::error!("Storage error: {e}");
                        return (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            axum::Json(json!({ "error": "Internal server error" })),
                        )
                            .into_response();
                    }
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, e.to_string())
            }
        };

        let body = axum::Json(json!({ "error": message }));
        (status, body).into_response()
    }
}
