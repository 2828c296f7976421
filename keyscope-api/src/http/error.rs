// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Store failures mean the watched server is unreachable or refused the
/// request; the HTTP process itself is fine.
impl From<keyscope_core::Error> for AppError {
    fn from(err: keyscope_core::Error) -> Self {
        use keyscope_core::Error;

        match err {
            Error::Redis(e) => {
                tracing::warn!("Redis error: {}", e);
                AppError::service_unavailable("Redis is unavailable")
            }
            Error::Timeout(msg) => {
                tracing::warn!("Redis timeout: {}", msg);
                AppError::service_unavailable("Redis did not respond in time")
            }
            Error::UnexpectedReply(msg) => {
                tracing::warn!("Unexpected Redis reply: {}", msg);
                AppError::service_unavailable("Redis returned an unexpected reply")
            }
            Error::Configuration(msg) => {
                tracing::warn!("Configuration error: {}", msg);
                AppError::service_unavailable(msg)
            }
            Error::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                AppError::internal_server_error("Data processing error")
            }
            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                AppError::internal_server_error("Internal server error")
            }
        }
    }
}

impl From<keyscope_live::Error> for AppError {
    fn from(err: keyscope_live::Error) -> Self {
        match err {
            keyscope_live::Error::Store(e) => e.into(),
            keyscope_live::Error::HubClosed => {
                AppError::service_unavailable("Server is shutting down")
            }
        }
    }
}
