use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for gate operations
pub type Result<T> = std::result::Result<T, GateError>;

/// Gate error types
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Rate limit contention exhausted for key: {0}")]
    ContentionExhausted(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl GateError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GateError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // Fail secure: limiter infrastructure failure blocks the request
            GateError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            GateError::ContentionExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            GateError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GateError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<redis::RedisError> for GateError {
    fn from(e: redis::RedisError) -> Self {
        GateError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for GateError {
    fn from(e: serde_json::Error) -> Self {
        GateError::Serialization(e.to_string())
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 503 responses must not leak internal detail to clients
        let body = if status == StatusCode::SERVICE_UNAVAILABLE {
            Json(json!({
                "error": "Service Temporarily Unavailable",
                "message": "Rate limiting service unavailable. Please try again later.",
            }))
        } else {
            Json(json!({
                "error": self.to_string(),
                "status": status.as_u16(),
            }))
        };

        (status, body).into_response()
    }
}
