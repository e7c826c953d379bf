//! API error types with HTTP response mapping.

use async_ops::AsyncOpError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use messaging::BrokerError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Request conflicts with the resource's current state.
    Conflict(String),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<AsyncOpError> for ApiError {
    fn from(err: AsyncOpError) -> Self {
        match &err {
            AsyncOpError::TaskNotFound(_) => ApiError::NotFound(err.to_string()),
            AsyncOpError::PreconditionFailed { .. } | AsyncOpError::DuplicateTask(_) => {
                ApiError::Conflict(err.to_string())
            }
            AsyncOpError::NotTerminal(_) | AsyncOpError::UnknownStatus(_) => {
                ApiError::BadRequest(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
