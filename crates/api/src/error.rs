//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use operations::OperationError;
use outbox::OutboxError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Outbox store error.
    Outbox(OutboxError),
    /// Operation tracker error.
    Operation(OperationError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Outbox(err) => outbox_error_to_response(err),
            ApiError::Operation(err) => operation_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn outbox_error_to_response(err: OutboxError) -> (StatusCode, String) {
    match &err {
        OutboxError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        OutboxError::InvalidTransition { .. } => (StatusCode::CONFLICT, err.to_string()),
        _ => {
            tracing::error!(error = %err, "outbox store error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

fn operation_error_to_response(err: OperationError) -> (StatusCode, String) {
    match &err {
        OperationError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        OperationError::Conflict { .. } => (StatusCode::CONFLICT, err.to_string()),
        OperationError::InvalidProgress(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        _ => {
            tracing::error!(error = %err, "operation store error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<OutboxError> for ApiError {
    fn from(err: OutboxError) -> Self {
        ApiError::Outbox(err)
    }
}

impl From<OperationError> for ApiError {
    fn from(err: OperationError) -> Self {
        ApiError::Operation(err)
    }
}
