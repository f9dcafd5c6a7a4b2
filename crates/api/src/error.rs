//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Saga handling error.
    Saga(SagaError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

/// Errors the broker should redeliver on map to 503; everything the
/// participant cannot fix by retrying is a 4xx or 500.
fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match &err {
        SagaError::PublishFailure { .. }
        | SagaError::CompensationFailed { .. }
        | SagaError::Unavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        SagaError::AlreadyStarted(_) => (StatusCode::CONFLICT, err.to_string()),
        SagaError::Malformed(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        SagaError::NotInitiator(_) => (StatusCode::NOT_FOUND, err.to_string()),
        _ => {
            tracing::error!(error = %err, "unhandled saga error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}
