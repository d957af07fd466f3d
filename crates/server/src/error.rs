//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use messaging::MessagingError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// The bus or the failed-message store failed.
    Messaging(MessagingError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Messaging(err) => messaging_error_to_response(err),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "request failed");
        }
        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn messaging_error_to_response(err: MessagingError) -> (StatusCode, String) {
    match &err {
        MessagingError::NotConnected | MessagingError::Timeout { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<MessagingError> for ApiError {
    fn from(err: MessagingError) -> Self {
        ApiError::Messaging(err)
    }
}
