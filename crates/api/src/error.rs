//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use collection::CollectionError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Collection service error.
    Collection(CollectionError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Collection(err) => collection_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

/// Saga and store failures are logged in full but reported to the client
/// as a generic message.
fn collection_error_to_response(err: CollectionError) -> (StatusCode, String) {
    match &err {
        CollectionError::ToyNotFound(_) | CollectionError::ProfileNotFound(_) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        CollectionError::Invalid(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        CollectionError::Saga(saga) => {
            tracing::error!(
                step = saga.failed_step(),
                attempts = saga.attempts(),
                error = %saga,
                "write operation rolled back"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "operation failed".to_string(),
            )
        }
        CollectionError::Document(_) | CollectionError::Serialization(_) => {
            tracing::error!(error = %err, "collection read failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "operation failed".to_string(),
            )
        }
    }
}

impl From<CollectionError> for ApiError {
    fn from(err: CollectionError) -> Self {
        ApiError::Collection(err)
    }
}
