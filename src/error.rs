//! Infrastructure error type and its HTTP mapping.
//!
//! Usage errors and authorization denials never appear here: they are
//! ordinary response envelopes. `AppError` is only for failures of the
//! machinery itself (storage unavailable, serialization), and its HTTP
//! form hides every internal detail from the caller.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::repository::StorageError;

/// Failures of the service machinery.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A repository collaborator failed; the detail is already logged at
    /// the storage boundary.
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    /// Direct database error from plumbing that bypasses the repository
    /// (the health check).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A response value could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Every `AppError` is an opaque 500: the caller learns that the service
/// failed, the logs say why.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "request failed");

        let body = Json(json!({
            "error": {
                "code": "internal_error",
                "message": "An internal error occurred"
            }
        }));

        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}
