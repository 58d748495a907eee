//! HTTP handlers.
//!
//! Handlers return `Result<Json<T>, (StatusCode, String)>`; store failures
//! are mapped onto the shared taxonomy here (NotFound → 404, everything
//! else → 500 with the raw error kept in the log, not the response).

pub mod alerts;
pub mod artifacts;
pub mod health;

use axum::http::StatusCode;
use tracing::error;

use sentinel_store::StoreError;

pub(crate) fn bad_request(message: impl Into<String>) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message.into())
}

pub(crate) fn map_store_error(e: StoreError, context: &str) -> (StatusCode, String) {
    match e {
        StoreError::NotFound(what) => (StatusCode::NOT_FOUND, format!("not found: {what}")),
        other => {
            error!(error = %other, context, "store operation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{context} failed"),
            )
        }
    }
}
