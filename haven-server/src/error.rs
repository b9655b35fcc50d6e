//! Error types for haven-server
//!
//! Every variant maps to an HTTP status so handlers can return `Result<_>`
//! directly.

use crate::entitlements::DenialReason;
use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Main error type for haven-server
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Subscription store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Errors surfaced by the shared library
    #[error(transparent)]
    Common(#[from] haven_common::Error),

    /// A plan or quota gate refused the action
    #[error("Not permitted: {}", .0.message())]
    GateDenied(DenialReason),

    /// No subscription row could be read or created for the caller
    #[error("Subscription unavailable for user {0}")]
    SubscriptionUnavailable(String),

    /// External provider failure that could not be absorbed locally
    #[error("Provider error: {0}")]
    Provider(String),

    /// Malformed or incomplete input, rejected before any remote call
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using haven-server Error
pub type Result<T> = std::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Error::GateDenied(reason) => (
                StatusCode::FORBIDDEN,
                json!({
                    "error": "upgrade_required",
                    "reason": reason.code(),
                    "message": reason.message(),
                }),
            ),
            Error::SubscriptionUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({
                    "error": "subscription_unavailable",
                    "message": "Your subscription could not be loaded. Please try again.",
                    "retryable": true,
                }),
            ),
            Error::Validation(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": "validation_failed", "message": message }),
            ),
            Error::NotFound(what) => (
                StatusCode::NOT_FOUND,
                json!({ "error": "not_found", "message": what }),
            ),
            Error::Provider(message) => (
                StatusCode::BAD_GATEWAY,
                json!({ "error": "provider_unavailable", "message": message }),
            ),
            other => {
                error!("Request failed: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal", "message": "Internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
