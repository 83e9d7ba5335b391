//! Error types for travelhook
//!
//! This module provides the error taxonomy for the ingestion pipeline using
//! `thiserror`, together with the HTTP mapping used by the axum handlers.
//!
//! The taxonomy follows the pipeline's recovery policy:
//!
//! - [`WebhookError::Authentication`], [`WebhookError::Validation`] and
//!   [`WebhookError::RateLimited`] reject the request before any persistence.
//! - [`WebhookError::Persistence`] on the audit path is logged and swallowed;
//!   acknowledging the provider takes priority over local audit completeness.
//! - [`WebhookError::Handler`] is captured after the HTTP response has been
//!   sent and is recorded as FAILED state, never propagated to the provider.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// The main error type for travelhook operations
#[derive(Error, Debug)]
pub enum WebhookError {
    /// Invalid or missing webhook signature
    #[error("Invalid signature")]
    Authentication,

    /// Malformed event envelope
    #[error("Invalid payload: {0}")]
    Validation(String),

    /// Source exceeded its request budget for the current window
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the window resets
        retry_after_secs: u64,
    },

    /// Event store unreachable or rejected the operation
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Business-logic handler failure
    #[error("Handler failed: {0}")]
    Handler(String),

    /// No handler registered for the event type
    #[error("Unsupported event type: {0}")]
    UnsupportedEventType(String),

    /// Event not found in the store (admin retry)
    #[error("Event not found: {0}")]
    NotFound(String),

    /// Unexpected internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for travelhook operations
pub type WebhookResult<T> = std::result::Result<T, WebhookError>;

impl WebhookError {
    /// HTTP status code this error maps to on the ingestion surface
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::Authentication => StatusCode::UNAUTHORIZED,
            WebhookError::Validation(_) => StatusCode::BAD_REQUEST,
            WebhookError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            WebhookError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            WebhookError::NotFound(_) => StatusCode::NOT_FOUND,
            WebhookError::Handler(_)
            | WebhookError::UnsupportedEventType(_)
            | WebhookError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));

        match self {
            WebhookError::RateLimited { retry_after_secs } => {
                let mut response = (status, body).into_response();
                let headers = response.headers_mut();
                headers.insert(
                    "X-RateLimit-Remaining",
                    http::HeaderValue::from_static("0"),
                );
                if let Ok(value) = http::HeaderValue::from_str(&retry_after_secs.to_string()) {
                    headers.insert("Retry-After", value);
                }
                response
            }
            _ => (status, body).into_response(),
        }
    }
}
