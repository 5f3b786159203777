//! API error types and their HTTP mapping.
//!
//! Errors are classified by who must act on them: caller-facing validation
//! and quota errors carry a human `message` plus a machine `error` code;
//! upstream/storage failures are logged with detail and surfaced generically.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::db::DbError;
use crate::providers::ProviderError;

/// Errors surfaced by route handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("Not logged in")]
    Unauthenticated,

    /// Quota exceeded. `code` is the machine error string
    /// (`meeting_limit` or `limit_reached`).
    #[error("{message}")]
    Quota {
        code: &'static str,
        message: String,
    },

    #[error("Not found")]
    NotFound,

    #[error("Admin access required")]
    NotAdmin,

    /// The user already has an active live session; carries its id so the
    /// client can attach.
    #[error("A session is already active")]
    SessionActive(String),

    #[error("Provider call failed: {0}")]
    Upstream(String),

    #[error("Provider not configured")]
    ProviderUnavailable,

    #[error("Failed to parse AI response")]
    Decode,

    #[error("Storage error: {0}")]
    Storage(#[from] DbError),
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotConfigured => ApiError::ProviderUnavailable,
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Quota { code, .. } => {
                if *code == "limit_reached" {
                    StatusCode::TOO_MANY_REQUESTS
                } else {
                    StatusCode::FORBIDDEN
                }
            }
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::NotAdmin => StatusCode::FORBIDDEN,
            ApiError::SessionActive(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) | ApiError::Decode | ApiError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::ProviderUnavailable => StatusCode::NOT_IMPLEMENTED,
        }
    }

    fn body(&self) -> serde_json::Value {
        match self {
            ApiError::Validation(msg) => serde_json::json!({
                "error": "validation",
                "message": msg,
            }),
            ApiError::Unauthenticated => serde_json::json!({
                "error": "unauthenticated",
                "message": "Not logged in",
            }),
            ApiError::Quota { code, message } => serde_json::json!({
                "error": code,
                "message": message,
            }),
            ApiError::NotFound => serde_json::json!({
                "error": "not_found",
                "message": "Not found",
            }),
            ApiError::NotAdmin => serde_json::json!({
                "error": "forbidden",
                "message": "Admin access required",
            }),
            ApiError::SessionActive(session_id) => serde_json::json!({
                "error": "session_active",
                "session_id": session_id,
            }),
            ApiError::Upstream(_) => serde_json::json!({
                "error": "upstream",
                "message": "Upstream provider call failed",
            }),
            ApiError::ProviderUnavailable => serde_json::json!({
                "error": "provider_not_configured",
                "message": "This provider is not configured on the server",
            }),
            ApiError::Decode => serde_json::json!({
                "error": "decode",
                "message": "Failed to parse AI response",
            }),
            ApiError::Storage(_) => serde_json::json!({
                "error": "storage",
                "message": "Internal storage error",
            }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Internal detail stays in the logs; the body is already scrubbed.
        match &self {
            ApiError::Upstream(detail) => log::error!("upstream failure: {}", detail),
            ApiError::Storage(e) => log::error!("storage failure: {}", e),
            ApiError::Decode => log::error!("extractor output could not be decoded"),
            _ => {}
        }
        (self.status(), Json(self.body())).into_response()
    }
}
