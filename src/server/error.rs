//! HTTP error boundary. Every failure leaves as `{ok:false, error:<code>}` with a
//! status matching its class; internal failures also carry a correlation id that
//! is written to the log.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use serde_json::json;

use crate::delivery::{DispatchError, RegistryError};
use crate::quest::QuestError;
use crate::storage::StorageError;
use crate::validation::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("busy")]
    Busy,

    #[error("internal: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::BadRequest(code) | ApiError::Conflict(code) => {
                json!({"ok": false, "error": code})
            }
            ApiError::Unauthorized(code) | ApiError::Forbidden(code) | ApiError::NotFound(code) => {
                json!({"ok": false, "error": code})
            }
            ApiError::Busy => json!({"ok": false, "error": "busy"}),
            ApiError::Internal(detail) => {
                let correlation_id = uuid::Uuid::new_v4().to_string();
                error!(
                    "Internal error correlation_id={}: {}",
                    correlation_id,
                    crate::logutil::safe_log(&detail)
                );
                json!({"ok": false, "error": "internal_error", "correlation_id": correlation_id})
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::BadRequest(e.code())
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::InvalidUrl(_) => ApiError::BadRequest(e.code().to_string()),
            RegistryError::NotRegistered | RegistryError::Expired => {
                ApiError::Unauthorized(e.code())
            }
            RegistryError::TokenMismatch => ApiError::Forbidden(e.code()),
        }
    }
}

impl From<QuestError> for ApiError {
    fn from(e: QuestError) -> Self {
        match e {
            QuestError::MissingAvatar => ApiError::BadRequest(e.code().to_string()),
            QuestError::AlreadyActive { .. } | QuestError::NoActiveObjects | QuestError::NoActiveQuest => {
                ApiError::Conflict(e.code().to_string())
            }
            QuestError::Storage(inner) => ApiError::Internal(inner.to_string()),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::QueueFull => ApiError::Busy,
            DispatchError::Closed => ApiError::Internal("dispatcher closed".to_string()),
        }
    }
}

/// Response for a handler that panicked; installed through `CatchPanicLayer`.
pub fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    ApiError::Internal(format!("handler panicked: {}", detail)).into_response()
}
