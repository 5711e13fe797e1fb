//! Gateway error taxonomy and its HTTP rendering.

use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use signal_rest_types::{ErrorBody, ErrorResponse};
use thiserror::Error;
use tracing::{error, warn};

use crate::backend::BackendError;
use crate::store::StorageError;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or malformed input, detected before any lock or backend call.
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// The route exists but not for this method.
    #[error("{0}")]
    MethodNotAllowed(String),

    /// Operation not valid for the account's current status.
    #[error("{0}")]
    Conflict(String),

    /// Account lock could not be acquired in time.
    #[error("account {0} is busy")]
    Busy(String),

    #[error("operation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The whole request exceeded the server's request ceiling.
    #[error("request timed out")]
    RequestTimeout,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            GatewayError::Backend(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Storage(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::MethodNotAllowed(_) => "method_not_allowed",
            GatewayError::Conflict(_) => "conflict",
            GatewayError::Busy(_) => "busy",
            GatewayError::Timeout(_) | GatewayError::RequestTimeout => "timeout",
            GatewayError::Backend(_) => "backend_error",
            GatewayError::Storage(_) => "storage_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }
}

impl From<StorageError> for GatewayError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(name) => Self::NotFound(format!("attachment '{name}' not found")),
            StorageError::InvalidName(name) => {
                Self::BadRequest(format!("invalid attachment name '{name}'"))
            }
            other => Self::Storage(other),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (backend_kind, detail) = match &self {
            GatewayError::Backend(e) => (Some(e.kind.as_str().to_string()), e.detail.clone()),
            _ => (None, None),
        };

        match &self {
            GatewayError::Backend(e) => {
                warn!(kind = %e.kind, detail = ?e.detail, "Backend call failed")
            }
            GatewayError::Storage(_) | GatewayError::Internal(_) => {
                error!(error = %self, "Request failed")
            }
            _ => {}
        }

        let body = ErrorResponse {
            error: ErrorBody {
                kind: self.kind().to_string(),
                message: self.to_string(),
                backend_kind,
                detail,
            },
        };
        (status, Json(body)).into_response()
    }
}
