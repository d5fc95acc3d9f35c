//! Unified API error handling with structured responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::auth::AuthError;
use crate::error::PanelError;

/// API error type with structured responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// An external tool ran but rejected the input.
    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    /// The container runtime failed.
    #[error("Runtime error: {0}")]
    BadGateway(String),

    /// The old container is gone and its replacement failed. The data
    /// directory is intact.
    #[error("Recreate failed: {0}")]
    RecreateFailed(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway(_) | Self::RecreateFailed(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Conflict(_) => "CONFLICT",
            Self::Unprocessable(_) => "TOOL_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::BadGateway(_) => "RUNTIME_ERROR",
            Self::RecreateFailed(_) => "RECREATE_FAILED",
        }
    }
}

/// Structured error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::Internal(msg) | ApiError::BadGateway(msg) | ApiError::RecreateFailed(msg) => {
                error!(error_code = code, error = %msg, "API error");
            }
            ApiError::Unprocessable(msg) => {
                warn!(error_code = code, error = %msg, "External tool failed");
            }
            _ => {
                debug!(error_code = code, error = %message, "Client error");
            }
        }

        let body = ErrorResponse {
            error: message,
            code,
        };

        (status, Json(body)).into_response()
    }
}

impl From<PanelError> for ApiError {
    fn from(err: PanelError) -> Self {
        let msg = err.to_string();
        match err {
            PanelError::Conflict(_) => ApiError::Conflict(msg),
            PanelError::NotFound(_) => ApiError::NotFound(msg),
            PanelError::InvalidPath(_) | PanelError::InvalidInput(_) => ApiError::BadRequest(msg),
            PanelError::Runtime { .. } => ApiError::BadGateway(msg),
            PanelError::RecreateFailed { .. } => ApiError::RecreateFailed(msg),
            PanelError::Io { .. } => ApiError::Internal(msg),
            PanelError::ExternalTool { .. } => ApiError::Unprocessable(msg),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Internal(msg) => ApiError::Internal(format!("Authentication error: {msg}")),
            other => ApiError::Unauthorized(other.to_string()),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
