use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

/// Client-facing error for all API handlers. Conversion from [`AppError`]
/// picks the HTTP class; anything not meant for clients collapses into a
/// sanitized 500 after the original error has been logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Vector store not initialized: {0}")]
    NotInitialized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Backend operation failed")]
    Backend,

    #[error("Internal server error")]
    Internal,
}

/// JSON envelope returned for every error response: a human-readable
/// category, the detail message, and a stable machine-readable type.
#[derive(Serialize, Debug)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(rename = "type")]
    kind: &'static str,
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Validation(message) => Self::Validation(message),
            AppError::NotInitialized(message) => Self::NotInitialized(message),
            AppError::NotFound(message) => Self::NotFound(message),
            AppError::BackendUnavailable(message) => Self::Unavailable(message),
            AppError::BackendOperation(message) => {
                tracing::error!(error = %message, "backend operation failed");
                Self::Backend
            }
            other => {
                tracing::error!(error = ?other, "internal error");
                Self::Internal
            }
        }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::NotInitialized(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Backend | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Validation Error",
            Self::NotInitialized(_) => "Not Initialized",
            Self::NotFound(_) => "Not Found",
            Self::Unavailable(_) => "Service Unavailable",
            Self::Backend | Self::Internal => "Internal Server Error",
        }
    }

    /// Matches the labels produced by [`AppError::kind`] so log lines and
    /// response envelopes agree.
    fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotInitialized(_) => "not_initialized",
            Self::NotFound(_) => "not_found",
            Self::Unavailable(_) => "backend_unavailable",
            Self::Backend => "backend_error",
            Self::Internal => "internal_error",
        }
    }

    /// Client-safe detail text: the variant payload for client-class errors,
    /// a fixed sanitized string for server-class ones.
    pub(crate) fn message(self) -> String {
        match self {
            Self::Validation(message)
            | Self::NotInitialized(message)
            | Self::NotFound(message)
            | Self::Unavailable(message) => message,
            Self::Backend | Self::Internal => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.label();
        let kind = self.kind();
        let body = ErrorBody {
            error,
            message: self.message(),
            kind,
        };
        (status, Json(body)).into_response()
    }
}
