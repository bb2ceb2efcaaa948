//! # Error Handling and Response Types
//!
//! Two error families live here:
//!
//! - [`MirrorError`]: the outcome of anything that talks to the upstream feed.
//!   The mirror coordinator pattern-matches on its kind to decide whether a
//!   failure degrades to "absent" or is surfaced.
//! - [`AppError`]: failures of the server and its local collaborators (store,
//!   indexer, HTTP boundary). Implements axum's `IntoResponse` and renders a
//!   standardized JSON body.
//!
//! ## Error Response Format
//!
//! ```json
//! {
//!   "error": "Human-readable error message",
//!   "code": "machine_readable_error_code",
//!   "details": {...},
//!   "timestamp": "2024-01-01T12:00:00Z"
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::validation::ValidationError;

/// Failure kinds for upstream-facing calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MirrorError {
    /// Network, timeout or protocol failure; the feed could not answer.
    #[error("upstream feed unreachable: {0}")]
    Unreachable(String),

    /// The feed answered and does not have the requested resource.
    #[error("not found on upstream feed: {0}")]
    NotFound(String),

    /// The feed answered with data that cannot be used.
    #[error("malformed upstream data: {0}")]
    Malformed(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl MirrorError {
    /// Failures that mean "upstream has nothing for us right now".
    pub fn is_absent(&self) -> bool {
        matches!(self, MirrorError::Unreachable(_) | MirrorError::NotFound(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MirrorError::Unreachable(_) => "unreachable",
            MirrorError::NotFound(_) => "not_found",
            MirrorError::Malformed(_) => "malformed",
            MirrorError::Cancelled => "cancelled",
        }
    }
}

pub type MirrorResult<T> = Result<T, MirrorError>;

/// Standardized error response structure for consistent API error handling
#[derive(Serialize, Debug)]
pub struct ApiErrorResponse {
    pub error: String,          // Human-readable error message
    pub code: String,           // Machine-readable error code
    pub details: Option<Value>, // Additional error details
    pub timestamp: String,      // ISO 8601 timestamp
}

/// Error code classification for machine-readable error types
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    UpstreamError,
    Cancelled,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::NotFound => "not_found",
            ErrorCode::UpstreamError => "upstream_error",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::InternalError => "internal_error",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::UpstreamError => StatusCode::BAD_GATEWAY,
            // nginx's "client closed request"; nobody is listening anyway.
            ErrorCode::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
            }
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Application-specific error types with error codes
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    /// Get the appropriate error code for this error type
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AppError::BadRequest(_) | AppError::Json(_) | AppError::Validation(_) => {
                ErrorCode::ValidationError
            }
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::Mirror(MirrorError::Cancelled) => ErrorCode::Cancelled,
            AppError::Mirror(MirrorError::NotFound(_)) => ErrorCode::NotFound,
            AppError::Mirror(_) => ErrorCode::UpstreamError,
            AppError::InternalError(_) | AppError::Io(_) | AppError::Anyhow(_) => {
                ErrorCode::InternalError
            }
        }
    }

    /// Get additional error details if available
    pub fn details(&self) -> Option<Value> {
        match self {
            AppError::Mirror(e) => Some(json!({ "upstream": e.kind() })),
            AppError::Anyhow(e) => e
                .source()
                .map(|source| json!({ "source": source.to_string() })),
            _ => None,
        }
    }

    /// Create a standardized error response
    pub fn to_error_response(&self) -> ApiErrorResponse {
        let code = self.error_code();
        ApiErrorResponse {
            error: self.to_string(),
            code: code.as_str().to_string(),
            details: self.details(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.error_code().http_status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }

        let error_response = self.to_error_response();
        (status, axum::Json(error_response)).into_response()
    }
}

/// Convenient result type for server and collaborator operations.
pub type AppResult<T> = Result<T, AppError>;
