//! Gateway error types with HTTP status code mapping.
//!
//! [`GatewayError`] is the central error type for the service. Each variant
//! maps to a numeric code, a machine-readable category, a retry hint and an
//! HTTP status, rendered as a structured JSON error response.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::domain::{CounterpartyId, MutationStep};
use crate::service::DeadlineExceeded;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 3002,
///     "category": "pool_exhausted",
///     "message": "connection pool exhausted",
///     "retryable": true
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Machine-readable category.
    pub category: &'static str,
    /// Human-readable message including the underlying cause.
    pub message: String,
    /// Whether retrying the same request may succeed.
    pub retryable: bool,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                         |
/// |-----------|-----------------|-------------------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request                     |
/// | 2000–2999 | State/Not Found | 404 Not Found / 409 Conflict        |
/// | 3000–3999 | Server          | 500 / 503 / 504                     |
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The counterparty to lock does not exist.
    #[error("counterparty not found: {0}")]
    CounterpartyNotFound(CounterpartyId),

    /// Generated reference code already exists.
    #[error("reference code collision")]
    ReferenceCollision,

    /// No pooled connection became available before the deadline.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// The operation did not finish within its budget.
    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// The counterparty row lock was not granted within the budget.
    /// Rendered exactly like [`GatewayError::DeadlineExceeded`].
    #[error("deadline of {0:?} exceeded")]
    LockTimeout(Duration),

    /// The store rejected an insert or update.
    #[error("{step} failed: {cause}")]
    WriteFailed {
        /// Protocol step that failed.
        step: MutationStep,
        /// Underlying store message.
        cause: String,
    },

    /// Every step succeeded but the commit failed or was cut off by the
    /// deadline; the final state must be reconciled by the caller.
    #[error("commit failed: {0}")]
    CommitFailed(String),

    /// Persistence layer failure outside a mutation step.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::CounterpartyNotFound(_) => 2001,
            Self::ReferenceCollision => 2002,
            Self::Internal(_) => 3000,
            Self::PersistenceError(_) => 3001,
            Self::PoolExhausted => 3002,
            Self::DeadlineExceeded(_) | Self::LockTimeout(_) => 3003,
            Self::WriteFailed { .. } => 3004,
            Self::CommitFailed(_) => 3005,
        }
    }

    /// Returns the machine-readable category for this variant.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::CounterpartyNotFound(_) => "not_found",
            Self::ReferenceCollision => "reference_collision",
            Self::PoolExhausted => "pool_exhausted",
            Self::DeadlineExceeded(_) | Self::LockTimeout(_) => "deadline_exceeded",
            Self::WriteFailed { .. } => "write_failed",
            Self::CommitFailed(_) => "commit_failed",
            Self::PersistenceError(_) => "persistence_error",
            Self::Internal(_) => "internal",
        }
    }

    /// Returns `true` if the caller may retry the same request as-is.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted
                | Self::DeadlineExceeded(_)
                | Self::LockTimeout(_)
                | Self::ReferenceCollision
        )
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::CounterpartyNotFound(_) => StatusCode::NOT_FOUND,
            Self::ReferenceCollision => StatusCode::CONFLICT,
            Self::PoolExhausted => StatusCode::SERVICE_UNAVAILABLE,
            Self::DeadlineExceeded(_) | Self::LockTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::WriteFailed { .. }
            | Self::CommitFailed(_)
            | Self::PersistenceError(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DeadlineExceeded> for GatewayError {
    fn from(err: DeadlineExceeded) -> Self {
        Self::DeadlineExceeded(err.budget)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                category: self.category(),
                message: self.to_string(),
                retryable: self.is_retryable(),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
