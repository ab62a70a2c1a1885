// error.rs
// Closed error taxonomy for the consistency engine. Every engine operation
// returns one of these; the route layer maps them to HTTP statuses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mongodb::bson::oid::ObjectId;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("insufficient stock for item {item_id}")]
    InsufficientStock { item_id: ObjectId },

    #[error("balance adjustment would result in a negative balance")]
    NegativeBalance,

    #[error("join code does not match any business")]
    CodeInvalid,

    #[error("join code has expired")]
    CodeExpired,

    #[error("member {member_number} does not exist among {expected_tier}")]
    MemberNotFound {
        member_number: u32,
        expected_tier: &'static str,
    },

    #[error("the admin cannot leave the business")]
    AdminCannotLeave,

    #[error("sequence allocation contended; retries exhausted")]
    AllocationContended,

    /// First phase of a two-record write committed, second phase did not.
    /// Never retried by the engine itself; the caller decides on
    /// compensation, since blind retry risks double-applying phase one.
    #[error("partial commit: {committed} succeeded but {pending} failed: {detail}")]
    PartialCommit {
        committed: &'static str,
        pending: &'static str,
        detail: String,
    },

    #[error("storage unavailable")]
    Storage(#[from] mongodb::error::Error),
}

/// The closed set of failure kinds the boundary layer signals to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationFailed,
    NotFound,
    Unauthorized,
    Conflict,
    InvariantViolation,
    AllocationContended,
    PartialCommit,
    StorageUnavailable,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::ValidationFailed,
            AppError::NotFound(_) | AppError::CodeInvalid | AppError::MemberNotFound { .. } => {
                ErrorKind::NotFound
            }
            AppError::Unauthorized(_) => ErrorKind::Unauthorized,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::Invariant(_)
            | AppError::InsufficientStock { .. }
            | AppError::NegativeBalance
            | AppError::CodeExpired
            | AppError::AdminCannotLeave => ErrorKind::InvariantViolation,
            AppError::AllocationContended => ErrorKind::AllocationContended,
            AppError::PartialCommit { .. } => ErrorKind::PartialCommit,
            AppError::Storage(_) => ErrorKind::StorageUnavailable,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = match kind {
            ErrorKind::ValidationFailed => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::InvariantViolation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::AllocationContended | ErrorKind::StorageUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorKind::PartialCommit => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match &self {
            AppError::PartialCommit { .. } | AppError::Storage(_) => {
                tracing::error!(error = %self, "engine operation failed");
            }
            _ => {
                tracing::debug!(error = %self, "engine operation rejected");
            }
        }

        let body = Json(json!({
            "status": "error",
            "kind": kind,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
