//! Scoring Core error taxonomy.
//!
//! Mirrors the error kinds named in the spec: each one carries a stable
//! machine-readable code (used on the HTTP surface and in terminal progress
//! events) and a human-readable message.

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use thiserror::Error;

use crate::llm::LlmError;

/// Crate-wide error type returned across component boundaries.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Caller-supplied payload violates the endpoint contract.
    #[error("{0}")]
    Validation(String),

    /// Referenced article does not exist.
    #[error("article not found")]
    NotFound,

    /// Score config is empty or invalid at runtime.
    #[error("no models configured")]
    NoModelsConfigured,

    /// No usable per-model scores survived aggregation filtering.
    #[error("incomplete score: no usable per-model results")]
    IncompleteScore,

    /// A transaction failed; no partial state was persisted.
    #[error("storage operation failed")]
    StorageFailed(#[source] sqlx::Error),

    /// The run was cancelled by its caller.
    #[error("run cancelled")]
    Cancelled,

    /// The run's overall deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// An LLM call failed in a way the Executor could not recover from.
    #[error("llm error: {0}")]
    Llm(#[from] LlmError),

    /// Unexpected internal error (bug) — always logged with context.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable error kind, used in `ProgressState::error`
    /// and the HTTP `error` response field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound => "not_found",
            Self::NoModelsConfigured => "no_models_configured",
            Self::IncompleteScore => "incomplete_score",
            Self::StorageFailed(_) => "storage_failed",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Llm(e) => e.kind(),
            Self::Internal(_) => "internal",
        }
    }
}

/// Error response body for JSON responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::NoModelsConfigured | Self::IncompleteScore => StatusCode::SERVICE_UNAVAILABLE,
            Self::StorageFailed(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Cancelled | Self::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Self::Llm(_) => StatusCode::BAD_GATEWAY,
        };

        let body = Json(ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

/// Result type for Scoring Core operations.
pub type CoreResult<T> = Result<T, CoreError>;
