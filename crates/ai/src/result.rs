use thiserror::Error;

use crate::completion::ProviderError;

/// A per-job failure that no amount of retrying can fix.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FatalError {
    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    #[error("invalid payload for {job_type}: {reason}")]
    InvalidPayload { job_type: String, reason: String },
}

/// Provider output that could not be parsed or did not satisfy the job type's shape.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("response is not valid JSON: {0}")]
    Malformed(String),

    #[error("response does not match expected shape: {0}")]
    Shape(String),

    #[error("{field}: {reason}")]
    Constraint { field: &'static str, reason: String },
}

impl ValidationError {
    pub fn constraint(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Constraint {
            field,
            reason: reason.into(),
        }
    }
}

/// Typed outcome of a failed job attempt, consumed by the retry policy.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Retryable(#[from] ProviderError),

    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl JobError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Retryable(_))
    }
}
