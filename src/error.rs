//! Error types for radlearn.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! the specific condition instead of parsing messages.

use thiserror::Error;

use crate::storage::StorageError;

/// Caller-supplied data violates a precondition.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("No edited report provided; make edits before saving feedback")]
    MissingEditedReport,

    #[error("Edited report is identical to the original; nothing to save")]
    NoEdits,

    #[error("Image name cannot be empty")]
    EmptyImageName,

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },

    #[error("Invalid synonym table: {reason}")]
    InvalidSynonymTable {
        reason: String,
    },
}

/// Failures reported by the external vision-model boundary.
///
/// The normalizer absorbs every variant into an empty report plus a notice;
/// these never reach the caller of the pipeline as an error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Model call timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Model returned malformed output: {message}")]
    MalformedOutput {
        message: String,
    },

    #[error("Model refused the request: {reason}")]
    Refusal {
        reason: String,
    },

    #[error("Model transport failed: {message}")]
    Transport {
        message: String,
    },
}

/// Top-level error type for radlearn.
#[derive(Debug, Error)]
pub enum RadError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl RadError {
    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Result type alias for radlearn operations.
pub type RadResult<T> = Result<T, RadError>;
