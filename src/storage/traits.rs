//! Abstract storage trait for the feedback log.
//!
//! The log is append-only: callers read everything or add one entry. Keeping
//! the surface this small means the locking discipline lives in exactly one
//! place per backend:
//! - In-memory backend for tests and embedded use
//! - Flat JSON file backend for production

use thiserror::Error;

use crate::feedback::FeedbackEntry;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(String),

    /// The log exists but cannot be parsed.
    #[error("Feedback log is corrupted: {0}")]
    Corrupted(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Lock could not be acquired (poisoned or held elsewhere).
    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Storage trait for feedback entries.
///
/// # Concurrency
/// - `append` must serialize with every other `append` on the same log
/// - `read_all` must observe either the pre- or post-append state, never a
///   partially written one
pub trait FeedbackLog: Send + Sync {
    /// Returns every entry in insertion order.
    fn read_all(&self) -> Result<Vec<FeedbackEntry>, StorageError>;

    /// Appends one entry.
    fn append(&self, entry: FeedbackEntry) -> Result<(), StorageError>;

    /// Number of entries.
    fn len(&self) -> Result<usize, StorageError> {
        self.read_all().map(|entries| entries.len())
    }

    /// Returns true if the log has no entries.
    fn is_empty(&self) -> Result<bool, StorageError> {
        self.len().map(|n| n == 0)
    }
}
