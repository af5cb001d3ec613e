//! Persistent storage backend for radlearn.
//!
//! A single flat JSON file holds the whole feedback log:
//! - File locking (shared for reads, exclusive for appends) across processes
//! - In-process `RwLock` so threads of one process queue up cheaply
//! - Write-to-temp-then-rename so readers never see a torn file
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 JsonFileLog                   │
//! ├───────────────────────────────────────────────┤
//! │  RwLock<()>  ──►  FileLock (<log>.lock)       │
//! │                      │                        │
//! │     read_all ◄── feedback_logs.json           │
//! │     append   ──► .feedback_logs.json.tmp.* ─┐ │
//! │                  rename ◄───────────────────┘ │
//! └───────────────────────────────────────────────┘
//! ```

mod file_lock;
mod json_log;

pub use file_lock::{FileLock, LockMode};
pub use json_log::JsonFileLog;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RadResult;

/// Configuration for the persistent log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    /// Whether to fsync the rewritten log before the rename (slower but safer).
    pub sync_on_write: bool,
    /// Pretty-print the JSON array.
    pub pretty: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            pretty: true,
        }
    }
}

/// Open the feedback log at the given path.
///
/// # Arguments
/// * `path` - Log file; created on first append
/// * `config` - Optional configuration (uses defaults if None)
///
/// # Errors
/// - If the parent directory cannot be created
///
/// # Example
/// ```rust,ignore
/// use radlearn::storage::persistent::open_feedback_log;
///
/// let log = open_feedback_log("./outputs/feedback_logs.json", None)?;
/// let logger = FeedbackLogger::new(Arc::new(log));
/// ```
pub fn open_feedback_log(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> RadResult<JsonFileLog> {
    Ok(JsonFileLog::open(path, config.unwrap_or_default())?)
}
