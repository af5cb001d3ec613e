//! Flat JSON file feedback log.
//!
//! The whole log is one JSON array. An append reads the array, pushes the new
//! entry and writes the array back. The rewrite goes to a temp file which is
//! fsynced and renamed over the log, so a concurrent reader sees either the
//! old or the new array, never a torn file.
//!
//! Entries are kept as raw JSON between read and write so an entry this
//! version cannot parse (hand-injected, older shape) survives appends.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::feedback::FeedbackEntry;
use crate::storage::traits::{FeedbackLog, StorageError};

use super::file_lock::FileLock;
use super::PersistentConfig;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Lock(format!("poisoned lock: {context}"))
}

/// Feedback log stored as a single JSON array on disk.
#[derive(Debug)]
pub struct JsonFileLog {
    path: PathBuf,
    lock_path: PathBuf,
    config: PersistentConfig,
    // In-process half of the locking; the file lock covers other processes.
    guard: RwLock<()>,
}

impl JsonFileLog {
    /// Opens (without creating) the log at `path`, creating parent directories.
    ///
    /// # Errors
    /// `StorageError::Io` if the parent directory cannot be created.
    pub fn open(path: impl AsRef<Path>, config: PersistentConfig) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let lock_path = FileLock::lock_path_for(&path);
        Ok(Self {
            path,
            lock_path,
            config,
            guard: RwLock::new(()),
        })
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_io(&self, shared: bool) -> Result<FileLock, StorageError> {
        let lock = if shared {
            FileLock::shared(&self.lock_path)
        } else {
            FileLock::exclusive(&self.lock_path)
        };
        lock.map_err(|e| StorageError::Lock(format!("{}: {e}", self.lock_path.display())))
    }

    fn load_raw(&self) -> Result<Vec<Value>, StorageError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str::<Vec<Value>>(&text)
            .map_err(|e| StorageError::Corrupted(format!("{}: {e}", self.path.display())))
    }

    fn write_raw(&self, values: &[Value]) -> Result<(), StorageError> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "feedback".to_string());
        let temp_path = self
            .path
            .with_file_name(format!(".{file_name}.tmp.{}", Uuid::new_v4()));

        let result = (|| -> Result<(), StorageError> {
            let mut writer = BufWriter::new(File::create(&temp_path)?);
            let encoded = if self.config.pretty {
                serde_json::to_writer_pretty(&mut writer, values)
            } else {
                serde_json::to_writer(&mut writer, values)
            };
            encoded.map_err(|e| StorageError::Serialization(e.to_string()))?;
            writer.flush()?;
            if self.config.sync_on_write {
                writer.get_ref().sync_all()?;
            }
            drop(writer);
            fs::rename(&temp_path, &self.path)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }
}

impl FeedbackLog for JsonFileLog {
    fn read_all(&self) -> Result<Vec<FeedbackEntry>, StorageError> {
        let _guard = self.guard.read().map_err(|_| lock_err("json_log.read_all"))?;
        let _lock = self.lock_io(true)?;

        let raw = self.load_raw()?;
        let mut entries = Vec::with_capacity(raw.len());
        for (index, value) in raw.into_iter().enumerate() {
            match serde_json::from_value::<FeedbackEntry>(value) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(index, error = %e, "skipping unreadable feedback entry"),
            }
        }
        Ok(entries)
    }

    fn append(&self, entry: FeedbackEntry) -> Result<(), StorageError> {
        let value =
            serde_json::to_value(&entry).map_err(|e| StorageError::Serialization(e.to_string()))?;

        let _guard = self.guard.write().map_err(|_| lock_err("json_log.append"))?;
        let _lock = self.lock_io(false)?;

        // A corrupted log is surfaced rather than overwritten.
        let mut raw = self.load_raw()?;
        raw.push(value);
        self.write_raw(&raw)?;
        debug!(path = %self.path.display(), entries = raw.len(), "feedback log rewritten");
        Ok(())
    }
}
