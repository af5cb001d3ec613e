//! In-memory storage backend.
//!
//! Thread-safe implementation of [`FeedbackLog`] for embedded usage, tests,
//! and as a reference implementation.

use std::sync::RwLock;

use crate::feedback::FeedbackEntry;
use crate::storage::traits::{FeedbackLog, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Lock(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory feedback log.
#[derive(Debug, Default)]
pub struct InMemoryFeedbackLog {
    entries: RwLock<Vec<FeedbackEntry>>,
}

impl InMemoryFeedbackLog {
    /// Create a new empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log pre-populated with entries (e.g. a fixture).
    #[must_use]
    pub fn with_entries(entries: Vec<FeedbackEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }
}

impl FeedbackLog for InMemoryFeedbackLog {
    fn read_all(&self) -> Result<Vec<FeedbackEntry>, StorageError> {
        let entries = self.entries.read().map_err(|_| lock_err("feedback.read_all"))?;
        Ok(entries.clone())
    }

    fn append(&self, entry: FeedbackEntry) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| lock_err("feedback.append"))?;
        entries.push(entry);
        Ok(())
    }

    fn len(&self) -> Result<usize, StorageError> {
        let entries = self.entries.read().map_err(|_| lock_err("feedback.len"))?;
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use chrono::Utc;

    use super::*;
    use crate::feedback::EntryId;
    use crate::report::Report;

    fn entry(image: &str) -> FeedbackEntry {
        FeedbackEntry {
            id: EntryId::new(),
            image_name: image.to_string(),
            original_report: Report::new(),
            edited_report: Some(Report::new().with_impression("edited")),
            explanations: None,
            timestamp: Utc::now(),
            edit_count: 1,
        }
    }

    #[test]
    fn test_append_preserves_order() {
        let log = InMemoryFeedbackLog::new();
        assert!(log.is_empty().unwrap());
        log.append(entry("a")).unwrap();
        log.append(entry("b")).unwrap();
        let names: Vec<String> = log.read_all().unwrap().into_iter().map(|e| e.image_name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(log.len().unwrap(), 2);
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let log = Arc::new(InMemoryFeedbackLog::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for i in 0..25 {
                        log.append(entry(&format!("t{t}-{i}"))).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(log.len().unwrap(), 200);
    }
}
