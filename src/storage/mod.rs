//! Storage for the feedback log.
//!
//! The [`FeedbackLog`] trait defines the read-all / append-one interface;
//! an in-memory backend is always available and the flat-file backend is
//! behind the `persistent` feature.

mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryFeedbackLog;
pub use traits::{FeedbackLog, StorageError};

#[cfg(feature = "persistent")]
pub use persistent::{open_feedback_log, JsonFileLog, PersistentConfig};
