//! # radlearn - Chest X-ray report pipeline with a reviewer feedback loop
//!
//! radlearn turns the raw output of an external vision-language model into a
//! structured radiology report, explains it, and learns correction rules from
//! the edits human reviewers make.
//!
//! ## Core Concepts
//!
//! - **Report**: findings, impression, recommendations and metadata for one image
//! - **Confidence**: a score clamped to [0, 1] with a high/medium/low tier
//! - **FeedbackEntry**: one saved correction (original vs edited report)
//! - **Rule**: a frequent reviewer transformation mined from the feedback log
//!
//! ## Pipeline
//!
//! ```text
//! model output ─► normalize ─► ontology map ─► explain ─► apply rules ─► report
//!                                                              ▲
//! edited report ─► feedback log ─► mine rules ─────────────────┘
//!                        └──────► analytics
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use radlearn::{InMemoryFeedbackLog, Pipeline, PipelineOptions, SynonymTable};
//!
//! let pipeline = Pipeline::new(
//!     Arc::new(InMemoryFeedbackLog::new()),
//!     Arc::new(SynonymTable::chest_xray_defaults()),
//!     PipelineOptions::default(),
//! );
//! let processed = pipeline.process_value(&model_json);
//! pipeline.save_feedback(&processed.report, Some(&edited), None, "cxr-001.png")?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

// Core types
pub mod confidence;
pub mod error;
pub mod report;

// Pipeline stages
pub mod explain;
pub mod normalize;
pub mod ontology;
pub mod vision;

// Feedback loop
pub mod analytics;
pub mod feedback;
pub mod rules;
pub mod storage;

pub mod config;
pub mod pipeline;

// Re-export primary types at crate root for convenience
pub use analytics::{compute_analytics, AnalyticsSnapshot};
pub use config::RadConfig;
pub use confidence::{Confidence, ConfidenceLevel};
pub use error::{RadError, RadResult, UpstreamError, ValidationError};
pub use explain::{build_explanations, Explanation, ExplanationSummary};
pub use feedback::{count_edits, EntryId, FeedbackEntry, FeedbackLogger, FeedbackStatistics};
pub use normalize::{normalize_report, NormalizationNotice, Normalized};
pub use ontology::{OntologyMapper, OntologyMapping, SynonymTable};
pub use pipeline::{Pipeline, PipelineOptions, ProcessedReport};
pub use report::{Finding, Report};
pub use rules::{
    apply_rules, mine_rules, LearningStatistics, MiningConfig, Rule, RuleAction, RuleApplication,
    RuleKind,
};
pub use storage::{FeedbackLog, InMemoryFeedbackLog, StorageError};
pub use vision::{ImagePayload, ModelOutput, VisionModel};

#[cfg(feature = "persistent")]
pub use storage::{open_feedback_log, JsonFileLog, PersistentConfig};
