//! Feedback store.
//!
//! Every time a reviewer saves an edited report, the pair (original, edited)
//! is wrapped into a [`FeedbackEntry`] and appended to the feedback log.
//! Entries are never updated or deleted; the rule miner and the analytics
//! aggregator read the whole log.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{RadResult, ValidationError};
use crate::explain::Explanation;
use crate::report::{Finding, Report};
use crate::storage::FeedbackLog;

/// Unique identifier for a feedback entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Creates a new random entry ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One persisted correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    /// Entry identifier.
    #[serde(default)]
    pub id: EntryId,

    /// Source image file name.
    #[serde(alias = "image")]
    pub image_name: String,

    /// Report as generated.
    pub original_report: Report,

    /// Report as corrected by the reviewer.
    #[serde(default)]
    pub edited_report: Option<Report>,

    /// Explanations shown alongside the original report.
    #[serde(default)]
    pub explanations: Option<Vec<Explanation>>,

    /// When the entry was saved.
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,

    /// Structural diff size between original and edited report.
    #[serde(default)]
    pub edit_count: usize,
}

impl FeedbackEntry {
    /// Returns true if a reviewer changed something.
    ///
    /// Entries with `edit_count == 0` are rejected on save, but an injected or
    /// legacy log may contain them; they count as automated.
    #[must_use]
    pub const fn has_edits(&self) -> bool {
        self.edit_count > 0
    }

    /// Original and edited findings aligned by index, when an edit exists.
    pub fn aligned_findings(&self) -> impl Iterator<Item = (&Finding, &Finding)> {
        let edited: &[Finding] = self
            .edited_report
            .as_ref()
            .map_or(&[], |r| r.findings.as_slice());
        self.original_report.findings.iter().zip(edited.iter())
    }
}

/// Counts differing leaf values between two reports.
///
/// Findings are aligned by position, not content: a finding past the shorter
/// list counts as fully different ([`Finding::FIELD_COUNT`] leaves), so
/// reordering or deleting a finding overcounts. Recommendations are aligned the
/// same way, one leaf each. Impression is one leaf; metadata is one leaf per
/// key.
#[must_use]
pub fn count_edits(original: &Report, edited: &Report) -> usize {
    let aligned: usize = original
        .findings
        .iter()
        .zip(&edited.findings)
        .map(|(a, b)| a.diff_count(b))
        .sum();
    let surplus_findings = original.findings.len().abs_diff(edited.findings.len());

    let impression = usize::from(original.impression != edited.impression);

    let recommendations = original
        .recommendations
        .iter()
        .zip(&edited.recommendations)
        .filter(|(a, b)| a != b)
        .count()
        + original
            .recommendations
            .len()
            .abs_diff(edited.recommendations.len());

    let keys: BTreeSet<&String> = original
        .metadata
        .keys()
        .chain(edited.metadata.keys())
        .collect();
    let metadata = keys
        .into_iter()
        .filter(|k| original.metadata.get(*k) != edited.metadata.get(*k))
        .count();

    aligned + surplus_findings * Finding::FIELD_COUNT + impression + recommendations + metadata
}

/// Aggregate numbers over the feedback log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackStatistics {
    /// All entries.
    pub total_entries: usize,
    /// Entries with `edit_count > 0`.
    pub entries_with_edits: usize,
    /// Sum of `edit_count`.
    pub total_edits: usize,
    /// `total_edits / total_entries`, two decimals.
    pub average_edits_per_entry: f64,
    /// `entries_with_edits / total_entries`, two decimals.
    pub edit_rate: f64,
}

impl FeedbackStatistics {
    /// Computes statistics over a slice of entries.
    #[must_use]
    pub fn from_entries(entries: &[FeedbackEntry]) -> Self {
        if entries.is_empty() {
            return Self::default();
        }
        let total = entries.len();
        let with_edits = entries.iter().filter(|e| e.has_edits()).count();
        let edits: usize = entries.iter().map(|e| e.edit_count).sum();

        #[allow(clippy::cast_precision_loss)]
        Self {
            total_entries: total,
            entries_with_edits: with_edits,
            total_edits: edits,
            average_edits_per_entry: crate::confidence::round2(edits as f64 / total as f64),
            edit_rate: crate::confidence::round2(with_edits as f64 / total as f64),
        }
    }
}

/// Validates and appends corrections to a [`FeedbackLog`].
#[derive(Clone)]
pub struct FeedbackLogger {
    log: Arc<dyn FeedbackLog>,
}

impl fmt::Debug for FeedbackLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedbackLogger").finish_non_exhaustive()
    }
}

impl FeedbackLogger {
    /// Creates a logger over a store.
    #[must_use]
    pub fn new(log: Arc<dyn FeedbackLog>) -> Self {
        Self { log }
    }

    /// The underlying store.
    #[must_use]
    pub fn log(&self) -> &Arc<dyn FeedbackLog> {
        &self.log
    }

    /// Records a correction and returns its edit count.
    ///
    /// # Errors
    /// - `ValidationError::MissingEditedReport` when `edited` is `None`
    /// - `ValidationError::NoEdits` when the reports do not differ
    /// - `ValidationError::EmptyImageName` for a blank image name
    /// - `StorageError` when the append fails
    pub fn log_feedback(
        &self,
        original: &Report,
        edited: Option<&Report>,
        explanations: Option<&[Explanation]>,
        image_name: &str,
    ) -> RadResult<usize> {
        self.record(original, edited, explanations, image_name)
            .map(|entry| entry.edit_count)
    }

    /// Like [`Self::log_feedback`] but returns the stored entry.
    ///
    /// # Errors
    /// See [`Self::log_feedback`].
    pub fn record(
        &self,
        original: &Report,
        edited: Option<&Report>,
        explanations: Option<&[Explanation]>,
        image_name: &str,
    ) -> RadResult<FeedbackEntry> {
        let edited = edited.ok_or(ValidationError::MissingEditedReport)?;
        let image_name = image_name.trim();
        if image_name.is_empty() {
            return Err(ValidationError::EmptyImageName.into());
        }

        let edit_count = count_edits(original, edited);
        if edit_count == 0 {
            return Err(ValidationError::NoEdits.into());
        }

        let entry = FeedbackEntry {
            id: EntryId::new(),
            image_name: image_name.to_string(),
            original_report: original.clone(),
            edited_report: Some(edited.clone()),
            explanations: explanations.map(<[Explanation]>::to_vec),
            timestamp: Utc::now(),
            edit_count,
        };

        self.log.append(entry.clone())?;
        info!(id = %entry.id, image = %entry.image_name, edit_count, "feedback saved");
        Ok(entry)
    }

    /// Reads the whole log, degrading to an empty list on storage failure.
    #[must_use]
    pub fn entries_or_empty(&self) -> Vec<FeedbackEntry> {
        match self.log.read_all() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "feedback log unreadable; treating as empty");
                Vec::new()
            }
        }
    }

    /// Statistics over the current log.
    #[must_use]
    pub fn statistics(&self) -> FeedbackStatistics {
        FeedbackStatistics::from_entries(&self.entries_or_empty())
    }
}

/// RFC 3339 on write; also accepts naive ISO-8601 timestamps (read as UTC).
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::Confidence;
    use crate::storage::InMemoryFeedbackLog;

    fn original() -> Report {
        Report::new()
            .with_finding(Finding::new("Cardiomegaly", 0.9).with_evidence("Enlarged heart"))
            .with_finding(Finding::new("Effusion", 0.6))
            .with_impression("Cardiomegaly with effusion.")
            .with_recommendation("Echo")
            .with_metadata("view", "PA")
    }

    fn logger() -> (FeedbackLogger, Arc<InMemoryFeedbackLog>) {
        let log = Arc::new(InMemoryFeedbackLog::new());
        (FeedbackLogger::new(log.clone()), log)
    }

    #[test]
    fn test_count_edits_identity_is_zero() {
        let report = original();
        assert_eq!(count_edits(&report, &report.clone()), 0);
    }

    #[test]
    fn test_count_edits_single_confidence_change() {
        let report = original();
        let mut edited = report.clone();
        edited.findings[0].confidence = Confidence::new(0.5);
        assert_eq!(count_edits(&report, &edited), 1);
    }

    #[test]
    fn test_count_edits_top_level_fields() {
        let report = original();
        let edited = report
            .clone()
            .with_impression("Normal.")
            .with_recommendation("CT chest")
            .with_metadata("quality", "adequate");
        // impression + one surplus recommendation + one new metadata key
        assert_eq!(count_edits(&report, &edited), 3);
    }

    #[test]
    fn test_count_edits_surplus_finding_is_fully_different() {
        let report = original();
        let mut edited = report.clone();
        edited.findings.pop();
        assert_eq!(count_edits(&report, &edited), Finding::FIELD_COUNT);
    }

    #[test]
    fn test_count_edits_reorder_overcounts() {
        // Positional alignment: swapping two findings reports every differing
        // leaf of both positions even though nothing was really edited.
        let report = original();
        let mut edited = report.clone();
        edited.findings.swap(0, 1);
        let swapped = count_edits(&report, &edited);
        assert!(swapped >= 4, "expected overcount, got {swapped}");
    }

    #[test]
    fn test_log_feedback_requires_edited_report() {
        let (logger, log) = logger();
        let err = logger.log_feedback(&original(), None, None, "cxr.png").unwrap_err();
        assert!(err.is_validation());
        assert!(matches!(
            err,
            crate::RadError::Validation(ValidationError::MissingEditedReport)
        ));
        assert_eq!(log.read_all().unwrap().len(), 0);
    }

    #[test]
    fn test_log_feedback_rejects_no_diff() {
        let (logger, log) = logger();
        let report = original();
        let err = logger
            .log_feedback(&report, Some(&report.clone()), None, "cxr.png")
            .unwrap_err();
        assert!(matches!(err, crate::RadError::Validation(ValidationError::NoEdits)));
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_log_feedback_rejects_blank_image() {
        let (logger, _) = logger();
        let report = original();
        let edited = report.clone().with_impression("changed");
        let err = logger.log_feedback(&report, Some(&edited), None, "  ").unwrap_err();
        assert!(matches!(err, crate::RadError::Validation(ValidationError::EmptyImageName)));
    }

    #[test]
    fn test_log_feedback_appends() {
        let (logger, log) = logger();
        let report = original();
        let mut edited = report.clone();
        edited.findings[1].finding = "Pleural Effusion".to_string();

        let count = logger.log_feedback(&report, Some(&edited), None, "cxr-7.png").unwrap();
        assert_eq!(count, 1);

        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].image_name, "cxr-7.png");
        assert_eq!(entries[0].edited_report.as_ref(), Some(&edited));
        assert!(entries[0].has_edits());
    }

    #[test]
    fn test_statistics() {
        let (logger, _) = logger();
        assert_eq!(logger.statistics(), FeedbackStatistics::default());

        let report = original();
        let edited = report.clone().with_impression("changed");
        logger.log_feedback(&report, Some(&edited), None, "a.png").unwrap();
        let mut edited2 = edited.clone();
        edited2.findings[0].severity = Some("mild".to_string());
        logger.log_feedback(&report, Some(&edited2), None, "b.png").unwrap();

        let stats = logger.statistics();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.entries_with_edits, 2);
        assert_eq!(stats.total_edits, 3);
        assert!((stats.average_edits_per_entry - 1.5).abs() < 1e-9);
        assert!((stats.edit_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_entry_accepts_legacy_shape() {
        let json = r#"{
            "image": "legacy.jpg",
            "original_report": {"findings": [{"finding": "Edema", "confidence": 0.4}]},
            "timestamp": "2024-03-01T10:15:00.123456"
        }"#;
        let entry: FeedbackEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.image_name, "legacy.jpg");
        assert_eq!(entry.edit_count, 0);
        assert!(!entry.has_edits());
        assert_eq!(entry.timestamp.to_rfc3339(), "2024-03-01T10:15:00.123456+00:00");
    }

    #[test]
    fn test_entry_serialized_shape() {
        let entry = FeedbackEntry {
            id: EntryId::new(),
            image_name: "x.png".to_string(),
            original_report: original(),
            edited_report: None,
            explanations: None,
            timestamp: Utc::now(),
            edit_count: 0,
        };
        let value = serde_json::to_value(&entry).unwrap();
        for key in ["id", "image_name", "original_report", "edited_report", "explanations", "timestamp", "edit_count"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_aligned_findings() {
        let report = original();
        let mut edited = report.clone();
        edited.findings.truncate(1);
        let entry = FeedbackEntry {
            id: EntryId::new(),
            image_name: "x.png".to_string(),
            original_report: report,
            edited_report: Some(edited),
            explanations: None,
            timestamp: Utc::now(),
            edit_count: 7,
        };
        assert_eq!(entry.aligned_findings().count(), 1);
    }
}
