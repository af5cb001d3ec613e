//! Canonical report shape.
//!
//! A [`Report`] is the normalized form of one model response: ordered
//! findings, an impression, ordered recommendations and string metadata.
//! Operations in this crate never mutate a report in place; they take
//! `&Report` and hand back a new value, so the original generated report and
//! any edited copy can both be kept.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::confidence::Confidence;

/// One reported observation extracted from an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Free-text label, e.g. "Cardiomegaly".
    pub finding: String,

    /// Anatomical location, when the model gave one.
    #[serde(default)]
    pub location: Option<String>,

    /// Visual evidence description.
    #[serde(default)]
    pub evidence: String,

    /// Model (or user) confidence in the finding.
    #[serde(default)]
    pub confidence: Confidence,

    /// Severity, e.g. "mild".
    #[serde(default)]
    pub severity: Option<String>,

    /// Canonical ontology term, set by the ontology mapper.
    #[serde(default)]
    pub standardized_term: Option<String>,

    /// Match quality of `standardized_term`, set by the ontology mapper.
    #[serde(default)]
    pub term_confidence: Option<f64>,
}

impl Finding {
    /// Number of leaf fields compared by the structural diff.
    pub const FIELD_COUNT: usize = 7;

    /// Creates a finding with a label and confidence; other fields empty.
    #[must_use]
    pub fn new(finding: impl Into<String>, confidence: f64) -> Self {
        Self {
            finding: finding.into(),
            location: None,
            evidence: String::new(),
            confidence: Confidence::new(confidence),
            severity: None,
            standardized_term: None,
            term_confidence: None,
        }
    }

    /// Sets the location.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Sets the evidence text.
    #[must_use]
    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = evidence.into();
        self
    }

    /// Sets the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }

    /// Number of leaf fields that differ from `other`.
    #[must_use]
    pub fn diff_count(&self, other: &Self) -> usize {
        [
            self.finding != other.finding,
            self.location != other.location,
            self.evidence != other.evidence,
            self.confidence != other.confidence,
            self.severity != other.severity,
            self.standardized_term != other.standardized_term,
            self.term_confidence != other.term_confidence,
        ]
        .into_iter()
        .filter(|differs| *differs)
        .count()
    }
}

/// Structured output for one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Findings in model order.
    #[serde(default)]
    pub findings: Vec<Finding>,

    /// Overall clinical impression.
    #[serde(default)]
    pub impression: String,

    /// Recommendations in model order.
    #[serde(default)]
    pub recommendations: Vec<String>,

    /// Free-form metadata (view, image quality, technique, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Report {
    /// Creates an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a finding.
    #[must_use]
    pub fn with_finding(mut self, finding: Finding) -> Self {
        self.findings.push(finding);
        self
    }

    /// Sets the impression.
    #[must_use]
    pub fn with_impression(mut self, impression: impl Into<String>) -> Self {
        self.impression = impression.into();
        self
    }

    /// Appends a recommendation.
    #[must_use]
    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendations.push(recommendation.into());
        self
    }

    /// Inserts a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns true if the report has no findings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    /// Iterates over non-empty finding labels, trimmed.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.findings
            .iter()
            .map(|f| f.finding.trim())
            .filter(|label| !label.is_empty())
    }

    /// Renders the report as plain text.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut text = String::from("=== RADIOLOGY REPORT ===\n\nFINDINGS:\n");

        if self.findings.is_empty() {
            text.push_str("No significant findings detected.\n");
        }
        for (i, f) in self.findings.iter().enumerate() {
            text.push_str(&format!("\n{}. {}", i + 1, f.finding));
            if let Some(location) = &f.location {
                text.push_str(&format!(" - Location: {location}"));
            }
            if let Some(severity) = &f.severity {
                text.push_str(&format!(" - Severity: {severity}"));
            }
            text.push_str(&format!("\n   Confidence: {}", f.confidence));
            if !f.evidence.is_empty() {
                text.push_str(&format!("\n   Evidence: {}", f.evidence));
            }
            text.push('\n');
        }

        text.push_str("\nIMPRESSION:\n");
        if self.impression.is_empty() {
            text.push_str("No impression provided.\n");
        } else {
            text.push_str(&self.impression);
            text.push('\n');
        }

        if !self.recommendations.is_empty() {
            text.push_str("\nRECOMMENDATIONS:\n");
            for (i, rec) in self.recommendations.iter().enumerate() {
                text.push_str(&format!("{}. {rec}\n", i + 1));
            }
        }

        if !self.metadata.is_empty() {
            text.push_str("\nMETADATA:\n");
            for (key, value) in &self.metadata {
                text.push_str(&format!("- {key}: {value}\n"));
            }
        }

        text
    }
}
