//! Frequency profile of what the model tends to report.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::confidence::round2;
use crate::feedback::FeedbackEntry;

/// Evidence terms taken per finding.
const TERMS_PER_FINDING: usize = 5;

fn term_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\w{4,}\b").expect("static regex"))
}

/// Average original confidence per label and relative frequency of evidence
/// terms, trained over the learning entries of the log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierProfile {
    /// Mean original confidence per label, two decimals.
    pub confidence_thresholds: BTreeMap<String, f64>,
    /// Share of each evidence term among all counted terms, three decimals.
    pub evidence_weights: BTreeMap<String, f64>,
}

impl ClassifierProfile {
    /// Trains from entries carrying an edited report.
    #[must_use]
    pub fn train(entries: &[FeedbackEntry]) -> Self {
        let mut confidences: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
        let mut terms: BTreeMap<String, usize> = BTreeMap::new();

        for entry in entries.iter().filter(|e| e.edited_report.is_some()) {
            for finding in &entry.original_report.findings {
                let label = finding.finding.trim();
                if !label.is_empty() {
                    let slot = confidences.entry(label).or_default();
                    slot.0 += finding.confidence.value();
                    slot.1 += 1;
                }

                let evidence = finding.evidence.to_lowercase();
                for term in term_pattern()
                    .find_iter(&evidence)
                    .take(TERMS_PER_FINDING)
                {
                    *terms.entry(term.as_str().to_string()).or_default() += 1;
                }
            }
        }

        let total: usize = terms.values().sum();
        let evidence_weights = if total == 0 {
            BTreeMap::new()
        } else {
            terms
                .into_iter()
                .map(|(term, n)| (term, (n as f64 / total as f64 * 1000.0).round() / 1000.0))
                .collect()
        };

        Self {
            confidence_thresholds: confidences
                .into_iter()
                .map(|(label, (sum, n))| (label.to_string(), round2(sum / n as f64)))
                .collect(),
            evidence_weights,
        }
    }

    /// Mean confidence seen for `label`, if any.
    #[must_use]
    pub fn expected_confidence(&self, label: &str) -> Option<f64> {
        self.confidence_thresholds.get(label.trim()).copied()
    }

    /// Returns true if nothing was learned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.confidence_thresholds.is_empty() && self.evidence_weights.is_empty()
    }
}
