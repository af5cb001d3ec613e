//! Correction rules mined from reviewer edits.
//!
//! A [`Rule`] pairs a trigger (an exact finding label) with one action. The
//! set of actions is closed and small, so rules are a tagged variant rather
//! than a trait hierarchy:
//!
//! | kind | action | applied as |
//! |---|---|---|
//! | `edit_pattern` | rename the label | relabel |
//! | `confidence_adjustment` | shift confidence by a 0.1 bucket | confidence shift |
//! | `finding_association` | another finding added/removed alongside | suggestion only |
//!
//! Rules are regenerated wholesale from the full feedback log on every mining
//! pass; they are never edited or merged incrementally.

mod apply;
mod classifier;
mod miner;

pub use apply::{apply_rules, AdjustmentChange, AppliedAdjustment, AssociationSuggestion, RuleApplication};
pub use classifier::ClassifierProfile;
pub use miner::{mine_rules, MiningConfig};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::feedback::FeedbackEntry;

/// Deterministic rule identifier (BLAKE3 over kind, trigger and action).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    fn derive(pattern: &RulePattern, action: &RuleAction) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(action.kind().as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(pattern.finding.as_bytes());
        hasher.update(&[0]);
        match action {
            RuleAction::EditPattern { to } => {
                hasher.update(to.as_bytes());
            }
            RuleAction::ConfidenceAdjustment { delta } => {
                hasher.update(format!("{delta:.1}").as_bytes());
            }
            RuleAction::FindingAssociation { finding, change } => {
                hasher.update(change.as_str().as_bytes());
                hasher.update(&[0]);
                hasher.update(finding.as_bytes());
            }
        }
        let hex = hasher.finalize().to_hex();
        Self(hex.as_str()[..16].to_string())
    }

    /// Hex representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rule kinds, in ranking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Label consistently renamed.
    EditPattern,
    /// Confidence consistently moved in one direction.
    ConfidenceAdjustment,
    /// Another finding consistently added or removed alongside.
    FindingAssociation,
}

impl RuleKind {
    /// All kinds in ranking order.
    pub const ALL: [Self; 3] = [
        Self::EditPattern,
        Self::ConfidenceAdjustment,
        Self::FindingAssociation,
    ];

    /// Serialized name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EditPattern => "edit_pattern",
            Self::ConfidenceAdjustment => "confidence_adjustment",
            Self::FindingAssociation => "finding_association",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the associated finding was added or removed by reviewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationChange {
    /// Reviewers added the finding.
    Added,
    /// Reviewers removed the finding.
    Removed,
}

impl AssociationChange {
    /// Serialized name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
        }
    }
}

/// Trigger condition: exact original finding label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RulePattern {
    /// Label the rule fires on.
    pub finding: String,
}

/// What a rule does when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleAction {
    /// Rename the finding.
    EditPattern {
        /// Replacement label.
        to: String,
    },
    /// Shift confidence by `delta` (a multiple of 0.1).
    ConfidenceAdjustment {
        /// Signed shift.
        delta: f64,
    },
    /// Another finding tends to be added or removed alongside.
    FindingAssociation {
        /// Associated label.
        finding: String,
        /// Direction of the reviewer edit.
        change: AssociationChange,
    },
}

impl RuleAction {
    /// Kind tag of this action.
    #[must_use]
    pub const fn kind(&self) -> RuleKind {
        match self {
            Self::EditPattern { .. } => RuleKind::EditPattern,
            Self::ConfidenceAdjustment { .. } => RuleKind::ConfidenceAdjustment,
            Self::FindingAssociation { .. } => RuleKind::FindingAssociation,
        }
    }
}

/// A mined correction rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Stable identifier.
    pub id: RuleId,
    /// Trigger.
    pub pattern: RulePattern,
    /// Effect.
    pub action: RuleAction,
    /// Number of log observations of this exact transformation.
    pub support_count: usize,
    /// `support_count / trigger occurrences`, two decimals.
    pub confidence: f64,
}

impl Rule {
    pub(crate) fn new(
        trigger: impl Into<String>,
        action: RuleAction,
        support_count: usize,
        confidence: f64,
    ) -> Self {
        let pattern = RulePattern {
            finding: trigger.into(),
        };
        Self {
            id: RuleId::derive(&pattern, &action),
            pattern,
            action,
            support_count,
            confidence,
        }
    }

    /// Kind tag.
    #[must_use]
    pub const fn kind(&self) -> RuleKind {
        self.action.kind()
    }

    /// Returns true if the rule fires on `label`, ignoring surrounding whitespace.
    #[must_use]
    pub fn matches(&self, label: &str) -> bool {
        self.pattern.finding == label.trim()
    }

    /// One-line description, e.g. `Cardiomegaly: confidence -0.4`.
    #[must_use]
    pub fn describe(&self) -> String {
        let what = match &self.action {
            RuleAction::EditPattern { to } => format!("rename to '{to}'"),
            RuleAction::ConfidenceAdjustment { delta } => format!("confidence {delta:+.1}"),
            RuleAction::FindingAssociation { finding, change } => {
                format!("'{finding}' usually {}", change.as_str())
            }
        };
        format!(
            "{}: {what} (support {}, confidence {:.2})",
            self.pattern.finding, self.support_count, self.confidence
        )
    }
}

/// Summary of what the miner learned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningStatistics {
    /// Log entries.
    pub total_learning_entries: usize,
    /// Entries with an edit.
    pub entries_with_edits: usize,
    /// Rules surfaced.
    pub total_rules_mined: usize,
    /// Rules per kind name (all kinds present, possibly zero).
    pub rules_by_kind: BTreeMap<String, usize>,
    /// Rules with confidence >= 0.7.
    pub high_confidence_rules: usize,
}

impl LearningStatistics {
    /// Rule confidence at or above which a rule counts as high-confidence.
    pub const HIGH_CONFIDENCE: f64 = 0.7;

    /// Computes statistics from a log and the rules mined from it.
    #[must_use]
    pub fn new(entries: &[FeedbackEntry], rules: &[Rule]) -> Self {
        let mut rules_by_kind: BTreeMap<String, usize> = RuleKind::ALL
            .iter()
            .map(|k| (k.as_str().to_string(), 0))
            .collect();
        for rule in rules {
            *rules_by_kind.entry(rule.kind().as_str().to_string()).or_default() += 1;
        }

        Self {
            total_learning_entries: entries.len(),
            entries_with_edits: entries.iter().filter(|e| e.has_edits()).count(),
            total_rules_mined: rules.len(),
            rules_by_kind,
            high_confidence_rules: rules
                .iter()
                .filter(|r| r.confidence >= Self::HIGH_CONFIDENCE)
                .count(),
        }
    }
}
