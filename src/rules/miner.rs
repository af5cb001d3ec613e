//! Frequency-based rule mining over the feedback log.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::confidence::round2;
use crate::feedback::FeedbackEntry;

use super::{AssociationChange, Rule, RuleAction};

/// Miner knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    /// Observations required before a rule is surfaced.
    pub min_support: usize,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self { min_support: 2 }
    }
}

impl MiningConfig {
    /// Config with the given support threshold (at least 1).
    #[must_use]
    pub fn with_min_support(min_support: usize) -> Self {
        Self {
            min_support: min_support.max(1),
        }
    }
}

/// Observations for one trigger label.
#[derive(Debug, Default)]
struct TriggerStats {
    /// Aligned finding pairs whose original carries the label.
    aligned: usize,
    /// Edited reports whose original contains the label.
    reports: usize,
    renames: BTreeMap<String, usize>,
    /// Confidence deltas in tenths.
    deltas: BTreeMap<i64, usize>,
    associations: BTreeMap<(AssociationChange, String), usize>,
}

/// Highest count wins; ties go to the smallest key.
fn most_frequent<K: Ord + Clone>(counts: &BTreeMap<K, usize>) -> Option<(K, usize)> {
    counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(k, n)| (k.clone(), *n))
}

fn rule_confidence(support: usize, occurrences: usize) -> f64 {
    if occurrences == 0 {
        return 0.0;
    }
    round2(support as f64 / occurrences as f64)
}

/// Mines correction rules from every entry that carries an edited report.
///
/// Per trigger label and per rule kind the single most frequent transformation
/// is kept, and only when it was observed at least `config.min_support` times.
/// Output is ranked by support (descending), then kind, then trigger, so the
/// same log always yields the same list.
///
/// # Example
///
/// Three entries each moving `Cardiomegaly` from 0.9 to 0.5 produce one
/// `confidence_adjustment` rule with `delta = -0.4` and `support_count = 3`.
#[must_use]
pub fn mine_rules(entries: &[FeedbackEntry], config: &MiningConfig) -> Vec<Rule> {
    let mut stats: BTreeMap<&str, TriggerStats> = BTreeMap::new();
    let mut learning_entries = 0usize;

    for entry in entries {
        let Some(edited) = entry.edited_report.as_ref() else {
            continue;
        };
        learning_entries += 1;

        let mut renamed_from = BTreeSet::new();
        let mut renamed_to = BTreeSet::new();

        for (original, corrected) in entry.aligned_findings() {
            let label = original.finding.trim();
            if label.is_empty() {
                continue;
            }
            let trigger = stats.entry(label).or_default();
            trigger.aligned += 1;

            let new_label = corrected.finding.trim();
            if !new_label.is_empty() && new_label != label {
                *trigger.renames.entry(new_label.to_string()).or_default() += 1;
                renamed_from.insert(label);
                renamed_to.insert(new_label);
            }

            let delta = corrected.confidence.value() - original.confidence.value();
            let bucket = (delta * 10.0).round() as i64;
            if bucket != 0 {
                *trigger.deltas.entry(bucket).or_default() += 1;
            }
        }

        let original_labels: BTreeSet<&str> = entry.original_report.labels().collect();
        let edited_labels: BTreeSet<&str> = edited.labels().collect();
        let added: Vec<&str> = edited_labels
            .difference(&original_labels)
            .filter(|l| !renamed_to.contains(*l))
            .copied()
            .collect();
        let removed: Vec<&str> = original_labels
            .difference(&edited_labels)
            .filter(|l| !renamed_from.contains(*l))
            .copied()
            .collect();

        for &label in &original_labels {
            let trigger = stats.entry(label).or_default();
            trigger.reports += 1;
            for &other in &added {
                *trigger
                    .associations
                    .entry((AssociationChange::Added, other.to_string()))
                    .or_default() += 1;
            }
            for &other in removed.iter().filter(|r| **r != label) {
                *trigger
                    .associations
                    .entry((AssociationChange::Removed, other.to_string()))
                    .or_default() += 1;
            }
        }
    }

    let min_support = config.min_support.max(1);
    let mut rules = Vec::new();
    for (label, trigger) in &stats {
        if let Some((to, support)) = most_frequent(&trigger.renames) {
            if support >= min_support {
                rules.push(Rule::new(
                    *label,
                    RuleAction::EditPattern { to },
                    support,
                    rule_confidence(support, trigger.aligned),
                ));
            }
        }
        if let Some((bucket, support)) = most_frequent(&trigger.deltas) {
            if support >= min_support {
                rules.push(Rule::new(
                    *label,
                    RuleAction::ConfidenceAdjustment {
                        delta: bucket as f64 / 10.0,
                    },
                    support,
                    rule_confidence(support, trigger.aligned),
                ));
            }
        }
        if let Some(((change, finding), support)) = most_frequent(&trigger.associations) {
            if support >= min_support {
                rules.push(Rule::new(
                    *label,
                    RuleAction::FindingAssociation { finding, change },
                    support,
                    rule_confidence(support, trigger.reports),
                ));
            }
        }
    }

    rules.sort_by(|a, b| {
        b.support_count
            .cmp(&a.support_count)
            .then_with(|| a.kind().cmp(&b.kind()))
            .then_with(|| a.pattern.cmp(&b.pattern))
            .then_with(|| a.id.cmp(&b.id))
    });

    debug!(
        learning_entries,
        triggers = stats.len(),
        rules = rules.len(),
        min_support,
        "rules mined"
    );
    rules
}
