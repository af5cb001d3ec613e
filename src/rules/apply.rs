//! Applying mined rules to a fresh report.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::confidence::Confidence;
use crate::report::Report;

use super::{AssociationChange, Rule, RuleAction, RuleId, RuleKind};

/// What a rule changed on one finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdjustmentChange {
    /// Label replaced.
    Relabel {
        /// Old label.
        from: String,
        /// New label.
        to: String,
    },
    /// Confidence shifted.
    Confidence {
        /// Old score.
        from: f64,
        /// New score.
        to: f64,
    },
}

/// One automated change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedAdjustment {
    /// Index of the finding in the report.
    pub finding_index: usize,
    /// Rule that fired.
    pub rule_id: RuleId,
    /// The change.
    pub change: AdjustmentChange,
}

/// Association hint surfaced for the reviewer; never applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationSuggestion {
    /// Finding that triggered the rule.
    pub trigger: String,
    /// Finding reviewers usually add or remove.
    pub finding: String,
    /// Direction.
    pub change: AssociationChange,
    /// Rule that produced the hint.
    pub rule_id: RuleId,
    /// Rule confidence.
    pub confidence: f64,
}

/// Outcome of [`apply_rules`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleApplication {
    /// Adjusted copy of the input report.
    pub report: Report,
    /// Changes made, in finding order.
    pub adjustments: Vec<AppliedAdjustment>,
    /// Association hints.
    pub suggestions: Vec<AssociationSuggestion>,
}

impl RuleApplication {
    /// Returns true if any rule changed the report.
    #[must_use]
    pub fn is_automated(&self) -> bool {
        !self.adjustments.is_empty()
    }
}

/// Picks, for `label` and `kind`, the rule with the highest support, then
/// confidence. Earlier rules win exact ties.
fn select<'r>(rules: &'r [Rule], label: &str, kind: RuleKind) -> Option<&'r Rule> {
    rules
        .iter()
        .filter(|r| r.kind() == kind && r.matches(label))
        .fold(None, |best: Option<&Rule>, rule| match best {
            Some(b)
                if (b.support_count, b.confidence)
                    >= (rule.support_count, rule.confidence) =>
            {
                Some(b)
            }
            _ => Some(rule),
        })
}

/// Applies rules to a copy of `report`.
///
/// Rules match on the finding's trimmed label as produced by the model, and at most
/// one rule of each kind fires per finding. Renames replace the label.
/// Confidence rules shift the score by `delta * rule.confidence`, clamped to
/// [0, 1]. Association rules only yield suggestions.
#[must_use]
pub fn apply_rules(report: &Report, rules: &[Rule]) -> RuleApplication {
    let mut adjusted = report.clone();
    let mut adjustments = Vec::new();
    let mut suggestions: Vec<AssociationSuggestion> = Vec::new();

    for (index, finding) in adjusted.findings.iter_mut().enumerate() {
        let label = finding.finding.trim().to_string();
        if label.is_empty() {
            continue;
        }

        if let Some(rule) = select(rules, &label, RuleKind::EditPattern) {
            if let RuleAction::EditPattern { to } = &rule.action {
                if *to != label {
                    finding.finding.clone_from(to);
                    adjustments.push(AppliedAdjustment {
                        finding_index: index,
                        rule_id: rule.id.clone(),
                        change: AdjustmentChange::Relabel {
                            from: label.clone(),
                            to: to.clone(),
                        },
                    });
                }
            }
        }

        if let Some(rule) = select(rules, &label, RuleKind::ConfidenceAdjustment) {
            if let RuleAction::ConfidenceAdjustment { delta } = rule.action {
                let before = finding.confidence;
                let after: Confidence = before.shifted(delta * rule.confidence);
                if after != before {
                    finding.confidence = after;
                    adjustments.push(AppliedAdjustment {
                        finding_index: index,
                        rule_id: rule.id.clone(),
                        change: AdjustmentChange::Confidence {
                            from: before.value(),
                            to: after.value(),
                        },
                    });
                }
            }
        }

        if let Some(rule) = select(rules, &label, RuleKind::FindingAssociation) {
            if let RuleAction::FindingAssociation { finding: other, change } = &rule.action {
                if !suggestions.iter().any(|s| s.rule_id == rule.id) {
                    suggestions.push(AssociationSuggestion {
                        trigger: label.clone(),
                        finding: other.clone(),
                        change: *change,
                        rule_id: rule.id.clone(),
                        confidence: rule.confidence,
                    });
                }
            }
        }
    }

    if !adjustments.is_empty() || !suggestions.is_empty() {
        debug!(
            adjustments = adjustments.len(),
            suggestions = suggestions.len(),
            "rules applied"
        );
    }

    RuleApplication {
        report: adjusted,
        adjustments,
        suggestions,
    }
}
