//! Summary statistics over the feedback log.
//!
//! Everything here is derived: a snapshot is recomputed from the full log on
//! each call and never stored. An entry with `edit_count > 0` counts as a
//! manual intervention; anything else (only reachable through an injected or
//! legacy log) counts as automated.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::confidence::round1;
use crate::feedback::FeedbackEntry;

/// Recent interventions listed in a snapshot by default.
pub const DEFAULT_RECENT_INTERVENTIONS: usize = 10;

/// Headline counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    /// Log entries.
    pub total_reports: usize,
    /// Entries with at least one edit.
    pub reports_with_edits: usize,
    /// Sum of edit counts.
    pub total_edits: usize,
    /// Findings across original reports.
    pub total_findings: usize,
    /// Distinct image names.
    pub unique_images: usize,
    /// Entries the rule miner can learn from.
    pub total_learning_entries: usize,
}

/// Automated vs manual split for one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodCounts {
    /// Entries in the window.
    pub total: usize,
    /// Entries without edits.
    pub automated: usize,
    /// Entries with edits.
    pub manual: usize,
}

impl PeriodCounts {
    fn record(&mut self, entry: &FeedbackEntry) {
        self.total += 1;
        if entry.has_edits() {
            self.manual += 1;
        } else {
            self.automated += 1;
        }
    }
}

/// Windows are by calendar date (UTC): today, the last 7 days, the last 30.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePeriodStats {
    /// Same date as `now`.
    pub today: PeriodCounts,
    /// Date within 7 days of `now`.
    pub this_week: PeriodCounts,
    /// Date within 30 days of `now`.
    pub this_month: PeriodCounts,
}

/// Automation rates, in percent with one decimal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationsBreakdown {
    /// Log entries.
    pub total_operations: usize,
    /// Entries without edits.
    pub automated_operations: usize,
    /// Entries with edits.
    pub manual_interventions: usize,
    /// `automated / total * 100`.
    pub automation_rate: f64,
    /// `manual / total * 100`.
    pub manual_intervention_rate: f64,
}

/// Averages over the original reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Findings per logged report, one decimal.
    pub average_findings_per_report: f64,
    /// Mean original confidence, in percent.
    pub average_confidence_score: f64,
    /// Findings across all original reports.
    pub total_findings_detected: usize,
    /// Entries in the 7-day window divided by 7.
    pub reports_per_day_avg: f64,
}

/// One manual intervention, for the recent list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intervention {
    /// When it was saved.
    pub timestamp: DateTime<Utc>,
    /// Image name.
    pub image_name: String,
    /// Edit count.
    pub edit_count: usize,
}

/// Manual intervention details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterventionSummary {
    /// Entries with edits.
    pub total_interventions: usize,
    /// Mean edit count over those entries, one decimal.
    pub average_edits_per_intervention: f64,
    /// Most recent first.
    pub recent_interventions: Vec<Intervention>,
}

/// Full analytics view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    /// Totals.
    pub summary: AnalyticsSummary,
    /// Rates.
    pub operations_breakdown: OperationsBreakdown,
    /// Windowed counts.
    pub time_period_stats: TimePeriodStats,
    /// Averages.
    pub performance_metrics: PerformanceMetrics,
    /// Intervention details.
    pub manual_interventions: InterventionSummary,
    /// Findings changed by mined rules since the pipeline was created.
    ///
    /// Held in memory by the pipeline and never persisted: a pipeline
    /// reopened on the same log, such as each CLI invocation, starts at 0.
    /// `compute_analytics` alone always leaves it at 0.
    pub automated_adjustments: u64,
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round1(part as f64 / total as f64 * 100.0)
}

/// Computes a snapshot with the default recent-interventions limit.
#[must_use]
pub fn compute_analytics(entries: &[FeedbackEntry], now: DateTime<Utc>) -> AnalyticsSnapshot {
    compute_analytics_with_limit(entries, now, DEFAULT_RECENT_INTERVENTIONS)
}

/// Computes a snapshot listing at most `recent_limit` recent interventions.
///
/// Never fails; an empty log yields an all-zero snapshot.
#[must_use]
pub fn compute_analytics_with_limit(
    entries: &[FeedbackEntry],
    now: DateTime<Utc>,
    recent_limit: usize,
) -> AnalyticsSnapshot {
    let total_reports = entries.len();
    let manual: Vec<&FeedbackEntry> = entries.iter().filter(|e| e.has_edits()).collect();
    let automated = total_reports - manual.len();

    let total_findings: usize = entries
        .iter()
        .map(|e| e.original_report.findings.len())
        .sum();
    let unique_images: BTreeSet<&str> = entries.iter().map(|e| e.image_name.as_str()).collect();
    let total_edits: usize = entries.iter().map(|e| e.edit_count).sum();

    let today = now.date_naive();
    let week_start = today - Duration::days(7);
    let month_start = today - Duration::days(30);
    let mut periods = TimePeriodStats::default();
    for entry in entries {
        let date = entry.timestamp.date_naive();
        if date == today {
            periods.today.record(entry);
        }
        if date >= week_start {
            periods.this_week.record(entry);
        }
        if date >= month_start {
            periods.this_month.record(entry);
        }
    }

    let (confidence_sum, confidence_n) = entries
        .iter()
        .flat_map(|e| &e.original_report.findings)
        .fold((0.0, 0usize), |(sum, n), f| (sum + f.confidence.value(), n + 1));
    let average_confidence = if confidence_n == 0 {
        0.0
    } else {
        confidence_sum / confidence_n as f64
    };

    let mut recent: Vec<Intervention> = manual
        .iter()
        .map(|e| Intervention {
            timestamp: e.timestamp,
            image_name: e.image_name.clone(),
            edit_count: e.edit_count,
        })
        .collect();
    recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    recent.truncate(recent_limit);

    let manual_edits: usize = manual.iter().map(|e| e.edit_count).sum();

    AnalyticsSnapshot {
        summary: AnalyticsSummary {
            total_reports,
            reports_with_edits: manual.len(),
            total_edits,
            total_findings,
            unique_images: unique_images.len(),
            total_learning_entries: entries
                .iter()
                .filter(|e| e.edited_report.is_some())
                .count(),
        },
        operations_breakdown: OperationsBreakdown {
            total_operations: total_reports,
            automated_operations: automated,
            manual_interventions: manual.len(),
            automation_rate: percent(automated, total_reports),
            manual_intervention_rate: percent(manual.len(), total_reports),
        },
        time_period_stats: periods,
        performance_metrics: PerformanceMetrics {
            average_findings_per_report: if total_reports == 0 {
                0.0
            } else {
                round1(total_findings as f64 / total_reports as f64)
            },
            average_confidence_score: round1(average_confidence * 100.0),
            total_findings_detected: total_findings,
            reports_per_day_avg: round1(periods.this_week.total as f64 / 7.0),
        },
        manual_interventions: InterventionSummary {
            total_interventions: manual.len(),
            average_edits_per_intervention: if manual.is_empty() {
                0.0
            } else {
                round1(manual_edits as f64 / manual.len() as f64)
            },
            recent_interventions: recent,
        },
        automated_adjustments: 0,
    }
}
