//! End-to-end report pipeline.
//!
//! A [`Pipeline`] owns the feedback log, the synonym table and the current
//! rule set. Generation runs normalize → ontology map → explain → apply rules;
//! saving feedback appends to the log and then re-mines the rule set, which is
//! swapped in wholesale.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, info_span, warn};

use crate::analytics::{compute_analytics_with_limit, AnalyticsSnapshot, DEFAULT_RECENT_INTERVENTIONS};
use crate::config::RadConfig;
use crate::error::{RadResult, UpstreamError};
use crate::explain::{build_explanations, Explanation, ExplanationSummary};
use crate::feedback::{FeedbackLogger, FeedbackStatistics};
use crate::normalize::{normalize_model_output, normalize_report, NormalizationNotice, Normalized};
use crate::ontology::{OntologyMapper, OntologyValidation, SynonymTable};
use crate::report::Report;
use crate::rules::{
    apply_rules, mine_rules, AdjustmentChange, AppliedAdjustment, AssociationSuggestion, ClassifierProfile,
    LearningStatistics, MiningConfig, Rule,
};
use crate::storage::FeedbackLog;
use crate::vision::{ImagePayload, ModelOutput, VisionModel};

/// Pipeline knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Rule mining settings.
    pub mining: MiningConfig,
    /// Interventions listed in analytics.
    pub recent_interventions_limit: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            mining: MiningConfig::default(),
            recent_interventions_limit: DEFAULT_RECENT_INTERVENTIONS,
        }
    }
}

impl From<&RadConfig> for PipelineOptions {
    fn from(config: &RadConfig) -> Self {
        Self {
            mining: config.mining(),
            recent_interventions_limit: config.recent_interventions_limit,
        }
    }
}

/// Everything produced for one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedReport {
    /// Final report, after mapping and rules.
    pub report: Report,
    /// Defaults the normalizer applied.
    pub notices: Vec<NormalizationNotice>,
    /// Share of findings mapped to a standard term.
    pub ontology_coverage: f64,
    /// Mapping warnings and hints.
    pub ontology_validation: OntologyValidation,
    /// One per finding, describing the model's output.
    pub explanations: Vec<Explanation>,
    /// Report-level explanation summary.
    pub summary: ExplanationSummary,
    /// Changes made by mined rules.
    pub adjustments: Vec<AppliedAdjustment>,
    /// Association hints from mined rules.
    pub suggestions: Vec<AssociationSuggestion>,
}

impl ProcessedReport {
    /// Returns true if mined rules changed the report.
    #[must_use]
    pub fn is_automated(&self) -> bool {
        !self.adjustments.is_empty()
    }
}

/// Report pipeline over a feedback log.
pub struct Pipeline {
    logger: FeedbackLogger,
    mapper: OntologyMapper,
    options: PipelineOptions,
    rules: RwLock<Vec<Rule>>,
    automated_adjustments: AtomicU64,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("options", &self.options)
            .field("synonyms", &self.mapper.table().len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a pipeline and mines the initial rule set from the log.
    #[must_use]
    pub fn new(
        log: Arc<dyn FeedbackLog>,
        synonyms: Arc<SynonymTable>,
        options: PipelineOptions,
    ) -> Self {
        let logger = FeedbackLogger::new(log);
        let rules = mine_rules(&logger.entries_or_empty(), &options.mining);
        info!(rules = rules.len(), synonyms = synonyms.len(), "pipeline ready");
        Self {
            logger,
            mapper: OntologyMapper::new(synonyms),
            options,
            rules: RwLock::new(rules),
            automated_adjustments: AtomicU64::new(0),
        }
    }

    /// Opens the log and synonym table named by `config`.
    ///
    /// # Errors
    /// - `StorageError` if the log directory or synonym file is unusable
    /// - `ValidationError::InvalidSynonymTable` for a malformed table
    #[cfg(feature = "persistent")]
    pub fn from_config(config: &RadConfig) -> RadResult<Self> {
        let log = crate::storage::open_feedback_log(&config.log_path, Some(config.persistent()))?;
        let synonyms = match &config.synonyms_path {
            Some(path) => SynonymTable::from_path(path)?,
            None => SynonymTable::chest_xray_defaults(),
        };
        Ok(Self::new(
            Arc::new(log),
            Arc::new(synonyms),
            PipelineOptions::from(config),
        ))
    }

    /// Feedback logger over the pipeline's log.
    #[must_use]
    pub fn logger(&self) -> &FeedbackLogger {
        &self.logger
    }

    /// Ontology mapper.
    #[must_use]
    pub fn mapper(&self) -> &OntologyMapper {
        &self.mapper
    }

    /// Calls the model and processes its output.
    pub fn generate(&self, model: &dyn VisionModel, image: &ImagePayload) -> ProcessedReport {
        let span = info_span!("generate", image = %image.name, model = model.name());
        let _enter = span.enter();

        let output = model.generate(image);
        if let Err(e) = &output {
            warn!(error = %e, "model call failed");
        }
        self.process(output)
    }

    /// Processes a model response (or failure).
    pub fn process(&self, output: Result<ModelOutput, UpstreamError>) -> ProcessedReport {
        self.finish(normalize_model_output(output))
    }

    /// Processes an already-parsed JSON payload.
    pub fn process_value(&self, raw: &Value) -> ProcessedReport {
        self.finish(normalize_report(raw))
    }

    fn finish(&self, normalized: Normalized) -> ProcessedReport {
        let Normalized { report, notices } = normalized;

        let mapping = self.mapper.map(&report);
        let (explanations, summary) = build_explanations(&mapping.report);

        let applied = {
            let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
            apply_rules(&mapping.report, &rules)
        };

        let relabeled = applied
            .adjustments
            .iter()
            .any(|a| matches!(a.change, AdjustmentChange::Relabel { .. }));
        let (report, coverage) = if relabeled {
            let remapped = self.mapper.map(&applied.report);
            (remapped.report, remapped.coverage)
        } else {
            (applied.report, mapping.coverage)
        };

        if !applied.adjustments.is_empty() {
            self.automated_adjustments
                .fetch_add(applied.adjustments.len() as u64, Ordering::Relaxed);
        }
        let ontology_validation = self.mapper.validate(&report);

        debug!(
            findings = report.findings.len(),
            notices = notices.len(),
            adjustments = applied.adjustments.len(),
            "report processed"
        );

        ProcessedReport {
            report,
            notices,
            ontology_coverage: coverage,
            ontology_validation,
            explanations,
            summary,
            adjustments: applied.adjustments,
            suggestions: applied.suggestions,
        }
    }

    /// Saves a correction and re-mines rules. Returns the edit count.
    ///
    /// A failure to re-read the log after a successful append keeps the
    /// previous rule set and is only logged.
    ///
    /// # Errors
    /// See [`FeedbackLogger::log_feedback`].
    pub fn save_feedback(
        &self,
        original: &Report,
        edited: Option<&Report>,
        explanations: Option<&[Explanation]>,
        image_name: &str,
    ) -> RadResult<usize> {
        let edit_count = self
            .logger
            .log_feedback(original, edited, explanations, image_name)?;
        if let Err(e) = self.refresh_rules() {
            warn!(error = %e, "rule refresh failed; keeping previous rules");
        }
        Ok(edit_count)
    }

    /// Re-mines the rule set from the full log and returns its size.
    ///
    /// # Errors
    /// `StorageError` if the log cannot be read.
    pub fn refresh_rules(&self) -> RadResult<usize> {
        let entries = self.logger.log().read_all()?;
        let mined = mine_rules(&entries, &self.options.mining);
        let count = mined.len();
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = mined;
        info!(rules = count, entries = entries.len(), "rules refreshed");
        Ok(count)
    }

    /// Current rule set, ranked.
    #[must_use]
    pub fn rules(&self) -> Vec<Rule> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Findings changed by rules since this pipeline was created.
    ///
    /// Process-local; not stored in the feedback log.
    #[must_use]
    pub fn automated_adjustments(&self) -> u64 {
        self.automated_adjustments.load(Ordering::Relaxed)
    }

    /// Analytics as of now.
    #[must_use]
    pub fn analytics(&self) -> AnalyticsSnapshot {
        self.analytics_at(Utc::now())
    }

    /// Analytics as of `now`.
    #[must_use]
    pub fn analytics_at(&self, now: DateTime<Utc>) -> AnalyticsSnapshot {
        let mut snapshot = compute_analytics_with_limit(
            &self.logger.entries_or_empty(),
            now,
            self.options.recent_interventions_limit,
        );
        snapshot.automated_adjustments = self.automated_adjustments();
        snapshot
    }

    /// What the miner has learned so far.
    #[must_use]
    pub fn learning_statistics(&self) -> LearningStatistics {
        LearningStatistics::new(&self.logger.entries_or_empty(), &self.rules())
    }

    /// Confidence and evidence profile over the log.
    #[must_use]
    pub fn classifier_profile(&self) -> ClassifierProfile {
        ClassifierProfile::train(&self.logger.entries_or_empty())
    }

    /// Feedback log statistics.
    #[must_use]
    pub fn feedback_statistics(&self) -> FeedbackStatistics {
        self.logger.statistics()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::storage::InMemoryFeedbackLog;

    fn pipeline() -> Pipeline {
        Pipeline::new(
            Arc::new(InMemoryFeedbackLog::new()),
            Arc::new(SynonymTable::chest_xray_defaults()),
            PipelineOptions::default(),
        )
    }

    fn model_json(confidence: f64) -> Value {
        json!({
            "findings": [{
                "finding": "Cardiomegaly",
                "location": "cardiac silhouette",
                "evidence": "Enlarged cardiac silhouette",
                "confidence": confidence,
            }],
            "impression": "Cardiomegaly.",
            "recommendations": ["Echocardiogram"],
        })
    }

    #[test]
    fn test_process_fills_all_stages() {
        let p = pipeline();
        let out = p.process_value(&model_json(0.9));
        assert!(out.notices.is_empty());
        assert_eq!(out.report.findings[0].standardized_term.as_deref(), Some("Cardiomegaly"));
        assert_eq!(out.ontology_coverage, 1.0);
        assert_eq!(out.explanations.len(), 1);
        assert_eq!(out.summary.total_findings, 1);
        assert!(!out.is_automated());
    }

    #[test]
    fn test_upstream_failure_yields_empty_report() {
        let p = pipeline();
        let out = p.process(Err(UpstreamError::Timeout { duration_ms: 30_000 }));
        assert!(out.report.is_empty());
        assert_eq!(out.notices.len(), 1);
        assert!(out.explanations.is_empty());
    }

    #[test]
    fn test_feedback_loop_learns_and_applies() {
        let p = pipeline();
        let shown = p.process_value(&model_json(0.9)).report;
        let mut edited = shown.clone();
        edited.findings[0].confidence = 0.5.into();
        for i in 0..3 {
            p.save_feedback(&shown, Some(&edited), None, &format!("cxr-{i}.png"))
                .unwrap();
        }
        assert_eq!(p.rules().len(), 1);

        let out = p.process_value(&model_json(0.9));
        assert!(out.is_automated());
        assert_eq!(out.report.findings[0].confidence.value(), 0.5);
        // explanations describe the model output
        assert_eq!(out.explanations[0].confidence_score, 0.9);

        let analytics = p.analytics();
        assert_eq!(analytics.summary.total_reports, 3);
        assert_eq!(analytics.automated_adjustments, 1);
        assert_eq!(p.learning_statistics().total_rules_mined, 1);
    }

    #[test]
    fn test_rejected_feedback_leaves_rules_alone() {
        let p = pipeline();
        let report = p.process_value(&model_json(0.9)).report;
        let err = p.save_feedback(&report, None, None, "a.png").unwrap_err();
        assert!(err.is_validation());
        let err = p
            .save_feedback(&report, Some(&report), None, "a.png")
            .unwrap_err();
        assert!(err.is_validation());
        assert!(p.rules().is_empty());
        assert_eq!(p.feedback_statistics().total_entries, 0);
    }

    #[test]
    fn test_generate_with_closure_model() {
        let p = pipeline();
        let model = |_: &ImagePayload| -> Result<ModelOutput, UpstreamError> {
            Ok(ModelOutput::Text(format!("```json\n{}\n```", model_json(0.7))))
        };
        let out = p.generate(&model, &ImagePayload::jpeg("cxr.jpg", vec![0xff, 0xd8]));
        assert_eq!(out.report.findings.len(), 1);
        assert_eq!(out.report.impression, "Cardiomegaly.");
    }
}
