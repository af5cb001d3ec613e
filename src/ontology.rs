//! Ontology mapping.
//!
//! Findings arrive with free-text labels ("enlarged heart", "R pleural
//! effusion"). The mapper attaches the canonical term from a static synonym
//! table by case-insensitive substring match. The table is loaded once and
//! shared immutably; the mapper itself holds no mutable state, so mapping an
//! already-mapped report yields the same terms again.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::confidence::round2;
use crate::error::{RadError, RadResult, ValidationError};
use crate::report::Report;
use crate::storage::StorageError;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SynonymEntry {
    variant: String,
    canonical: String,
}

/// Immutable canonical-term lookup table.
///
/// Entries are kept sorted longest-variant-first so the first hit is the
/// longest match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynonymTable {
    entries: Vec<SynonymEntry>,
    canonical: BTreeSet<String>,
}

/// Result of looking up one label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermMatch {
    /// Canonical term.
    pub canonical: String,
    /// Variant that matched (lowercase).
    pub variant: String,
    /// Match quality in [0.5, 1.0].
    pub confidence: f64,
}

impl SynonymTable {
    /// Builds a table from `canonical -> variants`.
    ///
    /// The canonical term is always registered as a variant of itself.
    ///
    /// # Errors
    /// `ValidationError::InvalidSynonymTable` if a canonical term is blank.
    pub fn new<I, V>(terms: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (String, V)>,
        V: IntoIterator<Item = String>,
    {
        let mut entries = Vec::new();
        let mut canonical = BTreeSet::new();
        let mut seen = BTreeSet::new();

        for (term, variants) in terms {
            let term = term.trim().to_string();
            if term.is_empty() {
                return Err(ValidationError::InvalidSynonymTable {
                    reason: "canonical term cannot be empty".to_string(),
                });
            }
            for variant in std::iter::once(term.clone()).chain(variants) {
                let variant = variant.trim().to_lowercase();
                if variant.is_empty() || !seen.insert((variant.clone(), term.clone())) {
                    continue;
                }
                entries.push(SynonymEntry {
                    variant,
                    canonical: term.clone(),
                });
            }
            canonical.insert(term);
        }

        entries.sort_by(|a, b| {
            b.variant
                .chars()
                .count()
                .cmp(&a.variant.chars().count())
                .then_with(|| a.canonical.cmp(&b.canonical))
                .then_with(|| a.variant.cmp(&b.variant))
        });

        Ok(Self { entries, canonical })
    }

    /// Parses a JSON object of `{"Canonical": ["variant", ...]}`.
    ///
    /// # Errors
    /// `ValidationError::InvalidSynonymTable` on malformed JSON.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let raw: BTreeMap<String, Vec<String>> =
            serde_json::from_str(json).map_err(|e| ValidationError::InvalidSynonymTable {
                reason: e.to_string(),
            })?;
        Self::new(raw)
    }

    /// Loads a JSON synonym file.
    ///
    /// # Errors
    /// `StorageError::Io` if the file cannot be read, or a validation error
    /// if it does not parse.
    pub fn from_path(path: impl AsRef<Path>) -> RadResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| RadError::from(StorageError::Io(format!("{}: {e}", path.display()))))?;
        Ok(Self::from_json_str(&json)?)
    }

    /// Built-in table covering the fourteen CheXpert observations.
    #[must_use]
    pub fn chest_xray_defaults() -> Self {
        const TERMS: &[(&str, &[&str])] = &[
            ("Atelectasis", &["atelectatic", "volume loss", "collapse"]),
            ("Cardiomegaly", &["enlarged heart", "cardiac enlargement", "enlarged cardiac silhouette"]),
            ("Consolidation", &["airspace consolidation", "airspace disease"]),
            ("Edema", &["pulmonary edema", "vascular congestion", "interstitial edema"]),
            ("Enlarged Cardiomediastinum", &["widened mediastinum", "mediastinal widening"]),
            ("Fracture", &["rib fracture", "fractured"]),
            ("Lung Lesion", &["nodule", "mass", "lung mass", "pulmonary nodule"]),
            ("Lung Opacity", &["opacity", "opacities", "haziness"]),
            ("No Finding", &["normal", "no acute", "unremarkable"]),
            ("Pleural Effusion", &["effusion", "pleural fluid", "blunting of costophrenic angle"]),
            ("Pleural Other", &["pleural thickening", "pleural plaque"]),
            ("Pneumonia", &["infection", "infectious process"]),
            ("Pneumothorax", &["collapsed lung", "pleural air"]),
            ("Support Devices", &["device", "line", "tube", "pacemaker", "catheter"]),
        ];

        let terms = TERMS.iter().map(|(term, variants)| {
            (
                (*term).to_string(),
                variants.iter().map(|v| (*v).to_string()).collect::<Vec<_>>(),
            )
        });
        Self::new(terms).unwrap_or_default()
    }

    /// Number of (variant, canonical) pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical terms in sorted order.
    pub fn canonical_terms(&self) -> impl Iterator<Item = &str> {
        self.canonical.iter().map(String::as_str)
    }

    /// Finds the longest variant contained in `label`.
    #[must_use]
    pub fn best_match(&self, label: &str) -> Option<TermMatch> {
        let label = label.trim().to_lowercase();
        if label.is_empty() {
            return None;
        }
        let entry = self.entries.iter().find(|e| label.contains(&e.variant))?;

        let confidence = if entry.variant == label {
            1.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let ratio = entry.variant.chars().count() as f64 / label.chars().count() as f64;
            round2(0.5 + 0.5 * ratio)
        };

        Some(TermMatch {
            canonical: entry.canonical.clone(),
            variant: entry.variant.clone(),
            confidence,
        })
    }

    /// Canonical terms with any variant occurring in `text`, in sorted order.
    #[must_use]
    pub fn suggest_terms(&self, text: &str) -> Vec<String> {
        let text = text.to_lowercase();
        let hits: BTreeSet<&str> = self
            .entries
            .iter()
            .filter(|e| text.contains(&e.variant))
            .map(|e| e.canonical.as_str())
            .collect();
        hits.into_iter().map(str::to_string).collect()
    }
}

/// A mapped report plus its coverage statistic.
#[derive(Debug, Clone, PartialEq)]
pub struct OntologyMapping {
    /// Copy of the input with `standardized_term`/`term_confidence` filled.
    pub report: Report,
    /// Findings with a standardized term.
    pub matched: usize,
    /// `matched / total`, 0.0 for a report without findings.
    pub coverage: f64,
}

/// Result of [`OntologyMapper::validate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OntologyValidation {
    /// False when any warning was raised.
    pub valid: bool,
    /// Problems worth a reviewer's attention.
    pub warnings: Vec<String>,
    /// Softer hints.
    pub suggestions: Vec<String>,
}

/// Maps finding labels onto the synonym table.
#[derive(Debug, Clone)]
pub struct OntologyMapper {
    table: Arc<SynonymTable>,
}

impl OntologyMapper {
    /// Below this confidence a finding is flagged during validation.
    pub const LOW_CONFIDENCE_WARNING: f64 = 0.3;

    /// Above this confidence an unmapped finding gets a suggestion.
    pub const HIGH_CONFIDENCE_HINT: f64 = 0.9;

    /// Creates a mapper over a shared table.
    #[must_use]
    pub fn new(table: Arc<SynonymTable>) -> Self {
        Self { table }
    }

    /// The underlying table.
    #[must_use]
    pub fn table(&self) -> &SynonymTable {
        &self.table
    }

    /// Attaches standardized terms to every finding.
    #[must_use]
    pub fn map(&self, report: &Report) -> OntologyMapping {
        let mut mapped = report.clone();
        let mut matched = 0usize;

        for finding in &mut mapped.findings {
            match self.table.best_match(&finding.finding) {
                Some(m) => {
                    matched += 1;
                    finding.standardized_term = Some(m.canonical);
                    finding.term_confidence = Some(m.confidence);
                }
                None => {
                    finding.standardized_term = None;
                    finding.term_confidence = Some(0.0);
                }
            }
        }

        let total = mapped.findings.len();
        #[allow(clippy::cast_precision_loss)]
        let coverage = if total == 0 {
            0.0
        } else {
            matched as f64 / total as f64
        };
        debug!(matched, total, coverage, "ontology mapping complete");

        OntologyMapping {
            report: mapped,
            matched,
            coverage,
        }
    }

    /// Flags unmapped and low-confidence findings of a mapped report.
    #[must_use]
    pub fn validate(&self, report: &Report) -> OntologyValidation {
        let mut out = OntologyValidation::default();

        for f in &report.findings {
            let confidence = f.confidence.value();
            if f.standardized_term.is_none() {
                out.warnings.push(format!(
                    "Finding '{}' does not map to a standard term",
                    f.finding
                ));
            }
            if confidence < Self::LOW_CONFIDENCE_WARNING {
                out.warnings.push(format!(
                    "Low confidence ({}) for finding '{}'",
                    f.confidence, f.finding
                ));
            } else if confidence > Self::HIGH_CONFIDENCE_HINT && f.standardized_term.is_none() {
                out.suggestions.push(format!(
                    "High confidence finding '{}' - consider verifying ontology mapping",
                    f.finding
                ));
            }
        }

        out.valid = out.warnings.is_empty();
        out
    }

    /// Canonical terms suggested for free text.
    #[must_use]
    pub fn suggest_terms(&self, text: &str) -> Vec<String> {
        self.table.suggest_terms(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Finding;

    fn table() -> Arc<SynonymTable> {
        Arc::new(
            SynonymTable::new(vec![
                ("Pleural Effusion".to_string(), vec!["effusion".to_string(), "pleural fluid".to_string()]),
                ("Cardiomegaly".to_string(), vec!["enlarged heart".to_string()]),
                ("Edema".to_string(), vec!["pulmonary edema".to_string()]),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_exact_match_full_confidence() {
        let m = table().best_match("  CARDIOMEGALY ").unwrap();
        assert_eq!(m.canonical, "Cardiomegaly");
        assert_eq!(m.confidence, 1.0);
    }

    #[test]
    fn test_substring_match_partial_confidence() {
        let m = table().best_match("Right pleural effusion").unwrap();
        assert_eq!(m.canonical, "Pleural Effusion");
        assert_eq!(m.variant, "pleural effusion");
        // 16 / 22 chars
        assert!((m.confidence - 0.86).abs() < 1e-9);
    }

    #[test]
    fn test_longest_variant_wins() {
        // "pulmonary edema" (15) beats "edema" (5)
        let m = table().best_match("mild pulmonary edema").unwrap();
        assert_eq!(m.variant, "pulmonary edema");
    }

    #[test]
    fn test_no_match() {
        assert!(table().best_match("Rib fracture").is_none());
        assert!(table().best_match("   ").is_none());
    }

    #[test]
    fn test_map_sets_terms_and_coverage() {
        let mapper = OntologyMapper::new(table());
        let report = Report::new()
            .with_finding(Finding::new("Enlarged heart", 0.8))
            .with_finding(Finding::new("Rib fracture", 0.6));
        let out = mapper.map(&report);
        assert_eq!(out.matched, 1);
        assert!((out.coverage - 0.5).abs() < 1e-9);
        assert_eq!(out.report.findings[0].standardized_term.as_deref(), Some("Cardiomegaly"));
        assert_eq!(out.report.findings[1].standardized_term, None);
        assert_eq!(out.report.findings[1].term_confidence, Some(0.0));
        // input untouched
        assert!(report.findings[0].standardized_term.is_none());
    }

    #[test]
    fn test_map_is_idempotent() {
        let mapper = OntologyMapper::new(table());
        let report = Report::new()
            .with_finding(Finding::new("small left effusion", 0.7))
            .with_finding(Finding::new("Nodule", 0.4));
        let once = mapper.map(&report);
        let twice = mapper.map(&once.report);
        assert_eq!(once.report, twice.report);
        assert_eq!(once.coverage, twice.coverage);
    }

    #[test]
    fn test_empty_report_coverage_zero() {
        let out = OntologyMapper::new(table()).map(&Report::new());
        assert_eq!(out.coverage, 0.0);
        assert_eq!(out.matched, 0);
    }

    #[test]
    fn test_validate() {
        let mapper = OntologyMapper::new(table());
        let report = Report::new()
            .with_finding(Finding::new("Effusion", 0.2))
            .with_finding(Finding::new("Mystery shadow", 0.95));
        let mapped = mapper.map(&report).report;
        let v = mapper.validate(&mapped);
        assert!(!v.valid);
        assert_eq!(v.warnings.len(), 2);
        assert_eq!(v.suggestions.len(), 1);
    }

    #[test]
    fn test_suggest_terms() {
        let terms = table().suggest_terms("Enlarged heart with small effusion");
        assert_eq!(terms, vec!["Cardiomegaly", "Pleural Effusion"]);
    }

    #[test]
    fn test_from_json_str() {
        let t = SynonymTable::from_json_str(r#"{"Pneumothorax": ["collapsed lung"]}"#).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.canonical_terms().collect::<Vec<_>>(), vec!["Pneumothorax"]);
        assert!(SynonymTable::from_json_str("[1,2]").is_err());
        assert!(SynonymTable::new(vec![(" ".to_string(), Vec::<String>::new())]).is_err());
    }

    #[test]
    fn test_defaults_cover_chexpert() {
        let t = SynonymTable::chest_xray_defaults();
        assert_eq!(t.canonical_terms().count(), 14);
        assert_eq!(t.best_match("Small right effusion").unwrap().canonical, "Pleural Effusion");
    }
}
