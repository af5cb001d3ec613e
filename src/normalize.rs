//! Report normalizer.
//!
//! Coerces whatever the model sent into a well-formed [`Report`]. This never
//! fails: missing or mistyped fields get defaults, unknown fields are dropped,
//! and every default that was applied is reported back as a
//! [`NormalizationNotice`] (and logged at `warn`).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::confidence::Confidence;
use crate::error::UpstreamError;
use crate::report::{Finding, Report};
use crate::vision::ModelOutput;

/// A non-fatal diagnostic produced while normalizing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizationNotice {
    /// The model produced nothing usable; the report is empty.
    UnusableOutput {
        /// Why the output was rejected.
        reason: String,
    },
    /// Top-level value was not a JSON object.
    NotAnObject,
    /// `findings` absent.
    MissingFindings,
    /// `findings` present but not an array.
    FindingsNotArray,
    /// A `findings` element was not an object and was skipped.
    SkippedFinding {
        /// Position in the raw array.
        index: usize,
    },
    /// A finding had no `confidence`; the default was used.
    MissingConfidence {
        /// Position in the normalized findings.
        index: usize,
    },
    /// A finding's `confidence` was not a number; the default was used.
    NonNumericConfidence {
        /// Position in the normalized findings.
        index: usize,
    },
    /// A finding's `confidence` was outside [0, 1] and was clamped.
    ClampedConfidence {
        /// Position in the normalized findings.
        index: usize,
        /// Value as received.
        original: f64,
    },
    /// `impression` absent or not a string.
    MissingImpression,
    /// `recommendations` absent or of an unusable type.
    MissingRecommendations,
    /// `metadata` present but not an object.
    InvalidMetadata,
}

impl fmt::Display for NormalizationNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnusableOutput { reason } => write!(f, "unusable model output: {reason}"),
            Self::NotAnObject => write!(f, "model output is not a JSON object"),
            Self::MissingFindings => write!(f, "findings missing; using empty list"),
            Self::FindingsNotArray => write!(f, "findings is not an array; using empty list"),
            Self::SkippedFinding { index } => write!(f, "finding #{index} is not an object; skipped"),
            Self::MissingConfidence { index } => {
                write!(f, "finding #{index} has no confidence; using {}", Confidence::DEFAULT.value())
            }
            Self::NonNumericConfidence { index } => {
                write!(f, "finding #{index} confidence is not numeric; using {}", Confidence::DEFAULT.value())
            }
            Self::ClampedConfidence { index, original } => {
                write!(f, "finding #{index} confidence {original} clamped to [0, 1]")
            }
            Self::MissingImpression => write!(f, "impression missing; using empty string"),
            Self::MissingRecommendations => write!(f, "recommendations missing; using empty list"),
            Self::InvalidMetadata => write!(f, "metadata is not an object; dropped"),
        }
    }
}

/// A normalized report plus the defaults applied to produce it.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// The well-formed report.
    pub report: Report,
    /// Diagnostics, empty when the input was already canonical.
    pub notices: Vec<NormalizationNotice>,
}

impl Normalized {
    /// Returns true if the model output could not be used at all.
    #[must_use]
    pub fn is_unusable(&self) -> bool {
        self.notices
            .iter()
            .any(|n| matches!(n, NormalizationNotice::UnusableOutput { .. }))
    }

    fn unusable(reason: impl Into<String>) -> Self {
        let notice = NormalizationNotice::UnusableOutput {
            reason: reason.into(),
        };
        warn!(%notice, "model output unusable; returning empty report");
        Self {
            report: Report::new(),
            notices: vec![notice],
        }
    }
}

/// Normalizes an already-parsed model response.
#[must_use]
pub fn normalize_report(raw: &Value) -> Normalized {
    let mut notices = Vec::new();

    let Some(obj) = raw.as_object() else {
        notices.push(NormalizationNotice::NotAnObject);
        return finish(Report::new(), notices);
    };

    let findings = normalize_findings(obj.get("findings"), &mut notices);

    let impression = match obj.get("impression") {
        Some(Value::String(s)) => s.clone(),
        _ => {
            notices.push(NormalizationNotice::MissingImpression);
            String::new()
        }
    };

    let recommendations = match obj.get("recommendations") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => {
            notices.push(NormalizationNotice::MissingRecommendations);
            Vec::new()
        }
    };

    let metadata = match obj.get("metadata") {
        Some(Value::Object(map)) => stringify_map(map),
        None | Some(Value::Null) => BTreeMap::new(),
        Some(_) => {
            notices.push(NormalizationNotice::InvalidMetadata);
            BTreeMap::new()
        }
    };

    let report = Report {
        findings,
        impression,
        recommendations,
        metadata,
    };
    finish(report, notices)
}

/// Normalizes the result of a model call, absorbing upstream failures.
#[must_use]
pub fn normalize_model_output(output: Result<ModelOutput, UpstreamError>) -> Normalized {
    match output {
        Ok(ModelOutput::Json(value)) => normalize_report(&value),
        Ok(ModelOutput::Text(text)) => match parse_model_text(&text) {
            Ok(value) => normalize_report(&value),
            Err(e) => Normalized::unusable(e.to_string()),
        },
        Err(e) => Normalized::unusable(e.to_string()),
    }
}

/// Parses model text as JSON, falling back to the first fenced code block.
///
/// # Errors
/// `UpstreamError::MalformedOutput` when neither the text nor a fenced block
/// parses.
pub fn parse_model_text(text: &str) -> Result<Value, UpstreamError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(UpstreamError::MalformedOutput {
            message: "empty response".to_string(),
        });
    }

    let direct = serde_json::from_str::<Value>(trimmed);
    if let Ok(value) = direct {
        return Ok(value);
    }

    if let Some(block) = fenced_block().captures(trimmed).and_then(|c| c.get(1)) {
        return serde_json::from_str(block.as_str().trim()).map_err(|e| {
            UpstreamError::MalformedOutput {
                message: format!("fenced block is not JSON: {e}"),
            }
        });
    }

    Err(UpstreamError::MalformedOutput {
        message: format!("response is not JSON ({} chars)", trimmed.len()),
    })
}

fn fenced_block() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("static regex"))
}

fn finish(report: Report, notices: Vec<NormalizationNotice>) -> Normalized {
    if !notices.is_empty() {
        warn!(
            notices = notices.len(),
            findings = report.findings.len(),
            "report normalized with defaults applied"
        );
        for notice in &notices {
            debug!(%notice, "normalization notice");
        }
    }
    Normalized { report, notices }
}

fn normalize_findings(raw: Option<&Value>, notices: &mut Vec<NormalizationNotice>) -> Vec<Finding> {
    let items = match raw {
        Some(Value::Array(items)) => items,
        None | Some(Value::Null) => {
            notices.push(NormalizationNotice::MissingFindings);
            return Vec::new();
        }
        Some(_) => {
            notices.push(NormalizationNotice::FindingsNotArray);
            return Vec::new();
        }
    };

    let mut findings = Vec::with_capacity(items.len());
    for (raw_index, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            notices.push(NormalizationNotice::SkippedFinding { index: raw_index });
            continue;
        };
        let index = findings.len();
        findings.push(Finding {
            finding: text_field(obj, "finding").unwrap_or_default(),
            location: non_blank(text_field(obj, "location")),
            evidence: text_field(obj, "evidence").unwrap_or_default(),
            confidence: confidence_field(obj, index, notices),
            severity: non_blank(text_field(obj, "severity")),
            standardized_term: non_blank(text_field(obj, "standardized_term")),
            term_confidence: obj.get("term_confidence").and_then(Value::as_f64),
        });
    }
    findings
}

fn confidence_field(
    obj: &Map<String, Value>,
    index: usize,
    notices: &mut Vec<NormalizationNotice>,
) -> Confidence {
    let raw = match obj.get("confidence") {
        None | Some(Value::Null) => {
            notices.push(NormalizationNotice::MissingConfidence { index });
            return Confidence::DEFAULT;
        }
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        Some(_) => None,
    };

    let Some(value) = raw else {
        notices.push(NormalizationNotice::NonNumericConfidence { index });
        return Confidence::DEFAULT;
    };

    if Confidence::needs_clamp(value) {
        notices.push(NormalizationNotice::ClampedConfidence {
            index,
            original: value,
        });
    }
    Confidence::new(value)
}

fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn stringify_map(map: &Map<String, Value>) -> BTreeMap<String, String> {
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let text = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), text)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assert_well_formed(report: &Report) {
        for f in &report.findings {
            let c = f.confidence.value();
            assert!((0.0..=1.0).contains(&c), "confidence {c} out of range");
        }
    }

    #[test]
    fn test_empty_object() {
        let out = normalize_report(&json!({}));
        assert!(out.report.findings.is_empty());
        assert!(out.report.recommendations.is_empty());
        assert_eq!(out.report.impression, "");
        assert!(out.notices.contains(&NormalizationNotice::MissingFindings));
        assert!(out.notices.contains(&NormalizationNotice::MissingImpression));
    }

    #[test]
    fn test_non_object_inputs() {
        for raw in [json!(null), json!(42), json!("text"), json!([1, 2])] {
            let out = normalize_report(&raw);
            assert!(out.report.findings.is_empty());
            assert_eq!(out.notices, vec![NormalizationNotice::NotAnObject]);
        }
    }

    #[test]
    fn test_canonical_input_has_no_notices() {
        let raw = json!({
            "findings": [{
                "finding": "Cardiomegaly",
                "location": "heart",
                "evidence": "Enlarged cardiac silhouette",
                "confidence": 0.82,
                "severity": "mild"
            }],
            "impression": "Cardiomegaly.",
            "recommendations": ["Echo"],
            "metadata": {"view": "PA"}
        });
        let out = normalize_report(&raw);
        assert!(out.notices.is_empty(), "{:?}", out.notices);
        assert_eq!(out.report.findings[0].location.as_deref(), Some("heart"));
        assert!((out.report.findings[0].confidence.value() - 0.82).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_defaults_and_clamping() {
        let raw = json!({
            "findings": [
                {"finding": "A"},
                {"finding": "B", "confidence": 1.8},
                {"finding": "C", "confidence": -2},
                {"finding": "D", "confidence": "high"},
                {"finding": "E", "confidence": "0.35"},
                {"finding": "F", "confidence": null}
            ],
            "impression": "x",
            "recommendations": []
        });
        let out = normalize_report(&raw);
        assert_well_formed(&out.report);
        let values: Vec<f64> = out.report.findings.iter().map(|f| f.confidence.value()).collect();
        assert_eq!(values, vec![0.5, 1.0, 0.0, 0.5, 0.35, 0.5]);
        assert!(out.notices.contains(&NormalizationNotice::MissingConfidence { index: 0 }));
        assert!(out.notices.contains(&NormalizationNotice::ClampedConfidence { index: 1, original: 1.8 }));
        assert!(out.notices.contains(&NormalizationNotice::NonNumericConfidence { index: 3 }));
        assert!(out.notices.contains(&NormalizationNotice::MissingConfidence { index: 5 }));
    }

    #[test]
    fn test_skips_non_object_findings_and_drops_extra_fields() {
        let raw = json!({
            "findings": ["oops", {"finding": "Edema", "confidence": 0.4, "foo": "bar"}],
            "impression": "",
            "recommendations": [],
            "extra": true
        });
        let out = normalize_report(&raw);
        assert_eq!(out.report.findings.len(), 1);
        assert_eq!(out.report.findings[0].finding, "Edema");
        assert_eq!(out.notices, vec![NormalizationNotice::SkippedFinding { index: 0 }]);
    }

    #[test]
    fn test_recommendations_and_metadata_coercion() {
        let raw = json!({
            "findings": [],
            "impression": "ok",
            "recommendations": "Follow up in 6 weeks",
            "metadata": {"view": "AP", "rotated": false, "kvp": 110, "note": null}
        });
        let out = normalize_report(&raw);
        assert_eq!(out.report.recommendations, vec!["Follow up in 6 weeks"]);
        assert_eq!(out.report.metadata.get("rotated").map(String::as_str), Some("false"));
        assert_eq!(out.report.metadata.get("kvp").map(String::as_str), Some("110"));
        assert!(!out.report.metadata.contains_key("note"));

        let out = normalize_report(&json!({"findings": [], "impression": "", "recommendations": 3, "metadata": []}));
        assert!(out.report.recommendations.is_empty());
        assert!(out.notices.contains(&NormalizationNotice::MissingRecommendations));
        assert!(out.notices.contains(&NormalizationNotice::InvalidMetadata));
    }

    #[test]
    fn test_blank_location_becomes_none() {
        let out = normalize_report(&json!({"findings": [{"finding": "X", "location": "  ", "confidence": 0.5}]}));
        assert!(out.report.findings[0].location.is_none());
    }

    #[test]
    fn test_parse_fenced_text() {
        let text = "Here you go:\n```json\n{\"impression\": \"clear\"}\n```";
        let value = parse_model_text(text).unwrap();
        assert_eq!(value["impression"], "clear");

        let bare = "```\n{\"findings\": []}\n```";
        assert!(parse_model_text(bare).unwrap()["findings"].is_array());
    }

    #[test]
    fn test_model_output_failures_yield_empty_report() {
        let out = normalize_model_output(Err(UpstreamError::Timeout { duration_ms: 100 }));
        assert!(out.is_unusable());
        assert!(out.report.findings.is_empty());

        let out = normalize_model_output(Ok(ModelOutput::Text("I cannot help with that.".to_string())));
        assert!(out.is_unusable());

        let out = normalize_model_output(Ok(ModelOutput::Text(String::new())));
        assert!(out.is_unusable());
    }

    #[test]
    fn test_model_output_json_passthrough() {
        let out = normalize_model_output(Ok(ModelOutput::Json(json!({
            "findings": [{"finding": "Pneumothorax", "confidence": 0.7}],
            "impression": "Small pneumothorax",
            "recommendations": []
        }))));
        assert!(!out.is_unusable());
        assert_eq!(out.report.findings.len(), 1);
    }
}
