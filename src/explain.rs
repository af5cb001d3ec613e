//! Explanation builder.
//!
//! Derives a finding -> evidence -> confidence explanation from the fields a
//! finding already carries. Nothing here calls out or learns; the same report
//! always yields the same explanations.

use serde::{Deserialize, Serialize};

use crate::confidence::{round2, ConfidenceLevel};
use crate::report::{Finding, Report};

/// Radiological phrases surfaced as key evidence when present in the text.
const KEY_PHRASES: &[&str] = &[
    "increased",
    "decreased",
    "enlarged",
    "opacity",
    "effusion",
    "consolidation",
    "atelectasis",
    "pneumothorax",
    "edema",
    "cardiomegaly",
    "blunting",
    "collapse",
    "device",
];

const MAX_KEY_EVIDENCE: usize = 5;
const REASONING_EXCERPT_CHARS: usize = 100;

/// One link in an evidence chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// `location`, `evidence` or `confidence`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable text.
    pub description: String,
}

impl EvidenceItem {
    fn new(kind: &str, description: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            description: description.into(),
        }
    }
}

/// Explanation of one finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    /// Discretized tier.
    pub confidence_level: ConfidenceLevel,
    /// Raw score.
    pub confidence_score: f64,
    /// Ordered justification items.
    pub evidence_chain: Vec<EvidenceItem>,
    /// One-sentence rationale.
    #[serde(default)]
    pub reasoning: Option<String>,
    /// Key radiological phrases found in the evidence text.
    #[serde(default)]
    pub key_evidence: Vec<String>,
}

/// Condensed view of a finding for the summary block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFinding {
    /// Label.
    pub finding: String,
    /// Score.
    pub confidence: f64,
    /// Location, when known.
    pub location: Option<String>,
}

/// Report-level summary of all explanations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationSummary {
    /// Number of findings.
    pub total_findings: usize,
    /// Findings with confidence >= 0.7.
    pub high_confidence_findings: usize,
    /// Mean confidence, two decimals; 0.0 without findings.
    pub average_confidence: f64,
    /// Tier of the mean confidence.
    pub overall_reliability: ConfidenceLevel,
    /// Up to three findings, highest confidence first.
    pub key_findings: Vec<KeyFinding>,
}

/// Builds one explanation per finding plus the summary block.
#[must_use]
pub fn build_explanations(report: &Report) -> (Vec<Explanation>, ExplanationSummary) {
    let explanations = report.findings.iter().map(explain_finding).collect();
    (explanations, summarize(&report.findings))
}

/// Explains a single finding.
#[must_use]
pub fn explain_finding(finding: &Finding) -> Explanation {
    let score = finding.confidence.value();
    let level = finding.confidence.level();

    Explanation {
        confidence_level: level,
        confidence_score: score,
        evidence_chain: evidence_chain(finding),
        reasoning: Some(reasoning(finding, level)),
        key_evidence: key_evidence(&finding.evidence),
    }
}

// Entries are independent: blank evidence text only drops the `evidence` entry.
fn evidence_chain(finding: &Finding) -> Vec<EvidenceItem> {
    let mut chain = Vec::with_capacity(3);
    if let Some(location) = &finding.location {
        chain.push(EvidenceItem::new(
            "location",
            format!("Finding located in: {location}"),
        ));
    }
    let evidence = finding.evidence.trim();
    if !evidence.is_empty() {
        chain.push(EvidenceItem::new("evidence", evidence));
    }
    chain.push(EvidenceItem::new(
        "confidence",
        format!(
            "{} confidence ({}) assigned by the model",
            capitalize(finding.confidence.level().as_str()),
            finding.confidence
        ),
    ));
    chain
}

fn reasoning(finding: &Finding, level: ConfidenceLevel) -> String {
    let mut parts = vec![format!("The model identified '{}'", finding.finding)];
    if let Some(location) = &finding.location {
        parts.push(format!("in the {location}"));
    }
    if let Some(severity) = &finding.severity {
        parts.push(format!("with {severity} severity"));
    }
    parts.push(format!("based on {level} confidence ({})", finding.confidence));

    let evidence = finding.evidence.trim();
    if !evidence.is_empty() {
        let excerpt: String = evidence.chars().take(REASONING_EXCERPT_CHARS).collect();
        if excerpt.len() < evidence.len() {
            parts.push(format!("supported by: {excerpt}..."));
        } else {
            parts.push(format!("supported by: {excerpt}"));
        }
    }
    parts.join(" ")
}

fn key_evidence(evidence: &str) -> Vec<String> {
    let lower = evidence.to_lowercase();
    KEY_PHRASES
        .iter()
        .filter(|phrase| lower.contains(*phrase))
        .take(MAX_KEY_EVIDENCE)
        .map(|phrase| (*phrase).to_string())
        .collect()
}

fn summarize(findings: &[Finding]) -> ExplanationSummary {
    let total = findings.len();
    let high = findings
        .iter()
        .filter(|f| f.confidence.level() == ConfidenceLevel::High)
        .count();

    #[allow(clippy::cast_precision_loss)]
    let average = if total == 0 {
        0.0
    } else {
        findings.iter().map(|f| f.confidence.value()).sum::<f64>() / total as f64
    };

    let mut ranked: Vec<&Finding> = findings.iter().collect();
    ranked.sort_by(|a, b| b.confidence.value().total_cmp(&a.confidence.value()));

    ExplanationSummary {
        total_findings: total,
        high_confidence_findings: high,
        average_confidence: round2(average),
        overall_reliability: ConfidenceLevel::from_score(average),
        key_findings: ranked
            .into_iter()
            .take(3)
            .map(|f| KeyFinding {
                finding: f.finding.clone(),
                confidence: f.confidence.value(),
                location: f.location.clone(),
            })
            .collect(),
    }
}

/// Renders an explanation for display.
#[must_use]
pub fn format_explanation(explanation: &Explanation) -> String {
    let mut lines = vec![
        format!(
            "Confidence Level: {}",
            explanation.confidence_level.as_str().to_uppercase()
        ),
        format!("Confidence Score: {:.1}%", explanation.confidence_score * 100.0),
        String::new(),
        "Evidence Chain:".to_string(),
    ];
    for (i, item) in explanation.evidence_chain.iter().enumerate() {
        lines.push(format!(
            "  {}. [{}] {}",
            i + 1,
            item.kind.to_uppercase(),
            item.description
        ));
    }
    if let Some(reasoning) = &explanation.reasoning {
        lines.push(String::new());
        lines.push(format!("Reasoning: {reasoning}"));
    }
    if !explanation.key_evidence.is_empty() {
        lines.push(String::new());
        lines.push(format!(
            "Key Evidence Terms: {}",
            explanation.key_evidence.join(", ")
        ));
    }
    lines.join("\n")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
