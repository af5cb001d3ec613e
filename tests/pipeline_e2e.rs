//! End-to-end pipeline tests over the in-memory log.
//!
//! Covers generation from raw model output, the feedback round trip, and the
//! way learned rules feed back into the next report.

use std::sync::Arc;

use serde_json::json;

use radlearn::{
    ConfidenceLevel, ImagePayload, InMemoryFeedbackLog, ModelOutput, NormalizationNotice, Pipeline,
    PipelineOptions, SynonymTable, UpstreamError,
};

fn pipeline() -> Pipeline {
    Pipeline::new(
        Arc::new(InMemoryFeedbackLog::new()),
        Arc::new(SynonymTable::chest_xray_defaults()),
        PipelineOptions::default(),
    )
}

const MODEL_TEXT: &str = r#"Here is the report:
```json
{
  "findings": [
    {"finding": "Pleural effusion", "location": "right base", "evidence": "Blunting of the right costophrenic angle", "confidence": 0.82, "severity": "moderate"},
    {"finding": "Enlarged heart", "location": "cardiac silhouette", "evidence": "Cardiothoracic ratio above 0.5", "confidence": "0.64"},
    {"finding": "Something unusual", "confidence": 1.7}
  ],
  "impression": "Right pleural effusion and cardiomegaly.",
  "recommendations": "Follow-up radiograph",
  "metadata": {"view": "PA", "image_quality": "good"}
}
```"#;

#[test]
fn test_generate_from_fenced_text() {
    let p = pipeline();
    let model = |_: &ImagePayload| -> Result<ModelOutput, UpstreamError> {
        Ok(ModelOutput::Text(MODEL_TEXT.to_string()))
    };
    let out = p.generate(&model, &ImagePayload::jpeg("cxr-001.jpg", vec![0xff, 0xd8, 0xff]));

    let report = &out.report;
    assert_eq!(report.findings.len(), 3);
    assert_eq!(report.recommendations, vec!["Follow-up radiograph".to_string()]);
    assert_eq!(report.metadata.get("view").map(String::as_str), Some("PA"));

    // numeric string accepted, out-of-range value clamped
    assert_eq!(report.findings[1].confidence.value(), 0.64);
    assert_eq!(report.findings[2].confidence.value(), 1.0);
    assert!(out
        .notices
        .iter()
        .any(|n| matches!(n, NormalizationNotice::ClampedConfidence { index: 2, .. })));

    // synonym mapping
    assert_eq!(report.findings[0].standardized_term.as_deref(), Some("Pleural Effusion"));
    assert_eq!(report.findings[1].standardized_term.as_deref(), Some("Cardiomegaly"));
    assert_eq!(report.findings[2].standardized_term, None);
    assert_eq!(report.findings[2].term_confidence, Some(0.0));
    assert!((out.ontology_coverage - 2.0 / 3.0).abs() < 1e-9);
    assert!(!out.ontology_validation.valid);

    // explanations
    assert_eq!(out.explanations.len(), 3);
    assert_eq!(out.explanations[0].confidence_level, ConfidenceLevel::High);
    assert_eq!(out.explanations[1].confidence_level, ConfidenceLevel::Medium);
    assert_eq!(out.summary.total_findings, 3);
    assert_eq!(out.summary.key_findings[0].finding, "Something unusual");
}

#[test]
fn test_model_failures_never_escape() {
    let p = pipeline();
    let failures = [
        Err(UpstreamError::Refusal {
            reason: "cannot help with that".to_string(),
        }),
        Err(UpstreamError::Transport {
            message: "connection reset".to_string(),
        }),
        Ok(ModelOutput::Text("I'm sorry, I can't analyze this image.".to_string())),
        Ok(ModelOutput::Json(json!([1, 2, 3]))),
        Ok(ModelOutput::Json(json!(null))),
    ];
    for output in failures {
        let out = p.process(output);
        assert!(out.report.findings.is_empty());
        assert!(!out.notices.is_empty());
        assert!(out.explanations.is_empty());
        assert_eq!(out.ontology_coverage, 0.0);
    }
}

#[test]
fn test_rename_rule_is_remapped() {
    let p = pipeline();
    let raw = json!({
        "findings": [{"finding": "Patchy airspace change", "evidence": "Patchy right lower zone change", "confidence": 0.7}],
        "impression": "Patchy change.",
        "recommendations": [],
    });

    let shown = p.process_value(&raw).report;
    assert_eq!(shown.findings[0].standardized_term, None);

    let mut edited = shown.clone();
    edited.findings[0].finding = "Consolidation".to_string();
    for image in ["a.png", "b.png"] {
        p.save_feedback(&shown, Some(&edited), None, image).unwrap();
    }

    let out = p.process_value(&raw);
    assert!(out.is_automated());
    assert_eq!(out.report.findings[0].finding, "Consolidation");
    assert_eq!(out.report.findings[0].standardized_term.as_deref(), Some("Consolidation"));
    assert_eq!(out.ontology_coverage, 1.0);
}

#[test]
fn test_saved_explanations_round_trip() {
    let p = pipeline();
    let raw = json!({
        "findings": [{"finding": "Edema", "evidence": "Bilateral perihilar haziness", "confidence": 0.55}],
        "impression": "Mild edema.",
        "recommendations": ["Clinical correlation"],
    });
    let shown = p.process_value(&raw);
    let mut edited = shown.report.clone();
    edited.impression = "Moderate pulmonary edema.".to_string();

    let edit_count = p
        .save_feedback(&shown.report, Some(&edited), Some(shown.explanations.as_slice()), "c.png")
        .unwrap();
    assert_eq!(edit_count, 1);

    let entries = p.logger().entries_or_empty();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].explanations.as_deref(), Some(shown.explanations.as_slice()));
    assert_eq!(p.analytics().summary.total_edits, 1);
}
