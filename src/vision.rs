//! Vision-model capability.
//!
//! The model client (HTTP, retries, API keys) lives outside this crate. The
//! pipeline only needs something that turns an image into raw output or an
//! [`UpstreamError`], so any closure with the right signature is a model.

use serde_json::Value;

use crate::error::UpstreamError;

/// Instruction sent alongside the image; describes the JSON shape the
/// normalizer expects back.
pub const REPORT_SCHEMA_PROMPT: &str = r#"You are a senior radiologist. Analyze the chest X-ray image and generate a structured JSON report.

The report must follow this exact JSON schema:
{
  "findings": [
    {
      "finding": "string (e.g., 'Cardiomegaly', 'Pleural Effusion')",
      "location": "string (e.g., 'right lower lobe', 'bilateral')",
      "evidence": "string (detailed description of visual evidence)",
      "confidence": float (0.0 to 1.0, where 1.0 is highest confidence),
      "severity": "string (e.g., 'mild', 'moderate', 'severe')"
    }
  ],
  "impression": "string (overall clinical interpretation)",
  "recommendations": ["string"],
  "metadata": {
    "image_quality": "string (e.g., 'adequate', 'suboptimal')",
    "view": "string (e.g., 'PA', 'AP', 'lateral')",
    "technique": "string (brief description)"
  }
}

Return ONLY valid JSON, no additional text."#;

/// An uploaded image as handed over by the web layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    /// Original file name; becomes the feedback entry's `image_name`.
    pub name: String,
    /// MIME type, e.g. `image/jpeg`.
    pub media_type: String,
    /// Encoded image bytes.
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    /// Creates a JPEG payload.
    #[must_use]
    pub fn jpeg(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: "image/jpeg".to_string(),
            bytes,
        }
    }
}

/// Raw model response before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    /// Response text; may wrap the JSON in a fenced code block.
    Text(String),
    /// Already-parsed JSON.
    Json(Value),
}

/// Vision-model interface.
pub trait VisionModel: Send + Sync {
    /// Model name (for logging).
    fn name(&self) -> &str;

    /// Produces a report for one image.
    ///
    /// # Errors
    /// Any [`UpstreamError`]; the pipeline turns it into an empty report.
    fn generate(&self, image: &ImagePayload) -> Result<ModelOutput, UpstreamError>;
}

impl<F> VisionModel for F
where
    F: Fn(&ImagePayload) -> Result<ModelOutput, UpstreamError> + Send + Sync,
{
    fn name(&self) -> &str {
        "closure"
    }

    fn generate(&self, image: &ImagePayload) -> Result<ModelOutput, UpstreamError> {
        self(image)
    }
}
