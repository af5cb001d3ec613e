//! Confidence scores and their discretized tiers.
//!
//! A finding's confidence is always inside [0.0, 1.0]. Rather than rejecting
//! out-of-range values (the model, a user edit, or a mined adjustment can all
//! produce them), every constructor clamps, and deserialization goes through
//! the same path so a hand-edited log cannot smuggle in a value of 1.7.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A clamped confidence score.
///
/// # Examples
///
/// ```
/// use radlearn::Confidence;
///
/// assert_eq!(Confidence::new(1.4).value(), 1.0);
/// assert_eq!(Confidence::new(-0.2).value(), 0.0);
/// assert_eq!(Confidence::new(f64::NAN), Confidence::DEFAULT);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Confidence(f64);

impl Confidence {
    /// Minimum valid confidence value.
    pub const MIN_VALUE: f64 = 0.0;

    /// Maximum valid confidence value.
    pub const MAX_VALUE: f64 = 1.0;

    /// Used when the model omits a score or sends something non-numeric.
    pub const DEFAULT: Self = Self(0.5);

    /// Creates a confidence, clamping into [0.0, 1.0]. NaN maps to [`Self::DEFAULT`].
    #[must_use]
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::DEFAULT;
        }
        Self(value.clamp(Self::MIN_VALUE, Self::MAX_VALUE))
    }

    /// Returns true if `value` would be changed by [`Self::new`].
    #[must_use]
    pub fn needs_clamp(value: f64) -> bool {
        value.is_nan() || !(Self::MIN_VALUE..=Self::MAX_VALUE).contains(&value)
    }

    /// Returns the raw score.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }

    /// Shifts the score by `delta`, clamping the result.
    #[must_use]
    pub fn shifted(self, delta: f64) -> Self {
        Self::new(round2(self.0 + delta))
    }

    /// Discretized tier of this score.
    #[must_use]
    pub fn level(self) -> ConfidenceLevel {
        ConfidenceLevel::from_score(self.0)
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<f64> for Confidence {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<Confidence> for f64 {
    fn from(value: Confidence) -> Self {
        value.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}%", self.0 * 100.0)
    }
}

/// Discretized confidence tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    /// Score >= 0.7.
    High,
    /// 0.4 <= score < 0.7.
    Medium,
    /// Score < 0.4.
    Low,
}

impl ConfidenceLevel {
    /// Lower bound of the high tier.
    pub const HIGH_THRESHOLD: f64 = 0.7;

    /// Lower bound of the medium tier.
    pub const MEDIUM_THRESHOLD: f64 = 0.4;

    /// Maps a score to its tier.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= Self::HIGH_THRESHOLD {
            Self::High
        } else if score >= Self::MEDIUM_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Lowercase name, as serialized.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rounds to two decimal places.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Rounds to one decimal place; used to bucket confidence deltas.
pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
