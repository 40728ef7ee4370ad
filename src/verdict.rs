//! Normalized results produced by every engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Message used whenever no strategy is registered for a category
pub const NOT_SUPPORTED_MESSAGE: &str = "Challenge not supported yet.";

/// Confidence reported alongside "not supported" verdicts
pub const NOT_SUPPORTED_CONFIDENCE: f64 = 0.1;

/// One class label with its model-assigned probability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelScore {
    pub label: String,
    pub probability: f32,
}

impl LabelScore {
    #[must_use]
    pub fn new(label: impl Into<String>, probability: f32) -> Self {
        Self {
            label: label.into(),
            probability,
        }
    }

    /// Probability rendered as a percentage with two decimals
    #[must_use]
    pub fn percent(&self) -> String {
        format!("{:.2}%", self.probability * 100.0)
    }
}

/// Universal verification output.
///
/// `confidence` always reflects the leading label score or the extractor's
/// self-reported certainty; `success` is the policy decision on top of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub success: bool,
    pub confidence: f64,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl Verdict {
    /// Create a verdict, clamping confidence into [0, 1]
    #[must_use]
    pub fn new(success: bool, confidence: f64, message: impl Into<String>) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            success,
            confidence,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn pass(confidence: f64, message: impl Into<String>) -> Self {
        Self::new(true, confidence, message)
    }

    #[must_use]
    pub fn fail(confidence: f64, message: impl Into<String>) -> Self {
        Self::new(false, confidence, message)
    }

    /// Stub returned when no strategy is registered for a category
    #[must_use]
    pub fn not_supported() -> Self {
        Self::fail(NOT_SUPPORTED_CONFIDENCE, NOT_SUPPORTED_MESSAGE)
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details.get(key).map(String::as_str)
    }
}

/// Outcome of a structural export check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormatCheckResult {
    pub valid: bool,
    pub message: String,
}

impl FormatCheckResult {
    #[must_use]
    pub fn valid(message: impl Into<String>) -> Self {
        Self {
            valid: true,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}
