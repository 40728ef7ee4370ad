//! Error taxonomy shared by the verification engines.
//!
//! Only [`VerifyError::ModelUnavailable`] ever reaches a caller of
//! [`crate::VerificationRouter::verify`]. Every other variant is produced
//! inside an engine and folded into a failed [`crate::Verdict`] or
//! [`crate::FormatCheckResult`] before it leaves the engine boundary.

use thiserror::Error;

/// Errors raised while verifying an artifact
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// Model weights unreachable or corrupt; retryable on a later call
    #[error("Model unavailable: {model_id}: {reason}")]
    ModelUnavailable { model_id: String, reason: String },

    /// Artifact is not a decodable image
    #[error("Decode error: {0}")]
    Decode(String),

    /// No strategy exists for the requested tag
    #[error("Unsupported category: {0}")]
    UnsupportedCategory(String),

    /// A structural validator's parse step failed
    #[error("{0}")]
    ValidationParse(String),

    /// Forward pass failed or produced unusable output
    #[error("Inference failed: {0}")]
    Inference(String),

    /// An extractor could not produce readings
    #[error("Extraction failed: {0}")]
    Extraction(String),
}

impl VerifyError {
    /// Build a `ModelUnavailable` error for the given model id
    pub fn model_unavailable(model_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::ModelUnavailable {
            model_id: model_id.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether a later call may succeed where this one failed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ModelUnavailable { .. })
    }
}

impl From<image::ImageError> for VerifyError {
    fn from(err: image::ImageError) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<csv::Error> for VerifyError {
    fn from(err: csv::Error) -> Self {
        Self::ValidationParse(err.to_string())
    }
}
