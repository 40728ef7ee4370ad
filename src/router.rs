//! Single entry point for proof verification.
//!
//! Maps a category tag to the engine that can judge it and returns a
//! normalized [`Verdict`]. Unknown tags never error; they produce the
//! not-supported verdict.

use crate::artifact::Artifact;
use crate::cache::ModelCache;
use crate::category::{ChallengeCategory, EngineKind};
use crate::classify::ClassificationEngine;
use crate::config::{ConfigError, VerifierConfig};
use crate::error::VerifyError;
use crate::extract::ExtractionEngine;
use crate::verdict::Verdict;
use std::sync::Arc;

/// Registration state of one category, for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryStatus {
    pub category: ChallengeCategory,
    pub engine: EngineKind,
    pub registered: bool,
}

/// Dispatches submissions to the classification or extraction engine
#[derive(Debug)]
pub struct VerificationRouter {
    classification: ClassificationEngine,
    extraction: ExtractionEngine,
}

impl VerificationRouter {
    /// Wire both engines from configuration with a filesystem model cache
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration routes a category to the wrong
    /// engine or carries an out-of-range threshold.
    pub fn from_config(config: &VerifierConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let cache = Arc::new(ModelCache::filesystem());
        let classification = ClassificationEngine::from_settings(cache, &config.classification)?;
        let extraction = ExtractionEngine::from_settings(&config.extraction)?;

        tracing::debug!(
            classifiers = config.classification.categories.len(),
            extractors = config.extraction.document_types.len(),
            "Verification router ready"
        );
        Ok(Self::with_parts(classification, extraction))
    }

    /// Router over pre-built engines
    #[must_use]
    pub const fn with_parts(
        classification: ClassificationEngine,
        extraction: ExtractionEngine,
    ) -> Self {
        Self {
            classification,
            extraction,
        }
    }

    #[must_use]
    pub const fn classification(&self) -> &ClassificationEngine {
        &self.classification
    }

    #[must_use]
    pub const fn extraction(&self) -> &ExtractionEngine {
        &self.extraction
    }

    /// Whether a strategy is registered for the category
    #[must_use]
    pub fn is_registered(&self, category: ChallengeCategory) -> bool {
        match category.engine() {
            EngineKind::Classification => self.classification.is_registered(category),
            EngineKind::Extraction => self.extraction.is_registered(category),
        }
    }

    /// Every known category with its engine and registration state
    #[must_use]
    pub fn categories(&self) -> Vec<CategoryStatus> {
        ChallengeCategory::ALL
            .iter()
            .map(|&category| CategoryStatus {
                category,
                engine: category.engine(),
                registered: self.is_registered(category),
            })
            .collect()
    }

    /// Verify an artifact for a category tag.
    ///
    /// # Errors
    ///
    /// Returns `ModelUnavailable` when the category's model cannot be loaded.
    /// All other problems are reported as failed verdicts.
    pub async fn verify(&self, category: &str, artifact: &Artifact) -> Result<Verdict, VerifyError> {
        let category: ChallengeCategory = match category.parse() {
            Ok(category) => category,
            Err(e) => {
                tracing::info!(error = %e, "Rejecting submission");
                return Ok(Verdict::not_supported());
            }
        };

        tracing::debug!(
            %category,
            engine = %category.engine(),
            bytes = artifact.len(),
            kind = artifact.kind().as_str(),
            "Dispatching submission"
        );

        match category.engine() {
            EngineKind::Classification => self.classification.classify(category, artifact).await,
            EngineKind::Extraction => Ok(self.extraction.extract(category, artifact).await),
        }
    }
}
