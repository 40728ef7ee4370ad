//! Image classification against per-category acceptance rules.

use crate::artifact::Artifact;
use crate::cache::ModelCache;
use crate::category::{ChallengeCategory, EngineKind};
use crate::config::{
    check_model_specs, expect_engine, ClassificationSettings, ClassifierRule, ConfigError,
};
use crate::error::VerifyError;
use crate::inference::LoadedModel;
use crate::preprocess::ImagePreprocessor;
use crate::verdict::{LabelScore, Verdict};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Pair probabilities positionally with labels and rank them.
///
/// Extra outputs beyond the label set are ignored; labels without an output
/// score 0. Ties keep label declaration order.
#[must_use]
pub fn rank_labels(labels: &[String], probabilities: &[f32]) -> Vec<LabelScore> {
    let mut scores: Vec<LabelScore> = labels
        .iter()
        .enumerate()
        .map(|(i, label)| LabelScore::new(label.clone(), probabilities.get(i).copied().unwrap_or(0.0)))
        .collect();
    // Stable sort keeps declaration order among equal probabilities
    scores.sort_by(|a, b| b.probability.total_cmp(&a.probability));
    scores
}

/// Whether a label names the category's positive class
#[must_use]
pub fn matches_positive(label: &str, positive: &str) -> bool {
    let label = label.trim().to_lowercase();
    let positive = positive.trim().to_lowercase();
    !positive.is_empty() && (label == positive || label.contains(&positive))
}

/// Scores photos with cached models and applies the category's rule
#[derive(Debug)]
pub struct ClassificationEngine {
    cache: Arc<ModelCache>,
    rules: BTreeMap<ChallengeCategory, ClassifierRule>,
    threshold: f32,
}

impl ClassificationEngine {
    /// Engine with no registered categories
    #[must_use]
    pub const fn new(cache: Arc<ModelCache>, threshold: f32) -> Self {
        Self {
            cache,
            rules: BTreeMap::new(),
            threshold,
        }
    }

    /// Engine with every category from the settings registered
    ///
    /// # Errors
    ///
    /// Returns `WrongEngine` if a settings entry names a document category.
    pub fn from_settings(
        cache: Arc<ModelCache>,
        settings: &ClassificationSettings,
    ) -> Result<Self, ConfigError> {
        let mut engine = Self::new(cache, settings.threshold);
        for (category, rule) in &settings.categories {
            engine.register(*category, rule.clone())?;
        }
        Ok(engine)
    }

    /// Register the model and positive label for a category
    ///
    /// # Errors
    ///
    /// Returns `WrongEngine` if the category is judged by extraction,
    /// `ConflictingModel` if another category already uses the model id with
    /// different settings, and `InvalidInputSize` for an out-of-range size.
    pub fn register(
        &mut self,
        category: ChallengeCategory,
        rule: ClassifierRule,
    ) -> Result<(), ConfigError> {
        debug_assert_eq!(
            category.engine(),
            EngineKind::Classification,
            "{category} registered with the classification engine"
        );
        expect_engine(category, EngineKind::Classification)?;
        check_model_specs(
            self.rules
                .iter()
                .filter(|(registered, _)| **registered != category)
                .map(|(_, existing)| &existing.model)
                .chain(std::iter::once(&rule.model)),
        )?;
        self.rules.insert(category, rule);
        Ok(())
    }

    #[must_use]
    pub fn is_registered(&self, category: ChallengeCategory) -> bool {
        self.rules.contains_key(&category)
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// Classify a photo for a category.
    ///
    /// Unregistered categories get the "not supported" verdict. Decode and
    /// inference failures become failed verdicts.
    ///
    /// # Errors
    ///
    /// Returns `ModelUnavailable` if the category's model cannot be loaded.
    pub async fn classify(
        &self,
        category: ChallengeCategory,
        artifact: &Artifact,
    ) -> Result<Verdict, VerifyError> {
        let Some(rule) = self.rules.get(&category) else {
            tracing::debug!(%category, "No classifier registered");
            return Ok(Verdict::not_supported());
        };

        let model = self.cache.get_model(&rule.model).await?;
        let threshold = rule.threshold.unwrap_or(self.threshold);

        let verdict = match Self::score(&model, artifact) {
            Ok(scores) => Self::judge(&scores, &rule.positive_label, threshold),
            Err(VerifyError::Decode(cause)) => {
                Verdict::fail(0.0, format!("Unable to read image: {cause}"))
            }
            Err(e) => Verdict::fail(0.0, e.to_string()),
        };

        tracing::info!(
            %category,
            model_id = model.id(),
            success = verdict.success,
            confidence = verdict.confidence,
            label = %verdict.message,
            "Classification verdict"
        );
        Ok(verdict)
    }

    fn score(model: &LoadedModel, artifact: &Artifact) -> Result<Vec<LabelScore>, VerifyError> {
        let tensor = ImagePreprocessor::square(model.input_size()).prepare(artifact.bytes())?;
        let probabilities = model.infer(&tensor)?;
        if probabilities.is_empty() {
            return Err(VerifyError::Inference("model produced no scores".into()));
        }
        Ok(rank_labels(model.labels(), &probabilities))
    }

    /// Apply the two-part acceptance rule to ranked scores
    #[must_use]
    pub fn judge(scores: &[LabelScore], positive_label: &str, threshold: f32) -> Verdict {
        let Some(leading) = scores.first() else {
            return Verdict::fail(0.0, "Inference failed: no labels");
        };

        let accepted =
            matches_positive(&leading.label, positive_label) && leading.probability > threshold;

        let mut verdict = Verdict::new(accepted, f64::from(leading.probability), leading.label.clone());
        for score in scores {
            verdict = verdict.with_detail(score.label.clone(), score.percent());
        }
        verdict
    }
}
