//! Configuration module for verification strategies and thresholds.
//!
//! Handles YAML loading with validation that every registered category is
//! routed to the engine that can judge it.

use crate::category::{ChallengeCategory, EngineKind};
use crate::preprocess::MAX_INPUT_SIZE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Category {category} is judged by the {expected} engine, not {actual}")]
    WrongEngine {
        category: ChallengeCategory,
        expected: EngineKind,
        actual: EngineKind,
    },

    #[error("Invalid threshold {value} for {context}: must be within (0, 1]")]
    InvalidThreshold { context: String, value: f32 },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Model {model_id} is configured with different paths or settings in more than one place")]
    ConflictingModel { model_id: String },

    #[error("Invalid input size {value} for model {model_id}: must be within 1..={max}")]
    InvalidInputSize {
        model_id: String,
        value: u32,
        max: u32,
    },
}

/// Top-level verifier configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VerifierConfig {
    #[serde(default)]
    pub classification: ClassificationSettings,
    #[serde(default)]
    pub extraction: ExtractionSettings,
    #[serde(default)]
    pub validation: ValidationSettings,
}

/// Image classification settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationSettings {
    /// Probability the leading label must strictly exceed
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Registered categories with their model and positive label
    #[serde(default)]
    pub categories: BTreeMap<ChallengeCategory, ClassifierRule>,
}

const fn default_threshold() -> f32 {
    0.8
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        let mut categories = BTreeMap::new();
        categories.insert(
            ChallengeCategory::PlasticFree,
            ClassifierRule {
                positive_label: "plastic-free".to_string(),
                threshold: None,
                model: ModelSpec::new("plastic-free", "models/plastic-free/model.json"),
            },
        );
        Self {
            threshold: default_threshold(),
            categories,
        }
    }
}

/// Acceptance rule for one image category
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifierRule {
    /// Label (or label fragment) that counts as a positive match
    pub positive_label: String,
    /// Per-category threshold override
    #[serde(default)]
    pub threshold: Option<f32>,
    /// Model used to score photos for this category
    pub model: ModelSpec,
}

/// Location of a loadable classification model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ModelSpec {
    /// Stable model identity; the cache key
    pub id: String,
    /// Model weights (`.json` linear probe or `.onnx`)
    pub path: PathBuf,
    /// Label manifest; defaults to `labels.json` next to the model
    #[serde(default)]
    pub labels_path: Option<PathBuf>,
    /// Square input resolution override
    #[serde(default)]
    pub input_size: Option<u32>,
}

impl ModelSpec {
    #[must_use]
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            labels_path: None,
            input_size: None,
        }
    }

    /// Resolved label manifest location
    #[must_use]
    pub fn labels_location(&self) -> PathBuf {
        self.labels_path.clone().unwrap_or_else(|| {
            self.path
                .parent()
                .map_or_else(|| PathBuf::from("labels.json"), |dir| dir.join("labels.json"))
        })
    }
}

/// Document extraction settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionSettings {
    /// Document types wired to the heuristic text extractor
    #[serde(default = "default_document_types")]
    pub document_types: Vec<ChallengeCategory>,
}

fn default_document_types() -> Vec<ChallengeCategory> {
    vec![ChallengeCategory::EnergyBill, ChallengeCategory::WaterBill]
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            document_types: default_document_types(),
        }
    }
}

/// Structural export validation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationSettings {
    /// Smallest acceptable file size in bytes
    #[serde(default = "default_min_bytes")]
    pub min_bytes: u64,
    /// Smallest acceptable raster width and height in pixels
    #[serde(default = "default_min_dimension")]
    pub min_dimension: u32,
    /// Columns every tabular export must carry
    #[serde(default = "default_required_columns")]
    pub required_columns: Vec<String>,
    /// Substrings every certificate document must contain
    #[serde(default = "default_required_keywords")]
    pub required_keywords: Vec<String>,
}

const fn default_min_bytes() -> u64 {
    10
}
const fn default_min_dimension() -> u32 {
    100
}
fn default_required_columns() -> Vec<String> {
    vec!["Rank".to_string(), "Name".to_string(), "Points".to_string()]
}
fn default_required_keywords() -> Vec<String> {
    vec!["EcoChallenge".to_string(), "Certificate".to_string()]
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            min_bytes: default_min_bytes(),
            min_dimension: default_min_dimension(),
            required_columns: default_required_columns(),
            required_keywords: default_required_keywords(),
        }
    }
}

impl VerifierConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed or fails validation.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check engine routing and thresholds
    ///
    /// # Errors
    ///
    /// Returns `WrongEngine` when a category is registered with the wrong
    /// engine and `InvalidThreshold` for thresholds outside (0, 1].
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_threshold("classification", self.classification.threshold)?;

        for (category, rule) in &self.classification.categories {
            expect_engine(*category, EngineKind::Classification)?;
            if let Some(threshold) = rule.threshold {
                check_threshold(category.as_str(), threshold)?;
            }
            if rule.model.id.trim().is_empty() {
                return Err(ConfigError::MissingField(format!("{category}.model.id")));
            }
        }
        check_model_specs(self.classification.categories.values().map(|rule| &rule.model))?;

        for document_type in &self.extraction.document_types {
            expect_engine(*document_type, EngineKind::Extraction)?;
        }

        Ok(())
    }
}

/// Reject a category registered with an engine that cannot judge it
pub(crate) fn expect_engine(
    category: ChallengeCategory,
    actual: EngineKind,
) -> Result<(), ConfigError> {
    let expected = category.engine();
    if expected == actual {
        Ok(())
    } else {
        Err(ConfigError::WrongEngine {
            category,
            expected,
            actual,
        })
    }
}

/// Reject out-of-range input sizes and one id bound to two different models.
///
/// The model cache is keyed by id, so every spec sharing an id must be equal.
pub(crate) fn check_model_specs<'a>(
    specs: impl IntoIterator<Item = &'a ModelSpec>,
) -> Result<(), ConfigError> {
    let mut seen: BTreeMap<&str, &ModelSpec> = BTreeMap::new();
    for spec in specs {
        if let Some(size) = spec.input_size {
            if size == 0 || size > MAX_INPUT_SIZE {
                return Err(ConfigError::InvalidInputSize {
                    model_id: spec.id.clone(),
                    value: size,
                    max: MAX_INPUT_SIZE,
                });
            }
        }
        if let Some(existing) = seen.insert(&spec.id, spec) {
            if existing != spec {
                return Err(ConfigError::ConflictingModel {
                    model_id: spec.id.clone(),
                });
            }
        }
    }
    Ok(())
}

fn check_threshold(context: &str, value: f32) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold {
            context: context.to_string(),
            value,
        })
    }
}
