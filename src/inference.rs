//! Model loading and inference for image classification.
//!
//! Two weight formats are understood:
//! 1. `.json` linear probe (always available) - per-label weights over the
//!    pooled RGB channel means, softmax output
//! 2. `.onnx` (requires the `onnx` feature) - executed with tract
//!
//! ## Example
//!
//! ```rust,ignore
//! use proofcheck::inference::load_network;
//!
//! let network = load_network("models/plastic-free/model.json".as_ref(), None)?;
//! let probabilities = network.classifier.forward(&tensor)?;
//! ```

use crate::error::VerifyError;
use crate::preprocess::{Tensor, DEFAULT_INPUT_SIZE, MAX_INPUT_SIZE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::Path;

/// Labels used when a model ships without a usable label manifest
pub const FALLBACK_LABELS: [&str; 2] = ["negative", "positive"];

/// A forward pass over a preprocessed image batch
pub trait ImageClassifier: Send + Sync {
    /// Square input resolution the network expects
    fn input_size(&self) -> u32;

    /// Run one forward pass and return per-class probabilities
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::Inference` if the tensor does not fit the network.
    fn forward(&self, input: &Tensor) -> Result<Vec<f32>, VerifyError>;
}

/// Detected model weight format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFormat {
    /// JSON linear probe over pooled channel means
    LinearProbe,
    /// ONNX graph
    Onnx,
    /// Unknown format
    Unknown,
}

impl ModelFormat {
    /// Get format from file extension
    #[must_use]
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        match path
            .as_ref()
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .as_deref()
        {
            Some("json") => Self::LinearProbe,
            Some("onnx") => Self::Onnx,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LinearProbe => "linear_probe",
            Self::Onnx => "onnx",
            Self::Unknown => "unknown",
        }
    }
}

/// Model metadata recorded at load time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelMetadata {
    /// Model identifier (cache key)
    pub id: String,
    /// Weight format
    pub format: ModelFormat,
    /// SHA256 of the weight file, when loaded from disk
    pub sha256: Option<String>,
    /// Square input resolution
    pub input_size: u32,
    /// Whether the hard-coded fallback labels are in use
    pub fallback_labels: bool,
}

/// Network produced by a model source, before labels are attached
pub struct LoadedNetwork {
    pub classifier: Box<dyn ImageClassifier>,
    pub format: ModelFormat,
    pub sha256: Option<String>,
}

impl std::fmt::Debug for LoadedNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedNetwork")
            .field("format", &self.format)
            .field("sha256", &self.sha256)
            .field("input_size", &self.classifier.input_size())
            .finish_non_exhaustive()
    }
}

/// A loaded model with its label set, shared read-only across requests
pub struct LoadedModel {
    pub metadata: ModelMetadata,
    labels: Vec<String>,
    classifier: Box<dyn ImageClassifier>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("metadata", &self.metadata)
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}

impl LoadedModel {
    /// Attach labels to a network.
    ///
    /// An empty label list switches to [`FALLBACK_LABELS`].
    #[must_use]
    pub fn new(id: impl Into<String>, network: LoadedNetwork, labels: Vec<String>) -> Self {
        let fallback_labels = labels.is_empty();
        let labels = if fallback_labels {
            FALLBACK_LABELS.iter().map(ToString::to_string).collect()
        } else {
            labels
        };

        Self {
            metadata: ModelMetadata {
                id: id.into(),
                format: network.format,
                sha256: network.sha256,
                input_size: network.classifier.input_size(),
                fallback_labels,
            },
            labels,
            classifier: network.classifier,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    #[must_use]
    pub fn input_size(&self) -> u32 {
        self.metadata.input_size
    }

    /// Run one forward pass
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::Inference` if the network rejects the input.
    pub fn infer(&self, input: &Tensor) -> Result<Vec<f32>, VerifyError> {
        self.classifier.forward(input)
    }
}

/// Linear classifier over the mean of each RGB channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinearProbe {
    /// Square input resolution
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    /// One `[r, g, b]` weight row per label
    pub weights: Vec<[f32; 3]>,
    /// One bias per label
    pub bias: Vec<f32>,
}

const fn default_input_size() -> u32 {
    DEFAULT_INPUT_SIZE
}

impl LinearProbe {
    /// Parse and check a linear probe from JSON
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::Inference` on malformed JSON, an out-of-range
    /// input size, or mismatched weight/bias lengths.
    pub fn from_json(json: &str) -> Result<Self, VerifyError> {
        let probe: Self =
            serde_json::from_str(json).map_err(|e| VerifyError::Inference(e.to_string()))?;
        if probe.weights.is_empty() {
            return Err(VerifyError::Inference("linear probe has no classes".into()));
        }
        if probe.input_size == 0 || probe.input_size > MAX_INPUT_SIZE {
            return Err(VerifyError::Inference(format!(
                "model input size {} outside 1..={MAX_INPUT_SIZE}",
                probe.input_size
            )));
        }
        if probe.weights.len() != probe.bias.len() {
            return Err(VerifyError::Inference(format!(
                "linear probe has {} weight rows but {} biases",
                probe.weights.len(),
                probe.bias.len()
            )));
        }
        Ok(probe)
    }
}

impl ImageClassifier for LinearProbe {
    fn input_size(&self) -> u32 {
        self.input_size
    }

    #[allow(clippy::cast_precision_loss)]
    fn forward(&self, input: &Tensor) -> Result<Vec<f32>, VerifyError> {
        let shape = input.shape();
        if shape[0] != 1 || shape[3] != 3 {
            return Err(VerifyError::Inference(format!(
                "expected [1, h, w, 3] input, got {shape:?}"
            )));
        }

        let pixels = (shape[1] * shape[2]).max(1) as f32;
        let mut means = [0.0f32; 3];
        for (channel, mean) in means.iter_mut().enumerate() {
            *mean = input.index_axis(ndarray::Axis(3), channel).sum() / pixels;
        }

        let logits: Vec<f32> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| w[0].mul_add(means[0], w[1].mul_add(means[1], w[2] * means[2])) + b)
            .collect();

        Ok(softmax(&logits))
    }
}

/// Convert logits to probabilities
#[must_use]
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    if sum > 0.0 {
        exp.into_iter().map(|x| x / sum).collect()
    } else {
        exp
    }
}

/// Compute SHA256 checksum of a file
///
/// # Errors
///
/// Returns IO error if file cannot be read
pub fn compute_sha256(path: &Path) -> std::io::Result<String> {
    use sha2::{Digest, Sha256};

    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Load model weights from disk. Blocking.
///
/// # Errors
///
/// Returns `VerifyError::Inference` if the file is missing, corrupt, or in an
/// unsupported format. Callers map this to `ModelUnavailable`.
pub fn load_network(path: &Path, input_size: Option<u32>) -> Result<LoadedNetwork, VerifyError> {
    let format = ModelFormat::from_path(path);
    let sha256 = compute_sha256(path)
        .map_err(|e| VerifyError::Inference(format!("{}: {e}", path.display())))?;

    let classifier: Box<dyn ImageClassifier> = match format {
        ModelFormat::LinearProbe => {
            let json = fs::read_to_string(path)
                .map_err(|e| VerifyError::Inference(format!("{}: {e}", path.display())))?;
            let mut probe = LinearProbe::from_json(&json)?;
            if let Some(size) = input_size {
                probe.input_size = size;
            }
            Box::new(probe)
        }
        #[cfg(feature = "onnx")]
        ModelFormat::Onnx => Box::new(onnx::OnnxClassifier::load(
            path,
            input_size.unwrap_or(DEFAULT_INPUT_SIZE),
        )?),
        #[cfg(not(feature = "onnx"))]
        ModelFormat::Onnx => {
            return Err(VerifyError::Inference(
                "onnx models require the `onnx` feature".to_string(),
            ))
        }
        ModelFormat::Unknown => {
            return Err(VerifyError::Inference(format!(
                "unsupported model format: {}",
                path.display()
            )))
        }
    };

    tracing::debug!(
        path = %path.display(),
        format = format.as_str(),
        sha256 = %sha256,
        input_size = classifier.input_size(),
        "Loaded model weights"
    );

    Ok(LoadedNetwork {
        classifier,
        format,
        sha256: Some(sha256),
    })
}

#[cfg(feature = "onnx")]
mod onnx {
    use super::{ImageClassifier, Tensor, VerifyError};
    use std::path::Path;
    use tract_onnx::prelude::*;

    type Plan = TypedRunnableModel<TypedModel>;

    /// ONNX graph executed by tract, input fixed to `[1, size, size, 3]`
    pub struct OnnxClassifier {
        plan: Plan,
        input_size: u32,
    }

    impl OnnxClassifier {
        pub fn load(path: &Path, input_size: u32) -> Result<Self, VerifyError> {
            let side = input_size as usize;
            let plan = tract_onnx::onnx()
                .model_for_path(path)
                .and_then(|m| {
                    m.with_input_fact(0, f32::fact([1, side, side, 3]).into())
                })
                .and_then(InferenceModelExt::into_optimized)
                .and_then(TypedModel::into_runnable)
                .map_err(|e| VerifyError::Inference(format!("{}: {e}", path.display())))?;
            Ok(Self { plan, input_size })
        }
    }

    impl ImageClassifier for OnnxClassifier {
        fn input_size(&self) -> u32 {
            self.input_size
        }

        fn forward(&self, input: &Tensor) -> Result<Vec<f32>, VerifyError> {
            let data = input
                .as_slice()
                .ok_or_else(|| VerifyError::Inference("input tensor is not contiguous".into()))?;
            let tensor = tract_onnx::prelude::Tensor::from_shape(input.shape(), data)
                .map_err(|e| VerifyError::Inference(e.to_string()))?;
            let outputs = self
                .plan
                .run(tvec!(tensor.into()))
                .map_err(|e| VerifyError::Inference(e.to_string()))?;
            let first = outputs
                .first()
                .ok_or_else(|| VerifyError::Inference("model produced no outputs".into()))?;
            let view = first
                .to_array_view::<f32>()
                .map_err(|e| VerifyError::Inference(e.to_string()))?;
            Ok(view.iter().copied().collect())
        }
    }
}
