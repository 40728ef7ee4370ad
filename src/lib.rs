//! # proofcheck
//!
//! Verification of user-submitted proof artifacts for sustainability
//! challenges: photos, utility bills and exported reports are checked against
//! per-category acceptance policies and answered with a machine-generated
//! verdict and confidence score.
//!
//! ## Engines
//!
//! - **Classification**: scores a photo with a cached model and accepts it
//!   only when the category's positive label leads with probability above the
//!   threshold (0.8 by default)
//! - **Extraction**: reads previous and current consumption from a bill and
//!   passes any positive reduction
//! - **Structural validation**: pre-flight checks for exported leaderboards,
//!   certificates and rendered images
//!
//! ## Architecture
//!
//! ```text
//! (category, artifact bytes)
//!        ↓
//! VerificationRouter ──unknown──→ "Challenge not supported yet."
//!        ↓                 ↓
//! ClassificationEngine   ExtractionEngine
//!        ↓                 ↓
//! ModelCache (single-flight)  Extractor strategy
//!        ↓                 ↓
//! ImagePreprocessor → forward pass   previous/current readings
//!        ↓                 ↓
//!            Verdict { success, confidence, message, details }
//!
//! (path, export kind) → FileStructureValidator → { valid, message }
//! ```

pub mod artifact;
pub mod cache;
pub mod category;
pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod inference;
pub mod preprocess;
pub mod router;
pub mod validate;
pub mod verdict;

pub use artifact::{Artifact, MediaKind};
pub use cache::{FsModelSource, ModelCache, ModelSource, ModelState};
pub use category::{ChallengeCategory, EngineKind};
pub use classify::{matches_positive, rank_labels, ClassificationEngine};
pub use config::{
    ClassificationSettings, ClassifierRule, ConfigError, ExtractionSettings, ModelSpec,
    ValidationSettings, VerifierConfig,
};
pub use error::VerifyError;
pub use extract::{
    judge_reading, read_document_text, ExtractionEngine, Extractor, FakeExtractor,
    HeuristicTextExtractor, Reading,
};
pub use inference::{
    ImageClassifier, LinearProbe, LoadedModel, LoadedNetwork, ModelFormat, ModelMetadata,
    FALLBACK_LABELS,
};
pub use preprocess::{ImagePreprocessor, Tensor, DEFAULT_INPUT_SIZE, MAX_INPUT_SIZE};
pub use router::{CategoryStatus, VerificationRouter};
pub use validate::{ExportKind, FileStructureValidator, UnknownExportKind};
pub use verdict::{FormatCheckResult, LabelScore, Verdict};
