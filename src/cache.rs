//! Single-flight model cache.
//!
//! Concurrent requests for the same model identity share one memoized
//! pending-load handle, so weights and labels are fetched at most once per
//! process. The internal mutex only guards the handle map and is never held
//! across an await point.

use crate::config::ModelSpec;
use crate::error::VerifyError;
use crate::inference::{load_network, LoadedModel, LoadedNetwork};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Where model weights and label manifests come from
#[async_trait]
pub trait ModelSource: Send + Sync {
    /// Load the network weights for `spec`
    ///
    /// # Errors
    ///
    /// Any error is reported to callers as `ModelUnavailable`.
    async fn load_network(&self, spec: &ModelSpec) -> Result<LoadedNetwork, VerifyError>;

    /// Load the label manifest for `spec`
    ///
    /// # Errors
    ///
    /// Errors are non-fatal: the cache falls back to default labels.
    async fn load_labels(&self, spec: &ModelSpec) -> Result<Vec<String>, VerifyError>;
}

/// Lifecycle of one model identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Unloaded,
    Loading,
    Loaded,
    /// Weights loaded but label manifest missing, so fallback labels are used
    FallbackLoaded,
}

type LoadFuture = Shared<BoxFuture<'static, Result<Arc<LoadedModel>, String>>>;

enum Slot {
    Pending(LoadFuture),
    Ready(Arc<LoadedModel>),
}

/// Process-owned cache of loaded classification models
pub struct ModelCache {
    source: Arc<dyn ModelSource>,
    slots: Mutex<HashMap<String, Slot>>,
    loads_started: AtomicUsize,
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("loads_started", &self.load_count())
            .finish_non_exhaustive()
    }
}

impl ModelCache {
    #[must_use]
    pub fn new(source: Arc<dyn ModelSource>) -> Self {
        Self {
            source,
            slots: Mutex::new(HashMap::new()),
            loads_started: AtomicUsize::new(0),
        }
    }

    /// Cache backed by the local filesystem
    #[must_use]
    pub fn filesystem() -> Self {
        Self::new(Arc::new(FsModelSource))
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a model, loading it on first use.
    ///
    /// Calls arriving while a load for the same `spec.id` is in flight await
    /// that load instead of starting another.
    ///
    /// # Errors
    ///
    /// Returns `ModelUnavailable` if the weights cannot be loaded. The model
    /// stays `Unloaded` so a later call retries.
    pub async fn get_model(&self, spec: &ModelSpec) -> Result<Arc<LoadedModel>, VerifyError> {
        let pending = {
            let mut slots = self.slots();
            match slots.get(&spec.id) {
                Some(Slot::Ready(model)) => return Ok(Arc::clone(model)),
                Some(Slot::Pending(load)) => load.clone(),
                None => {
                    let load = self.start_load(spec.clone());
                    slots.insert(spec.id.clone(), Slot::Pending(load.clone()));
                    load
                }
            }
        };

        let outcome = pending.clone().await;

        let mut slots = self.slots();
        match outcome {
            Ok(model) => {
                slots.insert(spec.id.clone(), Slot::Ready(Arc::clone(&model)));
                Ok(model)
            }
            Err(reason) => {
                // Only clear our own handle; a newer retry may already be pending
                if matches!(slots.get(&spec.id), Some(Slot::Pending(current)) if current.ptr_eq(&pending))
                {
                    slots.remove(&spec.id);
                }
                Err(VerifyError::model_unavailable(&spec.id, reason))
            }
        }
    }

    fn start_load(&self, spec: ModelSpec) -> LoadFuture {
        self.loads_started.fetch_add(1, Ordering::SeqCst);
        let source = Arc::clone(&self.source);

        async move {
            tracing::debug!(model_id = %spec.id, path = %spec.path.display(), "Loading model");

            let network = match source.load_network(&spec).await {
                Ok(network) => network,
                Err(e) => {
                    tracing::error!(model_id = %spec.id, error = %e, "Model load failed");
                    return Err(e.to_string());
                }
            };

            let labels = match source.load_labels(&spec).await {
                Ok(labels) if !labels.is_empty() => labels,
                Ok(_) => {
                    tracing::warn!(model_id = %spec.id, "Label manifest is empty, using fallback labels");
                    Vec::new()
                }
                Err(e) => {
                    tracing::warn!(model_id = %spec.id, error = %e, "Label manifest unavailable, using fallback labels");
                    Vec::new()
                }
            };

            let model = LoadedModel::new(spec.id.clone(), network, labels);
            tracing::info!(
                model_id = %spec.id,
                labels = model.labels().len(),
                fallback_labels = model.metadata.fallback_labels,
                "Model loaded"
            );
            Ok(Arc::new(model))
        }
        .boxed()
        .shared()
    }

    /// Current lifecycle state of a model identity
    #[must_use]
    pub fn state(&self, model_id: &str) -> ModelState {
        match self.slots().get(model_id) {
            None => ModelState::Unloaded,
            Some(Slot::Pending(_)) => ModelState::Loading,
            Some(Slot::Ready(model)) if model.metadata.fallback_labels => {
                ModelState::FallbackLoaded
            }
            Some(Slot::Ready(_)) => ModelState::Loaded,
        }
    }

    /// Identities of fully loaded models, sorted
    #[must_use]
    pub fn loaded_models(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .slots()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of underlying loads started so far
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads_started.load(Ordering::SeqCst)
    }
}

/// Label manifest shapes: a bare list or an exported-model metadata object
#[derive(Deserialize)]
#[serde(untagged)]
enum LabelManifest {
    List(Vec<String>),
    Metadata { labels: Vec<String> },
}

impl LabelManifest {
    fn into_labels(self) -> Vec<String> {
        match self {
            Self::List(labels) | Self::Metadata { labels } => labels,
        }
    }
}

/// Parse a label manifest from JSON
///
/// # Errors
///
/// Returns `VerifyError::Inference` if the JSON matches neither manifest shape.
pub fn parse_label_manifest(json: &str) -> Result<Vec<String>, VerifyError> {
    serde_json::from_str::<LabelManifest>(json)
        .map(LabelManifest::into_labels)
        .map_err(|e| VerifyError::Inference(format!("invalid label manifest: {e}")))
}

/// Loads models and label manifests from local paths
#[derive(Debug, Clone, Copy, Default)]
pub struct FsModelSource;

#[async_trait]
impl ModelSource for FsModelSource {
    async fn load_network(&self, spec: &ModelSpec) -> Result<LoadedNetwork, VerifyError> {
        let path = spec.path.clone();
        let input_size = spec.input_size;
        tokio::task::spawn_blocking(move || load_network(&path, input_size))
            .await
            .map_err(|e| VerifyError::model_unavailable(&spec.id, e))?
    }

    async fn load_labels(&self, spec: &ModelSpec) -> Result<Vec<String>, VerifyError> {
        let location = spec.labels_location();
        let json = tokio::fs::read_to_string(&location)
            .await
            .map_err(|e| label_error(&location, &e))?;
        parse_label_manifest(&json)
    }
}

fn label_error(path: &Path, err: &std::io::Error) -> VerifyError {
    VerifyError::Inference(format!("{}: {err}", path.display()))
}
