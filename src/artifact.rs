//! Submitted evidence: raw bytes plus what the submitter says they are.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Declared media kind of an artifact
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum MediaKind {
    /// Photo submitted for classification
    Image,
    /// Bill-like document submitted for extraction
    Document,
    /// Delimited tabular export (leaderboards)
    TabularExport,
    /// Generated raster image (badges, certificates rendered as images)
    RasterExport,
}

impl MediaKind {
    /// Guess the media kind from a file extension
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" | "jpg" | "jpeg" => Some(Self::Image),
            "pdf" | "txt" => Some(Self::Document),
            "csv" => Some(Self::TabularExport),
            _ => None,
        }
    }

    /// Kebab-case tag
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
            Self::TabularExport => "tabular-export",
            Self::RasterExport => "raster-export",
        }
    }
}

/// Immutable evidence submitted for one verification call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    bytes: Arc<[u8]>,
    kind: MediaKind,
    filename: Option<String>,
}

impl Artifact {
    /// Create an artifact from raw bytes
    #[must_use]
    pub fn new(bytes: impl Into<Arc<[u8]>>, kind: MediaKind, filename: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            kind,
            filename,
        }
    }

    /// Image artifact without a filename
    #[must_use]
    pub fn image(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::new(bytes, MediaKind::Image, None)
    }

    /// Document artifact with an optional filename
    #[must_use]
    pub fn document(bytes: impl Into<Arc<[u8]>>, filename: Option<String>) -> Self {
        Self::new(bytes, MediaKind::Document, filename)
    }

    /// Read an artifact from disk, inferring the media kind from the extension.
    ///
    /// Files with an unrecognised extension are treated as documents.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read.
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let kind = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(MediaKind::from_extension)
            .unwrap_or(MediaKind::Document);
        Self::read_as(path, kind)
    }

    /// Read a file as an artifact of a declared media kind
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read.
    pub fn read_as(path: impl AsRef<Path>, kind: MediaKind) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string());
        Ok(Self::new(bytes, kind, filename))
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub const fn kind(&self) -> MediaKind {
        self.kind
    }

    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Lowercased extension of the declared filename, if any
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        self.filename
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .map(|ext| ext.to_string_lossy().to_lowercase())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
