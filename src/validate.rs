//! Structural validation of exported artifacts
//!
//! Pre-flight checks for generated leaderboards, certificates and rendered
//! images before they are offered as downloadable evidence. Independent of
//! any model.
//!
//! ## Example
//!
//! ```rust,ignore
//! use proofcheck::validate::{ExportKind, FileStructureValidator};
//!
//! let validator = FileStructureValidator::default();
//! let result = validator.validate("exports/leaderboard.csv".as_ref(), ExportKind::Tabular);
//! ```

use crate::artifact::{Artifact, MediaKind};
use crate::config::ValidationSettings;
use crate::error::VerifyError;
use crate::extract::read_document_text;
use crate::verdict::FormatCheckResult;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

/// Declared format of an exported artifact
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ExportKind {
    /// Delimited leaderboard export
    Tabular,
    /// Certificate document with a text layer
    DocumentText,
    /// Rendered image
    Raster,
}

impl ExportKind {
    /// File extensions accepted for this kind
    #[must_use]
    pub const fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Tabular => &["csv"],
            Self::DocumentText => &["pdf", "txt"],
            Self::Raster => &["png", "jpg", "jpeg"],
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tabular => "tabular",
            Self::DocumentText => "document-text",
            Self::Raster => "raster",
        }
    }
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Export kind tag that names no known format
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown export kind '{0}' (expected tabular, document-text or raster)")]
pub struct UnknownExportKind(pub String);

impl From<ExportKind> for MediaKind {
    fn from(kind: ExportKind) -> Self {
        match kind {
            ExportKind::Tabular => Self::TabularExport,
            ExportKind::DocumentText => Self::Document,
            ExportKind::Raster => Self::RasterExport,
        }
    }
}

impl std::str::FromStr for ExportKind {
    type Err = UnknownExportKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tabular" | "csv" => Ok(Self::Tabular),
            "document-text" | "document_text" | "document" | "pdf" => Ok(Self::DocumentText),
            "raster" | "image" => Ok(Self::Raster),
            _ => Err(UnknownExportKind(s.to_string())),
        }
    }
}

/// Runs pre-checks and a kind-specific structural check on export files
#[derive(Debug, Clone, Default)]
pub struct FileStructureValidator {
    settings: ValidationSettings,
}

impl FileStructureValidator {
    #[must_use]
    pub const fn new(settings: ValidationSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub const fn settings(&self) -> &ValidationSettings {
        &self.settings
    }

    /// Validate an export file. Never fails: parse errors become
    /// `{ valid: false, message: "Validation failed: <cause>" }`.
    pub fn validate(&self, path: &Path, kind: ExportKind) -> FormatCheckResult {
        let result = if path.is_file() {
            Artifact::read_as(path, kind.into())
                .map_err(|e| VerifyError::ValidationParse(e.to_string()))
                .and_then(|artifact| self.check(&artifact, kind))
        } else {
            Ok(FormatCheckResult::invalid(format!(
                "File not found: {}",
                path.display()
            )))
        };
        report(&path.display().to_string(), kind, result)
    }

    /// Validate export bytes already in memory; the extension check uses the
    /// artifact's filename
    pub fn validate_artifact(&self, artifact: &Artifact, kind: ExportKind) -> FormatCheckResult {
        let source = artifact.filename().unwrap_or("<memory>");
        report(source, kind, self.check(artifact, kind))
    }

    /// Validate several exports in order
    pub fn validate_all<'a, I>(&self, exports: I) -> Vec<FormatCheckResult>
    where
        I: IntoIterator<Item = (&'a Path, ExportKind)>,
    {
        exports
            .into_iter()
            .map(|(path, kind)| self.validate(path, kind))
            .collect()
    }

    /// Size and extension pre-checks, then the kind-specific check
    fn check(&self, artifact: &Artifact, kind: ExportKind) -> Result<FormatCheckResult, VerifyError> {
        tracing::debug!(
            file = artifact.filename().unwrap_or("<memory>"),
            media = artifact.kind().as_str(),
            bytes = artifact.len(),
            "Checking export"
        );

        let size = artifact.len() as u64;
        if size < self.settings.min_bytes {
            return Ok(FormatCheckResult::invalid(format!(
                "File too small: {size} bytes (minimum {} bytes)",
                self.settings.min_bytes
            )));
        }

        let extension = artifact.extension().unwrap_or_default();
        if !kind.extensions().contains(&extension.as_str()) {
            return Ok(FormatCheckResult::invalid(format!(
                "Invalid file extension '.{extension}' for {kind} export (expected {})",
                kind.extensions().join(", ")
            )));
        }

        match kind {
            ExportKind::Tabular => self.check_tabular(artifact.bytes()),
            ExportKind::DocumentText => self.check_document_text(artifact.bytes(), &extension),
            ExportKind::Raster => self.check_raster(artifact.bytes()),
        }
    }

    /// Header row must carry every required column, then at least one data row
    fn check_tabular(&self, bytes: &[u8]) -> Result<FormatCheckResult, VerifyError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);

        let headers: HashSet<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let missing: Vec<&str> = self
            .settings
            .required_columns
            .iter()
            .filter(|column| !headers.contains(column.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Ok(FormatCheckResult::invalid(format!(
                "Missing required columns: {}",
                missing.join(", ")
            )));
        }

        let mut rows = 0usize;
        for record in reader.records() {
            record?;
            rows += 1;
        }
        if rows == 0 {
            return Ok(FormatCheckResult::invalid("Export contains no data rows"));
        }

        Ok(FormatCheckResult::valid(format!(
            "Tabular export is valid ({rows} rows)"
        )))
    }

    /// Every required keyword must appear in the document text
    fn check_document_text(
        &self,
        bytes: &[u8],
        extension: &str,
    ) -> Result<FormatCheckResult, VerifyError> {
        let text = read_document_text(bytes, Some(extension))?;

        let missing: Vec<&str> = self
            .settings
            .required_keywords
            .iter()
            .filter(|keyword| !text.contains(keyword.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Ok(FormatCheckResult::invalid(format!(
                "Document is missing expected content: {}",
                missing.join(", ")
            )));
        }

        Ok(FormatCheckResult::valid("Document content is valid"))
    }

    /// Reads only the image header, not pixel data
    fn check_raster(&self, bytes: &[u8]) -> Result<FormatCheckResult, VerifyError> {
        let (width, height) = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| VerifyError::ValidationParse(e.to_string()))?
            .into_dimensions()
            .map_err(|e| VerifyError::ValidationParse(e.to_string()))?;

        let min = self.settings.min_dimension;
        if width < min || height < min {
            return Ok(FormatCheckResult::invalid(format!(
                "Image too small: {width}x{height} (minimum {min}x{min})"
            )));
        }

        Ok(FormatCheckResult::valid(format!(
            "Image dimensions are valid: {width}x{height}"
        )))
    }
}

/// Log the outcome and fold parse errors into an invalid result
fn report(
    source: &str,
    kind: ExportKind,
    result: Result<FormatCheckResult, VerifyError>,
) -> FormatCheckResult {
    match result {
        Ok(check) => {
            tracing::debug!(
                source,
                kind = %kind,
                valid = check.valid,
                message = %check.message,
                "Export validated"
            );
            check
        }
        Err(e) => {
            tracing::warn!(source, kind = %kind, error = %e, "Export validation failed");
            FormatCheckResult::invalid(format!("Validation failed: {e}"))
        }
    }
}
