//! Consumption extraction from bill-like documents.
//!
//! Extractors are strategies: the engine only sees a [`Reading`], so a real
//! OCR or field-extraction backend can replace the heuristic text reader
//! without touching the router or callers.

use crate::artifact::Artifact;
use crate::category::{ChallengeCategory, EngineKind};
use crate::config::{expect_engine, ConfigError, ExtractionSettings};
use crate::error::VerifyError;
use crate::verdict::{Verdict, NOT_SUPPORTED_CONFIDENCE};
use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

/// Message for document types without a registered extractor
pub const UNSUPPORTED_DOCUMENT_MESSAGE: &str = "Unable to extract data from this document type";

/// Before/after consumption read from a document
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub previous: f64,
    pub current: f64,
    pub unit: String,
    /// Extractor's self-reported certainty in [0, 1]
    pub confidence: f64,
}

impl Reading {
    /// `(previous - current) / previous * 100`, `None` without a positive baseline
    #[must_use]
    pub fn reduction_percentage(&self) -> Option<f64> {
        (self.previous > 0.0).then(|| (self.previous - self.current) / self.previous * 100.0)
    }
}

/// Produces consumption readings from a document artifact
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Read previous and current consumption
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::Extraction` if the values cannot be found.
    async fn extract(&self, artifact: &Artifact) -> Result<Reading, VerifyError>;
}

/// Dispatches document types to their extractors
#[derive(Default)]
pub struct ExtractionEngine {
    extractors: BTreeMap<ChallengeCategory, Arc<dyn Extractor>>,
}

impl std::fmt::Debug for ExtractionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: BTreeMap<&str, &str> = self
            .extractors
            .iter()
            .map(|(category, extractor)| (category.as_str(), extractor.name()))
            .collect();
        f.debug_struct("ExtractionEngine")
            .field("extractors", &names)
            .finish()
    }
}

impl ExtractionEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with the heuristic text extractor wired for each configured type
    ///
    /// # Errors
    ///
    /// Returns `WrongEngine` if a configured type is an image category.
    pub fn from_settings(settings: &ExtractionSettings) -> Result<Self, ConfigError> {
        let mut engine = Self::new();
        for document_type in &settings.document_types {
            let extractor: Arc<dyn Extractor> = match document_type {
                ChallengeCategory::WaterBill => Arc::new(HeuristicTextExtractor::water()),
                _ => Arc::new(HeuristicTextExtractor::energy()),
            };
            engine.register(*document_type, extractor)?;
        }
        Ok(engine)
    }

    /// Register an extractor for a document type
    ///
    /// # Errors
    ///
    /// Returns `WrongEngine` if the category is judged by classification.
    pub fn register(
        &mut self,
        document_type: ChallengeCategory,
        extractor: Arc<dyn Extractor>,
    ) -> Result<(), ConfigError> {
        debug_assert_eq!(
            document_type.engine(),
            EngineKind::Extraction,
            "{document_type} registered with the extraction engine"
        );
        expect_engine(document_type, EngineKind::Extraction)?;
        self.extractors.insert(document_type, extractor);
        Ok(())
    }

    #[must_use]
    pub fn is_registered(&self, document_type: ChallengeCategory) -> bool {
        self.extractors.contains_key(&document_type)
    }

    /// Extract readings and judge the reduction. Never fails: every problem
    /// becomes a failed verdict.
    pub async fn extract(&self, document_type: ChallengeCategory, artifact: &Artifact) -> Verdict {
        let Some(extractor) = self.extractors.get(&document_type) else {
            tracing::debug!(%document_type, "No extractor registered");
            return Verdict::fail(NOT_SUPPORTED_CONFIDENCE, UNSUPPORTED_DOCUMENT_MESSAGE);
        };

        let verdict = match extractor.extract(artifact).await {
            Ok(reading) => judge_reading(&reading),
            Err(e) => {
                tracing::warn!(%document_type, extractor = extractor.name(), error = %e, "Extraction failed");
                Verdict::fail(0.0, format!("Could not read consumption values: {e}"))
            }
        };

        tracing::info!(
            %document_type,
            extractor = extractor.name(),
            success = verdict.success,
            confidence = verdict.confidence,
            "Extraction verdict"
        );
        verdict
    }
}

/// Any positive reduction passes
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn judge_reading(reading: &Reading) -> Verdict {
    let Some(reduction) = reading.reduction_percentage() else {
        return Verdict::fail(0.0, "Previous consumption must be positive")
            .with_detail("previous_consumption", format_amount(reading.previous))
            .with_detail("current_consumption", format_amount(reading.current));
    };

    let rounded = reduction.round() as i64;
    let verdict = if reduction > 0.0 {
        Verdict::pass(reading.confidence, format!("Consumption reduced by {rounded}%"))
    } else {
        Verdict::fail(reading.confidence, "No reduction in consumption detected")
    };

    verdict
        .with_detail("previous_consumption", format_amount(reading.previous))
        .with_detail("current_consumption", format_amount(reading.current))
        .with_detail("reduction_percentage", rounded.to_string())
        .with_detail("unit", reading.unit.clone())
}

fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

/// Plain text of a document: PDF text layer or UTF-8 text
///
/// # Errors
///
/// Returns `VerifyError::ValidationParse` if a PDF cannot be parsed.
pub fn read_document_text(bytes: &[u8], extension: Option<&str>) -> Result<String, VerifyError> {
    let is_pdf = extension.is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        || bytes.starts_with(b"%PDF");
    if is_pdf {
        // pdf-extract panics on some malformed inputs
        std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
            .map_err(|_| VerifyError::ValidationParse("PDF text extraction failed: malformed document".into()))?
            .map_err(|e| VerifyError::ValidationParse(format!("PDF text extraction failed: {e}")))
    } else {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

const NUMBER: &str = r"\b([0-9][0-9,]*(?:\.[0-9]+)?)";

/// Labelled and bare amount patterns for one unit family.
///
/// A labelled reading only counts when the number is followed by the unit
/// on the same line as its label.
#[derive(Debug)]
struct UnitPatterns {
    previous: Regex,
    current: Regex,
    amount: Regex,
}

impl UnitPatterns {
    /// `unit` must contain exactly one capture group around the unit text
    fn new(unit: &str) -> Self {
        let labelled = |labels: &str| {
            Regex::new(&format!(
                r"(?im)\b(?:{labels})\b[^\n]*?{NUMBER}[ \t]*{unit}"
            ))
            .expect("valid labelled-reading pattern")
        };
        Self {
            previous: labelled(r"previous|last\s+period|prior"),
            current: labelled(r"current|this\s+period|present"),
            amount: Regex::new(&format!(r"(?i){NUMBER}[ \t]*{unit}"))
                .expect("valid amount pattern"),
        }
    }
}

static ENERGY: LazyLock<UnitPatterns> = LazyLock::new(|| UnitPatterns::new(r"(kwh)\b"));

static WATER: LazyLock<UnitPatterns> = LazyLock::new(|| {
    UnitPatterns::new(r"(m3|m³|cubic\s+met(?:er|re)s?|gal(?:lon)?s?)")
});

fn energy_unit(_matched: &str) -> &'static str {
    "kWh"
}

fn water_unit(matched: &str) -> &'static str {
    if matched.to_lowercase().starts_with("gal") {
        "gal"
    } else {
        "m3"
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse().ok()
}

/// Amount and matched unit text from a pattern with number and unit groups
fn amount<'t>(captures: &Captures<'t>) -> Option<(f64, &'t str)> {
    let value = parse_number(captures.get(1)?.as_str())?;
    Some((value, captures.get(2)?.as_str()))
}

fn first_amount<'t>(pattern: &Regex, text: &'t str) -> Option<(f64, &'t str)> {
    pattern.captures(text).as_ref().and_then(amount)
}

/// Reads labelled previous/current readings from document text.
///
/// Falls back to the first two amounts followed by the unit, with lower
/// confidence, when no labelled pair carries the unit.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicTextExtractor {
    family: &'static str,
    patterns: &'static LazyLock<UnitPatterns>,
    normalize: fn(&str) -> &'static str,
}

impl HeuristicTextExtractor {
    /// Confidence when both readings carry labels
    pub const LABELLED_CONFIDENCE: f64 = 0.85;
    /// Confidence when readings are inferred from bare amounts
    pub const POSITIONAL_CONFIDENCE: f64 = 0.6;

    /// Electricity bills in kWh
    #[must_use]
    pub fn energy() -> Self {
        Self {
            family: "kWh",
            patterns: &ENERGY,
            normalize: energy_unit,
        }
    }

    /// Water bills in cubic metres (`m3`) or gallons (`gal`)
    #[must_use]
    pub fn water() -> Self {
        Self {
            family: "water",
            patterns: &WATER,
            normalize: water_unit,
        }
    }

    /// Find readings in already-extracted text
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::Extraction` if fewer than two readings are found
    /// or the two readings use different units.
    pub fn read_text(&self, text: &str) -> Result<Reading, VerifyError> {
        if let (Some(previous), Some(current)) = (
            first_amount(&self.patterns.previous, text),
            first_amount(&self.patterns.current, text),
        ) {
            return self.reading(previous, current, Self::LABELLED_CONFIDENCE);
        }

        let amounts: Vec<(f64, &str)> = self
            .patterns
            .amount
            .captures_iter(text)
            .filter_map(|c| amount(&c))
            .take(2)
            .collect();

        match amounts[..] {
            [previous, current] => self.reading(previous, current, Self::POSITIONAL_CONFIDENCE),
            _ => Err(VerifyError::Extraction(format!(
                "no previous/current {} readings found",
                self.family
            ))),
        }
    }

    fn reading(
        &self,
        (previous, previous_unit): (f64, &str),
        (current, current_unit): (f64, &str),
        confidence: f64,
    ) -> Result<Reading, VerifyError> {
        let unit = (self.normalize)(previous_unit);
        let current_unit = (self.normalize)(current_unit);
        if unit != current_unit {
            return Err(VerifyError::Extraction(format!(
                "previous reading in {unit} but current reading in {current_unit}"
            )));
        }

        Ok(Reading {
            previous,
            current,
            unit: unit.to_string(),
            confidence,
        })
    }
}

#[async_trait]
impl Extractor for HeuristicTextExtractor {
    fn name(&self) -> &str {
        "heuristic-text"
    }

    async fn extract(&self, artifact: &Artifact) -> Result<Reading, VerifyError> {
        let text = read_document_text(artifact.bytes(), artifact.extension().as_deref())
            .map_err(|e| VerifyError::Extraction(e.to_string()))?;
        self.read_text(&text)
    }
}

/// Placeholder extractor for tests and demos only.
///
/// It never looks at the document. Production wiring must use
/// [`HeuristicTextExtractor`] or a real extraction backend.
#[derive(Debug)]
pub struct FakeExtractor {
    mode: FakeMode,
}

#[derive(Debug)]
enum FakeMode {
    Fixed(Reading),
    Seeded(Mutex<ChaCha8Rng>),
}

impl FakeExtractor {
    /// Always report the same reading
    #[must_use]
    pub fn fixed(previous: f64, current: f64, confidence: f64) -> Self {
        Self {
            mode: FakeMode::Fixed(Reading {
                previous,
                current,
                unit: "kWh".to_string(),
                confidence,
            }),
        }
    }

    /// Deterministic pseudo-random readings; the sequence depends only on the seed
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            mode: FakeMode::Seeded(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    fn name(&self) -> &str {
        "fake"
    }

    async fn extract(&self, _artifact: &Artifact) -> Result<Reading, VerifyError> {
        match &self.mode {
            FakeMode::Fixed(reading) => Ok(reading.clone()),
            FakeMode::Seeded(rng) => {
                let mut rng = rng.lock().unwrap_or_else(PoisonError::into_inner);
                let previous: f64 = rng.gen_range(200.0_f64..600.0).round();
                let current = (previous * rng.gen_range(0.7..1.05)).round();
                Ok(Reading {
                    previous,
                    current,
                    unit: "kWh".to_string(),
                    confidence: rng.gen_range(0.6..0.95),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bill(text: &str) -> Artifact {
        Artifact::document(text.as_bytes().to_vec(), Some("bill.txt".to_string()))
    }

    fn engine_with(extractor: FakeExtractor) -> ExtractionEngine {
        let mut engine = ExtractionEngine::new();
        engine
            .register(ChallengeCategory::EnergyBill, Arc::new(extractor))
            .expect("register");
        engine
    }

    #[tokio::test]
    async fn test_energy_bill_reduction() {
        let engine = engine_with(FakeExtractor::fixed(450.0, 369.0, 0.9));
        let verdict = engine
            .extract(ChallengeCategory::EnergyBill, &bill("ignored"))
            .await;

        assert!(verdict.success);
        assert!((verdict.confidence - 0.9).abs() < 1e-9);
        assert_eq!(verdict.detail("reduction_percentage"), Some("18"));
        assert_eq!(verdict.detail("previous_consumption"), Some("450"));
        assert_eq!(verdict.detail("current_consumption"), Some("369"));
        assert_eq!(verdict.message, "Consumption reduced by 18%");
    }

    #[tokio::test]
    async fn test_increase_fails_with_extractor_confidence() {
        let engine = engine_with(FakeExtractor::fixed(300.0, 330.0, 0.7));
        let verdict = engine
            .extract(ChallengeCategory::EnergyBill, &bill("ignored"))
            .await;

        assert!(!verdict.success);
        assert!((verdict.confidence - 0.7).abs() < 1e-9);
        assert_eq!(verdict.detail("reduction_percentage"), Some("-10"));
    }

    #[tokio::test]
    async fn test_zero_baseline_fails() {
        let engine = engine_with(FakeExtractor::fixed(0.0, 10.0, 0.9));
        let verdict = engine
            .extract(ChallengeCategory::EnergyBill, &bill("ignored"))
            .await;
        assert!(!verdict.success);
        assert!(verdict.detail("reduction_percentage").is_none());
    }

    #[tokio::test]
    async fn test_unregistered_document_type() {
        let engine = engine_with(FakeExtractor::fixed(1.0, 0.5, 0.9));
        let verdict = engine
            .extract(ChallengeCategory::WaterBill, &bill("ignored"))
            .await;

        assert!(!verdict.success);
        assert!((verdict.confidence - 0.1).abs() < 1e-9);
        assert_eq!(verdict.message, UNSUPPORTED_DOCUMENT_MESSAGE);
    }

    #[test]
    fn test_heuristic_labelled_readings() {
        let text = "ACME Power\nPrevious reading: 1,250 kWh\nCurrent reading: 1,000 kWh\n";
        let reading = HeuristicTextExtractor::energy()
            .read_text(text)
            .expect("readings found");
        assert!((reading.previous - 1250.0).abs() < 1e-9);
        assert!((reading.current - 1000.0).abs() < 1e-9);
        assert!((reading.confidence - HeuristicTextExtractor::LABELLED_CONFIDENCE).abs() < 1e-9);
        assert_eq!(reading.unit, "kWh");
    }

    #[test]
    fn test_heuristic_positional_fallback() {
        let text = "Usage history: 450 kWh in March, 369 kWh in April";
        let reading = HeuristicTextExtractor::energy()
            .read_text(text)
            .expect("amounts found");
        assert!((reading.previous - 450.0).abs() < 1e-9);
        assert!((reading.current - 369.0).abs() < 1e-9);
        assert!((reading.confidence - HeuristicTextExtractor::POSITIONAL_CONFIDENCE).abs() < 1e-9);
    }

    #[test]
    fn test_heuristic_water_units() {
        let text = "Meter: 32.5 m3 then 30 m3";
        let reading = HeuristicTextExtractor::water()
            .read_text(text)
            .expect("amounts found");
        assert!((reading.previous - 32.5).abs() < 1e-9);
        assert_eq!(reading.unit, "m3");
    }

    #[test]
    fn test_heuristic_skips_labelled_amount_without_unit() {
        let text = "Current charges: $48.00\nPrevious reading: 450 kWh\nCurrent reading: 369 kWh";
        let reading = HeuristicTextExtractor::energy()
            .read_text(text)
            .expect("readings found");
        assert!((reading.previous - 450.0).abs() < 1e-9);
        assert!((reading.current - 369.0).abs() < 1e-9);
        assert!((reading.confidence - HeuristicTextExtractor::LABELLED_CONFIDENCE).abs() < 1e-9);

        let verdict = judge_reading(&reading);
        assert!(verdict.success);
        assert_eq!(verdict.detail("reduction_percentage"), Some("18"));
    }

    #[test]
    fn test_heuristic_period_labels_with_date_ranges() {
        let text = "Last period (Mar 1 - Mar 31): 450 kWh\nThis period (Apr 1 - Apr 30): 369 kWh";
        let reading = HeuristicTextExtractor::energy()
            .read_text(text)
            .expect("readings found");
        assert!((reading.previous - 450.0).abs() < 1e-9);
        assert!((reading.current - 369.0).abs() < 1e-9);
        assert_eq!(judge_reading(&reading).message, "Consumption reduced by 18%");
    }

    #[test]
    fn test_heuristic_label_needs_word_boundary() {
        // "currently" is not the "current" label, so only bare amounts remain
        let text = "Previous reading: 450 kWh\nWe are currently 12 days late. 369 kWh";
        let reading = HeuristicTextExtractor::energy()
            .read_text(text)
            .expect("amounts found");
        assert!((reading.confidence - HeuristicTextExtractor::POSITIONAL_CONFIDENCE).abs() < 1e-9);
        assert!((reading.current - 369.0).abs() < 1e-9);
    }

    #[test]
    fn test_heuristic_water_gallons() {
        let reading = HeuristicTextExtractor::water()
            .read_text("Usage 5,000 gallons then 4,200 gallons")
            .expect("amounts found");
        assert!((reading.previous - 5000.0).abs() < 1e-9);
        assert!((reading.current - 4200.0).abs() < 1e-9);
        assert_eq!(reading.unit, "gal");
        assert_eq!(judge_reading(&reading).detail("unit"), Some("gal"));
    }

    #[test]
    fn test_heuristic_water_mixed_units_rejected() {
        let err = HeuristicTextExtractor::water()
            .read_text("Previous: 30 m3\nCurrent: 7,000 gallons")
            .unwrap_err();
        assert!(err.to_string().contains("gal"));
    }

    #[test]
    fn test_heuristic_no_readings() {
        let err = HeuristicTextExtractor::energy()
            .read_text("Thank you for your payment")
            .unwrap_err();
        assert!(matches!(err, VerifyError::Extraction(_)));
    }

    #[tokio::test]
    async fn test_heuristic_failure_becomes_verdict() {
        let engine = ExtractionEngine::from_settings(&ExtractionSettings::default())
            .expect("default settings");
        let verdict = engine
            .extract(ChallengeCategory::EnergyBill, &bill("nothing to see"))
            .await;
        assert!(!verdict.success);
        assert!(verdict.message.starts_with("Could not read consumption values"));
    }

    #[tokio::test]
    async fn test_seeded_fake_is_deterministic() {
        let a = FakeExtractor::seeded(7);
        let b = FakeExtractor::seeded(7);
        let doc = bill("ignored");
        for _ in 0..3 {
            let ra = a.extract(&doc).await.expect("fake reading");
            let rb = b.extract(&doc).await.expect("fake reading");
            assert_eq!(ra, rb);
            assert!((200.0..=600.0).contains(&ra.previous));
            assert!((0.6..0.95).contains(&ra.confidence));
        }
    }

    #[test]
    fn test_read_document_text_plain() {
        assert_eq!(
            read_document_text(b"hello", Some("txt")).expect("text"),
            "hello"
        );
    }

    #[test]
    fn test_read_document_text_bad_pdf() {
        assert!(read_document_text(b"%PDF-1.4 garbage", None).is_err());
    }
}
