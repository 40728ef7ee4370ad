//! Integration tests for the proofcheck library and CLI.
//!
//! These tests verify end-to-end functionality including:
//! - Router dispatch over real model files on disk
//! - Single-flight model loading across concurrent submissions
//! - Config files and the shipped sample configuration
//! - CLI commands and exit codes

#![allow(clippy::unwrap_used)]
#![allow(clippy::uninlined_format_args)]

use image::{ImageFormat, Rgb, RgbImage};
use proofcheck::{
    Artifact, ChallengeCategory, ClassifierRule, ModelSpec, ModelState, VerificationRouter,
    VerifierConfig, VerifyError,
};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

const GREEN_PROBE: &str = r#"{"input_size": 16, "weights": [[0, -6, 0], [0, 6, 0]], "bias": [0, 0]}"#;

fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// Write a probe model and label manifest, return a config that uses them
fn model_config(dir: &Path, with_labels: bool) -> VerifierConfig {
    let model_path = dir.join("model.json");
    std::fs::write(&model_path, GREEN_PROBE).unwrap();
    if with_labels {
        std::fs::write(dir.join("labels.json"), r#"["plastic", "plastic-free"]"#).unwrap();
    }

    let mut config = VerifierConfig::default();
    config.classification.categories.insert(
        ChallengeCategory::PlasticFree,
        ClassifierRule {
            positive_label: "plastic-free".into(),
            threshold: None,
            model: ModelSpec::new("plastic-free", model_path),
        },
    );
    config
}

// ============================================================================
// Router Tests
// ============================================================================

#[tokio::test]
async fn test_green_photo_passes_plastic_free() {
    let temp_dir = TempDir::new().unwrap();
    let router = VerificationRouter::from_config(&model_config(temp_dir.path(), true)).unwrap();

    let photo = Artifact::image(png_bytes(32, 32, [10, 240, 10]));
    let verdict = router.verify("plastic-free", &photo).await.unwrap();

    assert!(verdict.success, "{:?}", verdict);
    assert_eq!(verdict.message, "plastic-free");
    assert!(verdict.confidence > 0.99);
    assert_eq!(verdict.details.len(), 2);
}

#[tokio::test]
async fn test_red_photo_fails_plastic_free() {
    let temp_dir = TempDir::new().unwrap();
    let router = VerificationRouter::from_config(&model_config(temp_dir.path(), true)).unwrap();

    // No green signal: both logits are 0, so the first label leads at 50%
    let photo = Artifact::image(png_bytes(32, 32, [255, 0, 0]));
    let verdict = router.verify("plastic-free", &photo).await.unwrap();

    assert!(!verdict.success);
    assert_eq!(verdict.message, "plastic");
    assert_eq!(verdict.detail("plastic"), Some("50.00%"));
}

#[tokio::test]
async fn test_missing_manifest_uses_fallback_labels() {
    let temp_dir = TempDir::new().unwrap();
    let router = VerificationRouter::from_config(&model_config(temp_dir.path(), false)).unwrap();

    let photo = Artifact::image(png_bytes(32, 32, [10, 240, 10]));
    let verdict = router.verify("plastic-free", &photo).await.unwrap();

    // Fallback labels never name the positive class
    assert!(!verdict.success);
    assert_eq!(verdict.message, "positive");
    assert_eq!(
        router.classification().cache().state("plastic-free"),
        ModelState::FallbackLoaded
    );
}

#[tokio::test]
async fn test_missing_model_is_retryable() {
    let temp_dir = TempDir::new().unwrap();
    let config = model_config(temp_dir.path(), true);
    std::fs::remove_file(temp_dir.path().join("model.json")).unwrap();
    let router = VerificationRouter::from_config(&config).unwrap();
    let photo = Artifact::image(png_bytes(32, 32, [10, 240, 10]));

    let err = router.verify("plastic-free", &photo).await.unwrap_err();
    assert!(matches!(err, VerifyError::ModelUnavailable { .. }));
    assert!(err.is_retryable());
    assert_eq!(
        router.classification().cache().state("plastic-free"),
        ModelState::Unloaded
    );

    // A later call sees the restored weights
    std::fs::write(temp_dir.path().join("model.json"), GREEN_PROBE).unwrap();
    let verdict = router.verify("plastic-free", &photo).await.unwrap();
    assert!(verdict.success);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_load_once() {
    let temp_dir = TempDir::new().unwrap();
    let router =
        Arc::new(VerificationRouter::from_config(&model_config(temp_dir.path(), true)).unwrap());
    let photo = Artifact::image(png_bytes(16, 16, [10, 240, 10]));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let router = Arc::clone(&router);
            let photo = photo.clone();
            tokio::spawn(async move { router.verify("plastic-free", &photo).await })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().unwrap().success);
    }
    assert_eq!(router.classification().cache().load_count(), 1);
    assert_eq!(
        router.classification().cache().loaded_models(),
        vec!["plastic-free".to_string()]
    );
}

#[tokio::test]
async fn test_energy_bill_text_document() {
    let router = VerificationRouter::from_config(&VerifierConfig::default()).unwrap();
    let bill = Artifact::document(
        b"City Power\nPrevious reading: 450 kWh\nCurrent reading: 369 kWh\n".to_vec(),
        Some("bill.txt".into()),
    );

    let verdict = router.verify("energy-bill", &bill).await.unwrap();
    assert!(verdict.success);
    assert_eq!(verdict.message, "Consumption reduced by 18%");
    assert_eq!(verdict.detail("reduction_percentage"), Some("18"));
    assert_eq!(verdict.detail("unit"), Some("kWh"));
}

#[tokio::test]
async fn test_unknown_category_not_supported() {
    let router = VerificationRouter::from_config(&VerifierConfig::default()).unwrap();
    let verdict = router
        .verify("composting", &Artifact::image(vec![1u8, 2, 3]))
        .await
        .unwrap();

    assert!(!verdict.success);
    assert!((verdict.confidence - 0.1).abs() < f64::EPSILON);
    assert_eq!(verdict.message, "Challenge not supported yet.");
}

// ============================================================================
// Configuration Tests
// ============================================================================

fn manifest_path(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join(relative)
}

#[test]
fn test_sample_config_loads() {
    let config = VerifierConfig::load(manifest_path("config/verifier.yaml")).unwrap();

    assert!((config.classification.threshold - 0.8).abs() < f32::EPSILON);
    assert!(config
        .classification
        .categories
        .contains_key(&ChallengeCategory::PlasticFree));
    assert_eq!(
        config.extraction.document_types,
        vec![ChallengeCategory::EnergyBill, ChallengeCategory::WaterBill]
    );
    assert_eq!(config.validation.required_columns, ["Rank", "Name", "Points"]);
}

#[test]
fn test_config_rejects_image_category_as_document() {
    let yaml = "extraction:\n  document_types: [energy-bill, tree-planting]\n";
    assert!(VerifierConfig::from_yaml(yaml).is_err());
}

#[test]
fn test_config_rejects_unknown_tag() {
    let yaml = "extraction:\n  document_types: [gas-bill]\n";
    assert!(VerifierConfig::from_yaml(yaml).is_err());
}

// ============================================================================
// CLI Integration Tests
// ============================================================================

fn proofcheck() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_proofcheck"));
    cmd.current_dir(env!("CARGO_MANIFEST_DIR"));
    cmd
}

#[test]
fn test_cli_help_command() {
    let output = proofcheck().arg("--help").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("verify"), "Help should list verify: {}", stdout);
    assert!(stdout.contains("validate-export"));
    assert!(stdout.contains("categories"));
}

#[test]
fn test_cli_verify_energy_bill() {
    let temp_dir = TempDir::new().unwrap();
    let bill = temp_dir.path().join("bill.txt");
    std::fs::write(&bill, "Previous: 450 kWh\nCurrent: 369 kWh\n").unwrap();

    let output = proofcheck()
        .args(["verify", "--category", "energy-bill", "--file"])
        .arg(&bill)
        .output()
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(0), "{}", stdout);
    let verdict: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(verdict["success"], true);
    assert_eq!(verdict["details"]["reduction_percentage"], "18");
}

#[test]
fn test_cli_verify_unsupported_exits_one() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("photo.png");
    std::fs::write(&file, png_bytes(8, 8, [0, 0, 0])).unwrap();

    let output = proofcheck()
        .args(["verify", "--category", "recycling", "--file"])
        .arg(&file)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Challenge not supported yet."));
}

#[test]
fn test_cli_verify_missing_file_exits_two() {
    let output = proofcheck()
        .args(["verify", "--category", "energy-bill", "--file", "/nonexistent/bill.pdf"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_cli_verify_with_sample_config() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("meal.png");
    std::fs::write(&file, png_bytes(64, 64, [20, 230, 20])).unwrap();

    let output = proofcheck()
        .args(["verify", "--category", "plastic-free", "--config", "config/verifier.yaml", "--file"])
        .arg(&file)
        .output()
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(0), "{}", stdout);
    assert!(stdout.contains("\"plastic-free\""));
}

#[test]
fn test_cli_validate_export() {
    let temp_dir = TempDir::new().unwrap();
    let csv = temp_dir.path().join("leaderboard.csv");
    std::fs::write(&csv, "Rank,Name,Points\n1,Ada,120\n").unwrap();

    let output = proofcheck()
        .args(["validate-export", "--kind", "tabular", "--path"])
        .arg(&csv)
        .output()
        .unwrap();

    assert!(output.status.success());
    let result: serde_json::Value =
        serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["valid"], true);
}

#[test]
fn test_cli_validate_export_unknown_kind() {
    let output = proofcheck()
        .args(["validate-export", "--kind", "video", "--path", "clip.mp4"])
        .output()
        .unwrap();

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success());
    assert!(stderr.contains("Unknown export kind 'video'"), "{}", stderr);
    assert!(!stderr.contains("Unsupported category"));
}

#[test]
fn test_cli_categories_table() {
    let output = proofcheck().arg("categories").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    for category in ChallengeCategory::ALL {
        assert!(stdout.contains(category.as_str()), "missing {category}");
    }
    assert!(stdout.contains("classification"));
    assert!(stdout.contains("extraction"));
}
