//! proofcheck CLI
//!
//! Operator surface over the verification library

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proofcheck::{
    Artifact, ExportKind, FileStructureValidator, VerificationRouter, VerifierConfig,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tabled::{Table, Tabled};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "proofcheck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a proof artifact for a challenge category
    Verify {
        /// Challenge category tag (e.g. plastic-free, energy-bill)
        #[arg(long)]
        category: String,

        /// Path to the submitted photo or document
        #[arg(long)]
        file: PathBuf,

        /// Verifier configuration (YAML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Check an exported file before it is offered for download
    ValidateExport {
        /// Declared export kind: tabular, document-text or raster
        #[arg(long)]
        kind: ExportKind,

        /// Path to the exported file
        #[arg(long)]
        path: PathBuf,

        /// Verifier configuration (YAML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List challenge categories and their engines
    Categories {
        /// Verifier configuration (YAML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Table row for the categories listing
#[derive(Tabled)]
struct CategoryRow {
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Engine")]
    engine: String,
    #[tabled(rename = "Registered")]
    registered: String,
}

fn load_config(path: Option<&Path>) -> Result<VerifierConfig> {
    match path {
        Some(path) => VerifierConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(VerifierConfig::default()),
    }
}

async fn run_verify(category: &str, file: &Path, config: Option<&Path>) -> Result<bool> {
    let config = load_config(config)?;
    let router = VerificationRouter::from_config(&config)?;

    let artifact = Artifact::from_path(file)
        .with_context(|| format!("Failed to read artifact {}", file.display()))?;
    tracing::info!(
        category = %category,
        path = %file.display(),
        kind = artifact.kind().as_str(),
        "Verifying artifact"
    );

    let verdict = router.verify(category, &artifact).await?;
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(verdict.success)
}

fn run_validate_export(kind: ExportKind, path: &Path, config: Option<&Path>) -> Result<bool> {
    let config = load_config(config)?;
    let validator = FileStructureValidator::new(config.validation);

    let result = validator.validate(path, kind);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.valid)
}

fn run_categories(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let router = VerificationRouter::from_config(&config)?;

    let rows: Vec<CategoryRow> = router
        .categories()
        .into_iter()
        .map(|status| CategoryRow {
            category: status.category.to_string(),
            engine: status.engine.to_string(),
            registered: if status.registered { "yes" } else { "no" }.to_string(),
        })
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let outcome = match cli.command {
        Commands::Verify {
            category,
            file,
            config,
        } => run_verify(&category, &file, config.as_deref()).await,
        Commands::ValidateExport { kind, path, config } => {
            run_validate_export(kind, &path, config.as_deref())
        }
        Commands::Categories { config } => run_categories(config.as_deref()).map(|()| true),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}
