//! Publisher - builds and publishes the Australian dairy statistics dataset
//!
//! Responsibilities:
//! - Read the ABARES and ABS workbooks and fingerprint them
//! - Harmonize them into one long-format dataset
//! - Refuse to publish unless every validation check passes
//! - Replace the published CSV and SQLite database together
//!
//! Usage:
//!   cargo run --bin publisher
//!   cargo run --bin publisher -- --dry-run --report data/validation.json
//!   cargo run --bin publisher -- --verify
//!   cargo run --bin publisher -- --summary

mod config;
mod sink;

use anyhow::{Context, Result};
use clap::Parser;
use harmonizer::{Pipeline, Registry, SourceDescriptor, ValidationConfig, ValidationReport, Workbook};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, warn};

use crate::config::Config;

/// Violations printed before the rest are summarized by count.
const MAX_LOGGED_VIOLATIONS: usize = 20;

#[derive(Parser, Debug)]
#[command(name = "publisher", about = "Harmonizes ABARES and ABS dairy tables into one published dataset")]
struct Args {
    /// ABARES dairy workbook (overrides ABARES_WORKBOOK)
    #[arg(long)]
    abares: Option<PathBuf>,

    /// ABS historical commodities workbook (overrides ABS_WORKBOOK)
    #[arg(long)]
    abs: Option<PathBuf>,

    /// Dry run - parse, merge and validate but write nothing
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Verify mode - check the published CSV matches a fresh run byte for byte
    #[arg(long, default_value = "false")]
    verify: bool,

    /// Write the validation report as JSON, whether or not it passes
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print counts from the published database and exit
    #[arg(long, default_value = "false")]
    summary: bool,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "publisher=info,harmonizer=info".into()),
        )
        .init();
}

/// `sha256:<hex>` of a file's bytes.
async fn content_hash(path: &Path) -> Result<String> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

fn load_registry(config: &Config) -> Result<Registry> {
    let registry = match &config.registry_path {
        Some(path) => Registry::from_json_file(path)
            .with_context(|| format!("Failed to load registry {}", path.display()))?,
        None => Registry::builtin().context("Failed to build the built-in registry")?,
    };
    info!(version = registry.version(), variables = registry.variables().count(), "registry loaded");
    Ok(registry)
}

async fn write_report(path: &Path, report: &ValidationReport) -> Result<()> {
    let json = serde_json::to_vec_pretty(report).context("Failed to serialize validation report")?;
    fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write report {}", path.display()))?;
    info!(path = %path.display(), "validation report written");
    Ok(())
}

fn log_violations(report: &ValidationReport) {
    for violation in report.violations.iter().take(MAX_LOGGED_VIOLATIONS) {
        error!(check = violation.check(), "{violation}");
    }
    if report.violations.len() > MAX_LOGGED_VIOLATIONS {
        warn!(
            remaining = report.violations.len() - MAX_LOGGED_VIOLATIONS,
            "further violations omitted; see --report"
        );
    }
}

async fn print_summary(db_path: &Path) -> Result<()> {
    let pool = sink::open(db_path, false).await?;
    let summary = sink::summary(&pool).await?;
    pool.close().await;

    println!("Total observations: {}", summary.total);
    println!("\nBy category:");
    for c in &summary.by_category {
        println!(
            "  {:<12} {:>7}  {}-{}",
            c.category, c.observations, c.first_year, c.last_year
        );
    }
    println!("\nBy state:");
    for (state, n) in &summary.by_state {
        println!("  {:<12} {:>7}", state, n);
    }
    println!("\nBy confidence:");
    for (confidence, n) in &summary.by_confidence {
        println!("  {:<12} {:>7}", confidence, n);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(path) = args.abares {
        config.abares_workbook = path;
    }
    if let Some(path) = args.abs {
        config.abs_workbook = path;
    }

    if args.summary {
        return print_summary(&config.db_path).await;
    }

    let mode = if args.verify {
        "verify"
    } else if args.dry_run {
        "dry-run"
    } else {
        "live"
    };
    info!(
        mode,
        abares = %config.abares_workbook.display(),
        abs = %config.abs_workbook.display(),
        "starting run"
    );

    let registry = load_registry(&config)?;

    let abares_source = SourceDescriptor::abares().with_content_hash(content_hash(&config.abares_workbook).await?);
    let abs_source = SourceDescriptor::abs_historic().with_content_hash(content_hash(&config.abs_workbook).await?);
    info!(abares = ?abares_source.content_hash, abs = ?abs_source.content_hash, "workbooks fingerprinted");

    let mut abares = Workbook::open(&config.abares_workbook)
        .with_context(|| format!("Failed to open {}", config.abares_workbook.display()))?;
    let mut abs = Workbook::open(&config.abs_workbook)
        .with_context(|| format!("Failed to open {}", config.abs_workbook.display()))?;

    let pipeline = Pipeline::new(&registry)
        .with_sources(abares_source, abs_source)
        .with_extraction_date(chrono::Utc::now().date_naive())
        .with_validation(ValidationConfig {
            reconciliation_tolerance: config.reconcile_tolerance,
            ..ValidationConfig::default()
        });
    let outcome = pipeline
        .run(&mut abares, &mut abs)
        .context("Harmonization failed; published dataset left unchanged")?;

    if let Some(path) = &args.report {
        write_report(path, &outcome.report).await?;
    }
    if !outcome.report.is_clean() {
        log_violations(&outcome.report);
    }
    let dataset = outcome
        .into_publishable()
        .context("Validation failed; published dataset left unchanged")?;

    let csv = sink::render_csv(&dataset.observations)?;

    if args.verify {
        if !sink::csv_matches(&config.output_csv, &csv).await? {
            anyhow::bail!(
                "Published CSV {} differs from a fresh run",
                config.output_csv.display()
            );
        }
        info!(rows = dataset.observations.len(), "published CSV is identical to a fresh run");
        return Ok(());
    }

    if args.dry_run {
        info!(
            observations = dataset.observations.len(),
            conversions = dataset.conversions.len(),
            "dry run - nothing written"
        );
        return Ok(());
    }

    let staged = sink::stage(&dataset, &registry, &csv, &config.output_csv, &config.db_path).await?;
    staged.commit().await?;

    info!(
        observations = dataset.observations.len(),
        provenance = dataset.provenance.len(),
        conversions = dataset.conversions.len(),
        "run complete"
    );
    Ok(())
}
