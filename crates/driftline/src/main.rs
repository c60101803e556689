use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use driftline_core::config::TrackingBackendKind;
use driftline_core::{
    comparison, dataset, drift, features, ingestion, profiling, quality_gate, training,
    PipelineConfig, PipelineError,
};
use driftline_tracking::{LocalStore, MlflowClient, TrackingBackend};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Batch data pipeline with quality gates, features and model comparison", long_about = None)]
struct Cli {
    /// Pipeline config file (defaults to driftline.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pull records from the configured source into the raw data directory
    Ingest,
    /// Run the data quality gate
    Check(InputArgs),
    /// Clean the latest raw data and derive features
    Transform,
    /// Write a markdown profile of a dataset
    Profile(ProfileArgs),
    /// Train on the latest processed data and record the run locally
    Train,
    /// Compare the baseline and candidate model stages
    Compare(CompareArgs),
    /// Reference statistics and drift checks
    #[command(subcommand)]
    Drift(DriftCommand),
    /// Ingest, check, transform and profile in one go
    Run,
}

#[derive(Subcommand, Debug)]
enum DriftCommand {
    /// Compute reference statistics from the latest processed data
    Stats(DriftStatsArgs),
    /// Check a batch against the saved reference statistics
    Check(DriftCheckArgs),
}

#[derive(Args, Debug, Default)]
struct InputArgs {
    /// Dataset to check (defaults to the latest raw CSV)
    #[arg(long)]
    input: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
struct ProfileArgs {
    /// Dataset to profile (defaults to the latest processed CSV)
    #[arg(long)]
    input: Option<PathBuf>,
    /// Report destination (defaults to `<reports_dir>/profile.md`)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
struct CompareArgs {
    /// Report destination (defaults to `comparison.report_path`)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
struct DriftStatsArgs {
    #[arg(long)]
    input: Option<PathBuf>,
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
struct DriftCheckArgs {
    /// Batch to check (defaults to the latest processed CSV)
    #[arg(long)]
    input: Option<PathBuf>,
    #[arg(long)]
    reference: Option<PathBuf>,
    /// Optional per-feature CSV report
    #[arg(long)]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Ingest => {
            let outcome = ingest(&config).await?;
            print_json(&outcome)
        }
        Command::Check(args) => {
            let input = args.input.unwrap_or_else(|| config.paths.latest_raw());
            check(&config, &input)
        }
        Command::Transform => {
            let outcome = features::transform(&config, Utc::now()).context("transformation failed")?;
            print_json(&outcome)
        }
        Command::Profile(args) => {
            let input = args.input.unwrap_or_else(|| config.paths.latest_processed());
            let output = args
                .output
                .unwrap_or_else(|| config.paths.reports_dir.join("profile.md"));
            profile(&input, &output)
        }
        Command::Train => {
            let store = LocalStore::open(&config.tracking.local_dir)
                .context("failed to open local tracking store")?;
            let run = training::train_and_record(&config, &store, Utc::now())
                .context("training failed")?;
            print_json(&run)
        }
        Command::Compare(args) => compare(&config, args.output).await,
        Command::Drift(DriftCommand::Stats(args)) => {
            let input = args.input.unwrap_or_else(|| config.paths.latest_processed());
            let output = args.output.unwrap_or_else(|| config.paths.reference_stats.clone());
            let df = dataset::read_csv(&input)?;
            let stats = drift::reference_stats(&df, &config.drift.columns)?;
            drift::save_reference(&stats, &output)?;
            print_json(&stats)
        }
        Command::Drift(DriftCommand::Check(args)) => {
            let input = args.input.unwrap_or_else(|| config.paths.latest_processed());
            let reference_path = args
                .reference
                .unwrap_or_else(|| config.paths.reference_stats.clone());
            let reference = drift::load_reference(&reference_path)
                .context("reference statistics unavailable; run `driftline drift stats` first")?;
            let df = dataset::read_csv(&input)?;
            let report = drift::check_batch(&df, &reference, &config.drift)?;
            if let Some(path) = args.report {
                drift::write_report_csv(&report, &path)?;
            }
            print_json(&report)?;
            if report.has_drift() {
                bail!("drift detected in: {}", report.drifted_features().join(", "));
            }
            Ok(())
        }
        Command::Run => {
            let ingested = ingest(&config).await?;
            check(&config, &ingested.latest_path)?;
            let transformed =
                features::transform(&config, Utc::now()).context("transformation failed")?;
            profile(
                &transformed.latest_path,
                &config.paths.reports_dir.join("profile.md"),
            )?;
            info!(
                raw = %ingested.path.display(),
                processed = %transformed.output_path.display(),
                "pipeline run completed"
            );
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load(path).context("failed to load pipeline config")?;
    config
        .apply_env_overrides()
        .context("invalid environment override")?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn ingest(config: &PipelineConfig) -> Result<ingestion::IngestionOutcome> {
    let outcome = ingestion::ingest(config, Utc::now())
        .await
        .context("ingestion failed")?;
    Ok(outcome)
}

fn check(config: &PipelineConfig, input: &Path) -> Result<()> {
    let df = dataset::read_csv(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let report = quality_gate::evaluate(&df, &config.quality, Utc::now())?;
    print_json(&report)?;
    if !report.passed() {
        return Err(PipelineError::QualityGate(report).into());
    }
    info!(path = %input.display(), "quality gate passed");
    Ok(())
}

fn profile(input: &Path, output: &Path) -> Result<()> {
    let profile = profiling::profile_file(input)
        .with_context(|| format!("failed to profile {}", input.display()))?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, profiling::render_markdown(&profile))?;
    info!(path = %output.display(), "profile written");
    Ok(())
}

fn tracking_backend(config: &PipelineConfig) -> Result<Box<dyn TrackingBackend>> {
    match config.tracking.backend {
        TrackingBackendKind::Local => {
            let store = LocalStore::open(&config.tracking.local_dir)
                .context("failed to open local tracking store")?;
            Ok(Box::new(store))
        }
        TrackingBackendKind::Mlflow => {
            let uri = config
                .tracking
                .mlflow_uri
                .as_deref()
                .context("MLFLOW_TRACKING_URI (or tracking.mlflow_uri) must be set")?;
            let mut client = MlflowClient::new(uri)?;
            match (&config.tracking.username, &config.tracking.password) {
                (Some(user), Some(pass)) => client = client.with_basic_auth(user, pass),
                (Some(_), None) | (None, Some(_)) => {
                    warn!("MLflow credentials incomplete; connecting without basic auth")
                }
                (None, None) => {}
            }
            info!(uri = %client.base_url(), "using MLflow tracking backend");
            Ok(Box::new(client))
        }
    }
}

async fn compare(config: &PipelineConfig, output: Option<PathBuf>) -> Result<()> {
    let backend = tracking_backend(config)?;
    let comparison = comparison::compare_stages(
        backend.as_ref(),
        &config.tracking.model_name,
        &config.comparison,
    )
    .await
    .context("model comparison failed")?;

    let output = output.unwrap_or_else(|| config.comparison.report_path.clone());
    comparison::write_report(&comparison, &output)?;
    print_json(&comparison)?;

    if comparison.recommendation == comparison::Recommendation::Reject {
        bail!(
            "candidate v{} degraded against baseline v{}",
            comparison.candidate.version,
            comparison.baseline.version
        );
    }
    Ok(())
}
