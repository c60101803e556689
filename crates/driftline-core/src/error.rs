// crates/driftline-core/src/error.rs

use std::path::PathBuf;

use thiserror::Error;

use crate::features::FeatureError;
use crate::quality_gate::QualityReport;
use crate::training::TrainingError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("CSV writing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config file could not be parsed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tracking platform error: {0}")]
    Tracking(#[from] driftline_tracking::TrackingError),

    #[error("Feature derivation failed: {0}")]
    Feature(#[from] FeatureError),

    #[error("Training failed: {0}")]
    Training(#[from] TrainingError),

    #[error("Input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Quality gate failed: {}", .0.failure_summary())]
    QualityGate(QualityReport),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Data processing error: {0}")]
    Processing(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
