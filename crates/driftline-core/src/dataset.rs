// crates/driftline-core/src/dataset.rs

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use blake3::Hasher;
use chrono::{DateTime, Utc};
use polars::prelude::*;
use tracing::info;

use crate::error::{PipelineError, Result};

/// File name of the most recent artifact in a data directory.
pub const LATEST_FILE: &str = "latest.csv";

/// Paths written by [`write_versioned`].
#[derive(Debug, Clone)]
pub struct VersionedOutput {
    pub path: PathBuf,
    pub latest_path: PathBuf,
}

pub fn read_csv(path: &Path) -> Result<DataFrame> {
    if !path.exists() {
        return Err(PipelineError::MissingInput(path.to_path_buf()));
    }
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

pub fn write_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    Ok(())
}

/// Writes `{prefix}_{YYYYmmdd_HHMMSS}.csv` and refreshes `latest.csv` in `dir`.
pub fn write_versioned(
    df: &mut DataFrame,
    dir: &Path,
    prefix: &str,
    now: DateTime<Utc>,
) -> Result<VersionedOutput> {
    let stamp = now.format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("{prefix}_{stamp}.csv"));
    let latest_path = dir.join(LATEST_FILE);

    write_csv(df, &path)?;
    write_csv(df, &latest_path)?;
    info!(
        path = %path.display(),
        latest = %latest_path.display(),
        rows = df.height(),
        columns = df.width(),
        "dataset written"
    );

    Ok(VersionedOutput { path, latest_path })
}

pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Column values as `f64`; values that cannot be cast become `None`.
pub fn float_values(df: &DataFrame, column: &str) -> Result<Vec<Option<f64>>> {
    let casted = df.column(column)?.cast(&DataType::Float64)?;
    let values = casted.f64()?.into_iter().collect();
    Ok(values)
}

/// Column values rendered as strings.
pub fn string_values(df: &DataFrame, column: &str) -> Result<Vec<Option<String>>> {
    let casted = df.column(column)?.cast(&DataType::String)?;
    let values = casted
        .str()?
        .into_iter()
        .map(|value| value.map(str::to_string))
        .collect();
    Ok(values)
}

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect()
}

pub fn content_hash(path: &Path) -> Result<String> {
    let contents = fs::read(path)?;
    let mut hasher = Hasher::new();
    hasher.update(&contents);
    Ok(hasher.finalize().to_hex().to_string())
}
