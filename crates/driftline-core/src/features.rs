use std::path::PathBuf;

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::cleaning::{self, CleaningSummary};
use crate::config::{FeatureConfig, PipelineConfig};
use crate::dataset;
use crate::error::Result;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("source column {column} not found in dataset")]
    MissingColumn { column: String },
    #[error("derived column {column} would overwrite an existing column")]
    NameCollision { column: String },
    #[error(transparent)]
    Polars(#[from] PolarsError),
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureSummary {
    pub input_rows: usize,
    pub output_rows: usize,
    pub added_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransformOutcome {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub latest_path: PathBuf,
    pub cleaning: CleaningSummary,
    pub features: FeatureSummary,
}

/// `values[i - offset]`; the first `offset` rows are null.
pub fn lag(values: &[Option<f64>], offset: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|idx| idx.checked_sub(offset).and_then(|src| values[src]))
        .collect()
}

/// `values[i + horizon]`; the last `horizon` rows are null.
pub fn lead(values: &[Option<f64>], horizon: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|idx| values.get(idx + horizon).copied().flatten())
        .collect()
}

fn window_values(values: &[Option<f64>], end: usize, window: usize) -> Option<Vec<f64>> {
    if window == 0 || end + 1 < window {
        return None;
    }
    values[end + 1 - window..=end].iter().copied().collect()
}

/// Mean over rows `[i - window + 1, i]`; null when the window is incomplete
/// or holds a null.
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|idx| {
            window_values(values, idx, window)
                .map(|slice| slice.iter().sum::<f64>() / slice.len() as f64)
        })
        .collect()
}

/// Sample standard deviation (ddof = 1) over rows `[i - window + 1, i]`.
pub fn rolling_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|idx| {
            let slice = window_values(values, idx, window)?;
            if slice.len() < 2 {
                return None;
            }
            let mean = slice.iter().sum::<f64>() / slice.len() as f64;
            let variance = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                / (slice.len() - 1) as f64;
            Some(variance.sqrt())
        })
        .collect()
}

pub fn lag_name(column: &str, offset: usize) -> String {
    format!("{column}_lag_{offset}")
}

pub fn rolling_mean_name(column: &str, window: usize) -> String {
    format!("{column}_rolling_mean_{window}")
}

pub fn rolling_std_name(column: &str, window: usize) -> String {
    format!("{column}_rolling_std_{window}")
}

/// Adds lag, rolling and target columns, then drops incomplete rows.
pub fn derive_features(
    df: &DataFrame,
    config: &FeatureConfig,
) -> std::result::Result<(DataFrame, FeatureSummary), FeatureError> {
    let input_rows = df.height();
    let mut output = match &config.order_by {
        Some(order_by) => {
            if df.column(order_by).is_err() {
                return Err(FeatureError::MissingColumn {
                    column: order_by.clone(),
                });
            }
            df.sort([order_by.as_str()], SortMultipleOptions::default())?
        }
        None => df.clone(),
    };

    let mut derived: Vec<Series> = Vec::new();
    for source in &config.source_columns {
        let values = numeric_column(&output, source)?;
        for &offset in &config.lags {
            derived.push(Series::new(lag_name(source, offset).into(), lag(&values, offset)));
        }
        for &window in &config.rolling_windows {
            derived.push(Series::new(
                rolling_mean_name(source, window).into(),
                rolling_mean(&values, window),
            ));
            derived.push(Series::new(
                rolling_std_name(source, window).into(),
                rolling_std(&values, window),
            ));
        }
    }

    if let Some(target) = &config.target {
        let values = numeric_column(&output, &target.column)?;
        derived.push(Series::new(
            target.name.as_str().into(),
            lead(&values, target.horizon),
        ));
    }

    let mut added_columns = Vec::with_capacity(derived.len());
    for series in &derived {
        let name = series.name().to_string();
        if output.column(&name).is_ok() || added_columns.contains(&name) {
            return Err(FeatureError::NameCollision { column: name });
        }
        added_columns.push(name);
    }

    let keep: Vec<bool> = (0..output.height())
        .map(|idx| {
            !config.drop_incomplete
                || derived
                    .iter()
                    .all(|series| series.f64().map_or(false, |ca| ca.get(idx).is_some()))
        })
        .collect();

    let mut columns: Vec<Column> = derived.into_iter().map(Column::from).collect();
    output.hstack_mut(columns.as_mut_slice())?;

    if config.drop_incomplete {
        let mask = BooleanChunked::new("complete".into(), keep.as_slice());
        output = output.filter(&mask)?;
    }

    let summary = FeatureSummary {
        input_rows,
        output_rows: output.height(),
        added_columns,
    };
    Ok((output, summary))
}

fn numeric_column(
    df: &DataFrame,
    name: &str,
) -> std::result::Result<Vec<Option<f64>>, FeatureError> {
    let column = df.column(name).map_err(|_| FeatureError::MissingColumn {
        column: name.to_string(),
    })?;
    let casted = column.cast(&DataType::Float64)?;
    Ok(casted.f64()?.into_iter().collect())
}

/// Reads the latest raw extract, cleans it, derives features and writes the
/// processed dataset.
pub fn transform(config: &PipelineConfig, now: DateTime<Utc>) -> Result<TransformOutcome> {
    let input_path = config.paths.latest_raw();
    info!(path = %input_path.display(), "loading raw data");
    let raw = dataset::read_csv(&input_path)?;

    let (cleaned, cleaning_summary) = cleaning::clean(&raw, &config.cleaning)?;
    let (mut processed, feature_summary) = derive_features(&cleaned, &config.features)?;

    let written =
        dataset::write_versioned(&mut processed, &config.paths.processed_dir, "processed", now)?;

    info!(
        input = %input_path.display(),
        output = %written.latest_path.display(),
        rows_in = raw.height(),
        rows_out = processed.height(),
        columns_in = raw.width(),
        columns_out = processed.width(),
        "transformation completed"
    );

    Ok(TransformOutcome {
        input_path,
        output_path: written.path,
        latest_path: written.latest_path,
        cleaning: cleaning_summary,
        features: feature_summary,
    })
}
