use std::collections::BTreeMap;
use std::fs;
use std::ops::Range;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use driftline_tracking::{LocalStore, ModelVersion};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::{PipelineConfig, TrainingConfig};
use crate::dataset::{self, is_numeric_dtype};
use crate::error::Result;

/// Pivots smaller than this fraction of the largest matrix entry are zero.
const PIVOT_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("target column {0} not found in dataset")]
    MissingTarget(String),
    #[error("feature column {0} not found in dataset")]
    MissingFeature(String),
    #[error("no feature columns available for training")]
    NoFeatures,
    #[error("need at least {needed} complete rows, found {found}")]
    NotEnoughRows { needed: usize, found: usize },
    #[error("row {row} has {got} features, expected {expected}")]
    DimensionMismatch {
        row: usize,
        expected: usize,
        got: usize,
    },
    #[error("normal equations are singular; features are collinear or constant")]
    Singular,
}

/// Ridge regression with an unpenalized intercept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegressor {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl LinearRegressor {
    /// Solves `(X'X + λI) β = X'y` where `X` carries a leading column of ones.
    pub fn fit(x: &[Vec<f64>], y: &[f64], l2_penalty: f64) -> std::result::Result<Self, TrainingError> {
        if x.is_empty() || x.len() != y.len() {
            return Err(TrainingError::NotEnoughRows {
                needed: 1,
                found: x.len().min(y.len()),
            });
        }
        let features = x[0].len();
        let dim = features + 1;

        let mut gram = vec![vec![0.0; dim]; dim];
        let mut rhs = vec![0.0; dim];
        for (row_idx, (row, target)) in x.iter().zip(y).enumerate() {
            if row.len() != features {
                return Err(TrainingError::DimensionMismatch {
                    row: row_idx,
                    expected: features,
                    got: row.len(),
                });
            }
            let augmented: Vec<f64> = std::iter::once(1.0).chain(row.iter().copied()).collect();
            for i in 0..dim {
                rhs[i] += augmented[i] * target;
                for j in 0..dim {
                    gram[i][j] += augmented[i] * augmented[j];
                }
            }
        }
        for (i, row) in gram.iter_mut().enumerate().skip(1) {
            row[i] += l2_penalty;
        }

        let solution = solve(gram, rhs)?;
        Ok(Self {
            intercept: solution[0],
            coefficients: solution[1..].to_vec(),
        })
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(row)
                .map(|(coef, value)| coef * value)
                .sum::<f64>()
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter().map(|row| self.predict_row(row)).collect()
    }
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> std::result::Result<Vec<f64>, TrainingError> {
    let n = b.len();
    let scale = a
        .iter()
        .flatten()
        .fold(0.0_f64, |acc, value| acc.max(value.abs()));
    let threshold = (scale * PIVOT_TOLERANCE).max(f64::MIN_POSITIVE);
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&l, &r| a[l][col].abs().total_cmp(&a[r][col].abs()))
            .ok_or(TrainingError::Singular)?;
        if a[pivot][col].abs() < threshold {
            return Err(TrainingError::Singular);
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        let pivot_row = a[col].clone();
        let pivot_rhs = b[col];
        for row in col + 1..n {
            let factor = a[row][col] / pivot_row[col];
            if factor == 0.0 {
                continue;
            }
            for (cell, pivot_cell) in a[row].iter_mut().zip(&pivot_row).skip(col) {
                *cell -= factor * pivot_cell;
            }
            b[row] -= factor * pivot_rhs;
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}

/// First rows train, last rows test; both sides get at least one row.
pub fn chronological_split(
    rows: usize,
    test_fraction: f64,
) -> std::result::Result<(Range<usize>, Range<usize>), TrainingError> {
    if rows < 2 {
        return Err(TrainingError::NotEnoughRows {
            needed: 2,
            found: rows,
        });
    }
    let test_rows = ((rows as f64) * test_fraction).round() as usize;
    let test_rows = test_rows.clamp(1, rows - 1);
    let split = rows - test_rows;
    Ok((0..split, split..rows))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
}

impl RegressionMetrics {
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Self {
        let n = actual.len().min(predicted.len());
        if n == 0 {
            return Self {
                mse: 0.0,
                rmse: 0.0,
                mae: 0.0,
                r2: 0.0,
            };
        }
        let count = n as f64;
        let pairs = || actual.iter().zip(predicted).take(n);

        let mse = pairs().map(|(a, p)| (a - p).powi(2)).sum::<f64>() / count;
        let mae = pairs().map(|(a, p)| (a - p).abs()).sum::<f64>() / count;
        let mean = actual[..n].iter().sum::<f64>() / count;
        let ss_tot: f64 = actual[..n].iter().map(|a| (a - mean).powi(2)).sum();
        let ss_res = mse * count;
        // Constant targets have no variance to explain.
        let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

        Self {
            mse,
            rmse: mse.sqrt(),
            mae,
            r2,
        }
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("mse".to_string(), self.mse),
            ("rmse".to_string(), self.rmse),
            ("mae".to_string(), self.mae),
            ("r2".to_string(), self.r2),
        ])
    }
}

/// Everything needed to score new rows, persisted as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub target: String,
    pub feature_columns: Vec<String>,
    pub model: LinearRegressor,
    pub l2_penalty: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingOutcome {
    pub artifact: ModelArtifact,
    pub train_rows: usize,
    pub test_rows: usize,
    pub metrics: RegressionMetrics,
}

impl TrainingOutcome {
    pub fn params(&self, config: &TrainingConfig) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("model_type".to_string(), "ridge_regression".to_string()),
            ("target".to_string(), self.artifact.target.clone()),
            ("n_features".to_string(), self.artifact.feature_columns.len().to_string()),
            ("l2_penalty".to_string(), config.l2_penalty.to_string()),
            ("test_fraction".to_string(), config.test_fraction.to_string()),
            ("train_rows".to_string(), self.train_rows.to_string()),
            ("test_rows".to_string(), self.test_rows.to_string()),
        ])
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingRun {
    pub outcome: TrainingOutcome,
    pub model_path: PathBuf,
    pub version: ModelVersion,
}

fn select_features(df: &DataFrame, config: &TrainingConfig) -> std::result::Result<Vec<String>, TrainingError> {
    let features: Vec<String> = if config.feature_columns.is_empty() {
        df.get_columns()
            .iter()
            .filter(|column| is_numeric_dtype(column.dtype()))
            .map(|column| column.name().to_string())
            .filter(|name| name != &config.target && !config.exclude_columns.contains(name))
            .collect()
    } else {
        for name in &config.feature_columns {
            if df.column(name).is_err() {
                return Err(TrainingError::MissingFeature(name.clone()));
            }
        }
        config.feature_columns.clone()
    };

    if features.is_empty() {
        return Err(TrainingError::NoFeatures);
    }
    Ok(features)
}

/// Fits on the leading rows and scores on the trailing hold-out. Rows with a
/// null target or feature are skipped.
pub fn train(df: &DataFrame, config: &TrainingConfig) -> Result<TrainingOutcome> {
    if df.column(&config.target).is_err() {
        return Err(TrainingError::MissingTarget(config.target.clone()).into());
    }
    let feature_columns = select_features(df, config)?;

    let target = dataset::float_values(df, &config.target)?;
    let mut columns = Vec::with_capacity(feature_columns.len());
    for name in &feature_columns {
        columns.push(dataset::float_values(df, name)?);
    }

    let mut x = Vec::with_capacity(df.height());
    let mut y = Vec::with_capacity(df.height());
    for (idx, label) in target.iter().enumerate() {
        let Some(label) = label else { continue };
        let row: Option<Vec<f64>> = columns.iter().map(|column| column[idx]).collect();
        if let Some(row) = row {
            x.push(row);
            y.push(*label);
        }
    }

    let (train_range, test_range) = chronological_split(x.len(), config.test_fraction)?;
    let model = LinearRegressor::fit(&x[train_range.clone()], &y[train_range.clone()], config.l2_penalty)?;
    let predictions = model.predict(&x[test_range.clone()]);
    let metrics = RegressionMetrics::compute(&y[test_range.clone()], &predictions);

    info!(
        features = feature_columns.len(),
        train_rows = train_range.len(),
        test_rows = test_range.len(),
        rmse = metrics.rmse,
        mae = metrics.mae,
        r2 = metrics.r2,
        "model trained"
    );

    Ok(TrainingOutcome {
        artifact: ModelArtifact {
            target: config.target.clone(),
            feature_columns,
            model,
            l2_penalty: config.l2_penalty,
        },
        train_rows: train_range.len(),
        test_rows: test_range.len(),
        metrics,
    })
}

/// Trains on the latest processed dataset, saves the model and records the
/// run in the local tracking store.
pub fn train_and_record(config: &PipelineConfig, store: &LocalStore, now: DateTime<Utc>) -> Result<TrainingRun> {
    let input_path = config.paths.latest_processed();
    let df = dataset::read_csv(&input_path)?;
    let outcome = train(&df, &config.training)?;

    fs::create_dir_all(&config.paths.models_dir)?;
    let model_path = config
        .paths
        .models_dir
        .join(format!("model_{}.json", now.format("%Y%m%d_%H%M%S")));
    fs::write(&model_path, serde_json::to_string_pretty(&outcome.artifact)?)?;

    let mut params = outcome.params(&config.training);
    params.insert("training_data".to_string(), input_path.display().to_string());
    params.insert("model_path".to_string(), model_path.display().to_string());

    let version = store.record_run(
        &config.tracking.model_name,
        config.training.stage,
        params,
        outcome.metrics.to_map(),
        now,
    )?;

    info!(
        model = %config.tracking.model_name,
        version = %version.version,
        path = %model_path.display(),
        "training run recorded"
    );

    Ok(TrainingRun {
        outcome,
        model_path,
        version,
    })
}
