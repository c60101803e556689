use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::DriftConfig;
use crate::dataset::{self, is_numeric_dtype};
use crate::error::{PipelineError, Result};
use crate::profiling;

/// Distribution of one feature in the training data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl ReferenceStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let summary = profiling::summarize(values);
        Some(Self {
            mean: summary.mean?,
            std: summary.std.unwrap_or(0.0),
            min: summary.min?,
            max: summary.max?,
        })
    }

    pub fn z_score(&self, value: f64) -> f64 {
        if self.std > 0.0 {
            (value - self.mean) / self.std
        } else {
            0.0
        }
    }
}

pub type ReferenceSet = BTreeMap<String, ReferenceStats>;

#[derive(Debug, Clone, Serialize)]
pub struct FeatureDrift {
    pub feature: String,
    pub checked: usize,
    pub drift_ratio: f64,
    pub drifted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub features: Vec<FeatureDrift>,
    pub skipped: Vec<String>,
}

impl DriftReport {
    pub fn drifted_features(&self) -> Vec<&str> {
        self.features
            .iter()
            .filter(|feature| feature.drifted)
            .map(|feature| feature.feature.as_str())
            .collect()
    }

    pub fn has_drift(&self) -> bool {
        self.features.iter().any(|feature| feature.drifted)
    }
}

/// Stats for `columns`, or for every numeric column when `columns` is empty.
pub fn reference_stats(df: &DataFrame, columns: &[String]) -> Result<ReferenceSet> {
    let selected: Vec<String> = if columns.is_empty() {
        df.get_columns()
            .iter()
            .filter(|column| is_numeric_dtype(column.dtype()))
            .map(|column| column.name().to_string())
            .collect()
    } else {
        columns.to_vec()
    };

    let mut stats = ReferenceSet::new();
    for name in selected {
        let values: Vec<f64> = dataset::float_values(df, &name)?
            .into_iter()
            .flatten()
            .collect();
        match ReferenceStats::from_values(&values) {
            Some(entry) => {
                stats.insert(name, entry);
            }
            None => warn!(feature = %name, "no values to build reference stats from"),
        }
    }
    Ok(stats)
}

pub fn is_drift(stats: &ReferenceStats, value: f64, z_threshold: f64) -> bool {
    stats.z_score(value).abs() > z_threshold || value < stats.min || value > stats.max
}

/// Fraction of drifting values among the last `window` values.
pub fn drift_ratio(stats: &ReferenceStats, values: &[f64], window: usize, z_threshold: f64) -> f64 {
    let start = values.len().saturating_sub(window);
    let recent = &values[start..];
    if recent.is_empty() {
        return 0.0;
    }
    let drifted = recent
        .iter()
        .filter(|value| is_drift(stats, **value, z_threshold))
        .count();
    drifted as f64 / recent.len() as f64
}

pub fn check_batch(df: &DataFrame, reference: &ReferenceSet, config: &DriftConfig) -> Result<DriftReport> {
    let features: Vec<&String> = if config.columns.is_empty() {
        reference.keys().collect()
    } else {
        config.columns.iter().collect()
    };

    let mut report = DriftReport {
        features: Vec::new(),
        skipped: Vec::new(),
    };

    for feature in features {
        let Some(stats) = reference.get(feature) else {
            warn!(feature = %feature, "no reference stats for feature; skipping");
            report.skipped.push(feature.clone());
            continue;
        };
        if df.column(feature).is_err() {
            warn!(feature = %feature, "feature missing from batch; skipping");
            report.skipped.push(feature.clone());
            continue;
        }

        let values: Vec<f64> = dataset::float_values(df, feature)?
            .into_iter()
            .flatten()
            .collect();
        let ratio = drift_ratio(stats, &values, config.window, config.z_threshold);
        let drifted = ratio > config.max_drift_ratio;
        if drifted {
            warn!(feature = %feature, ratio, "drift detected");
        }
        report.features.push(FeatureDrift {
            feature: feature.clone(),
            checked: values.len().min(config.window),
            drift_ratio: ratio,
            drifted,
        });
    }

    info!(
        checked = report.features.len(),
        drifted = report.drifted_features().len(),
        "drift check finished"
    );
    Ok(report)
}

pub fn save_reference(stats: &ReferenceSet, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, serde_json::to_string_pretty(stats)?)?;
    info!(path = %path.display(), features = stats.len(), "reference stats saved");
    Ok(())
}

pub fn load_reference(path: &Path) -> Result<ReferenceSet> {
    if !path.exists() {
        return Err(PipelineError::MissingInput(path.to_path_buf()));
    }
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// One row per checked feature: `feature,checked,drift_ratio,drifted`.
pub fn write_report_csv(report: &DriftReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["feature", "checked", "drift_ratio", "drifted"])?;
    for feature in &report.features {
        writer.write_record([
            feature.feature.clone(),
            feature.checked.to_string(),
            format!("{:.6}", feature.drift_ratio),
            feature.drifted.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
