use std::collections::BTreeMap;

use polars::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{CleaningConfig, FillRule, FillStrategy, OutlierRule};
use crate::dataset::{self, is_numeric_dtype};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleaningSummary {
    pub input_rows: usize,
    pub output_rows: usize,
    pub dropped_columns: Vec<String>,
    pub filled: BTreeMap<String, usize>,
    pub outliers_removed: usize,
}

pub fn clean(df: &DataFrame, config: &CleaningConfig) -> Result<(DataFrame, CleaningSummary)> {
    let mut output = df.clone();
    let mut summary = CleaningSummary {
        input_rows: df.height(),
        ..CleaningSummary::default()
    };

    for name in &config.drop_columns {
        if output.column(name).is_ok() {
            output = output.drop(name)?;
            summary.dropped_columns.push(name.clone());
        }
    }

    for name in &config.currency_columns {
        if output.column(name).is_err() {
            warn!(column = %name, "currency column not present; skipping");
            continue;
        }
        let parsed: Vec<Option<f64>> = dataset::string_values(&output, name)?
            .into_iter()
            .map(|value| value.and_then(|text| parse_currency(&text)))
            .collect();
        output.with_column(Series::new(name.as_str().into(), parsed))?;
    }

    for rule in &config.fill {
        let filled = apply_fill(&mut output, rule)?;
        summary.filled.insert(rule.column.clone(), filled);
    }

    if let Some(rule) = &config.outlier {
        let before = output.height();
        output = remove_upper_outliers(&output, rule)?;
        summary.outliers_removed = before - output.height();
    }

    summary.output_rows = output.height();
    info!(
        input_rows = summary.input_rows,
        output_rows = summary.output_rows,
        outliers_removed = summary.outliers_removed,
        "cleaning finished"
    );
    Ok((output, summary))
}

/// Strips currency symbols and thousands separators: `"£1,234.50 "` -> `1234.5`.
pub fn parse_currency(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == '.' || *ch == '-')
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        cleaned.parse().ok()
    }
}

/// Quantile with linear interpolation between the closest ranks.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    quantile(&sorted, 0.5)
}

/// Most frequent value; ties resolve to the smallest value, as a sorted
/// mode would.
pub fn most_frequent(values: &[String]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value.as_str()).or_default() += 1;
    }
    let mut best: Option<(&str, usize)> = None;
    for (value, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value.to_string())
}

fn apply_fill(df: &mut DataFrame, rule: &FillRule) -> Result<usize> {
    let Ok(column) = df.column(&rule.column) else {
        warn!(column = %rule.column, "fill column not present; skipping");
        return Ok(0);
    };
    let numeric = is_numeric_dtype(column.dtype());
    let name = rule.column.as_str();

    if numeric {
        let values = dataset::float_values(df, name)?;
        let present: Vec<f64> = values.iter().flatten().copied().collect();
        let fill_value = match &rule.strategy {
            FillStrategy::Median => median(&present),
            FillStrategy::MostFrequent => {
                let rendered: Vec<String> = present.iter().map(|v| v.to_string()).collect();
                most_frequent(&rendered).and_then(|v| v.parse().ok())
            }
            FillStrategy::Constant { value } => Some(value.as_f64().ok_or_else(|| {
                PipelineError::Validation(format!(
                    "fill constant for numeric column {name} must be a number, got {value}"
                ))
            })?),
        };
        let Some(fill_value) = fill_value else {
            return Ok(0);
        };
        let filled = values.iter().filter(|value| value.is_none()).count();
        let replaced: Vec<f64> = values.into_iter().map(|v| v.unwrap_or(fill_value)).collect();
        df.with_column(Series::new(name.into(), replaced))?;
        Ok(filled)
    } else {
        let values: Vec<Option<String>> = dataset::string_values(df, name)?
            .into_iter()
            .map(|value| value.filter(|text| !text.trim().is_empty()))
            .collect();
        let present: Vec<String> = values.iter().flatten().cloned().collect();
        let fill_value = match &rule.strategy {
            FillStrategy::MostFrequent => most_frequent(&present),
            FillStrategy::Median => {
                return Err(PipelineError::Validation(format!(
                    "median fill requires a numeric column, {name} is text"
                )))
            }
            FillStrategy::Constant { value } => Some(match value {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            }),
        };
        let Some(fill_value) = fill_value else {
            return Ok(0);
        };
        let filled = values.iter().filter(|value| value.is_none()).count();
        let replaced: Vec<String> = values
            .into_iter()
            .map(|value| value.unwrap_or_else(|| fill_value.clone()))
            .collect();
        df.with_column(Series::new(name.into(), replaced))?;
        Ok(filled)
    }
}

fn remove_upper_outliers(df: &DataFrame, rule: &OutlierRule) -> Result<DataFrame> {
    if df.column(&rule.column).is_err() {
        warn!(column = %rule.column, "outlier column not present; skipping");
        return Ok(df.clone());
    }
    let values = dataset::float_values(df, &rule.column)?;
    let mut sorted: Vec<f64> = values.iter().flatten().copied().collect();
    sorted.sort_by(f64::total_cmp);

    let (Some(q1), Some(q3)) = (quantile(&sorted, 0.25), quantile(&sorted, 0.75)) else {
        return Ok(df.clone());
    };
    let upper_bound = q3 + rule.iqr_multiplier * (q3 - q1);

    let keep: Vec<bool> = values
        .iter()
        .map(|value| value.is_some_and(|v| v <= upper_bound))
        .collect();
    let mask = BooleanChunked::new("keep".into(), keep.as_slice());
    Ok(df.filter(&mask)?)
}
