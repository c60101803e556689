use std::path::Path;

use comfy_table::presets::ASCII_MARKDOWN;
use comfy_table::Table;
use polars::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::dataset::{self, is_numeric_dtype};
use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize)]
pub struct NumericSummary {
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub dtype: String,
    pub non_null: usize,
    pub nulls: usize,
    pub numeric: Option<NumericSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetProfile {
    pub rows: usize,
    pub columns: Vec<ColumnProfile>,
}

impl DatasetProfile {
    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.iter().find(|column| column.name == name)
    }
}

pub fn profile(df: &DataFrame) -> Result<DatasetProfile> {
    let mut columns = Vec::with_capacity(df.width());
    for column in df.get_columns() {
        let name = column.name().to_string();
        let nulls = column.null_count();
        let numeric = if is_numeric_dtype(column.dtype()) {
            let values: Vec<f64> = dataset::float_values(df, &name)?
                .into_iter()
                .flatten()
                .collect();
            Some(summarize(&values))
        } else {
            None
        };
        columns.push(ColumnProfile {
            dtype: column.dtype().to_string(),
            non_null: df.height() - nulls,
            nulls,
            numeric,
            name,
        });
    }
    Ok(DatasetProfile {
        rows: df.height(),
        columns,
    })
}

pub fn profile_file(path: &Path) -> Result<DatasetProfile> {
    let df = dataset::read_csv(path)?;
    let profile = profile(&df)?;
    info!(
        path = %path.display(),
        rows = profile.rows,
        columns = profile.columns.len(),
        "dataset profiled"
    );
    Ok(profile)
}

/// Mean, sample std (ddof = 1), min and max of the non-null values.
pub fn summarize(values: &[f64]) -> NumericSummary {
    if values.is_empty() {
        return NumericSummary::default();
    }
    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    let std = if values.len() > 1 {
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1.0);
        Some(variance.sqrt())
    } else {
        None
    };
    NumericSummary {
        mean: Some(mean),
        std,
        min: values.iter().copied().reduce(f64::min),
        max: values.iter().copied().reduce(f64::max),
    }
}

fn fmt_stat(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

pub fn render_markdown(profile: &DatasetProfile) -> String {
    let mut table = Table::new();
    table.load_preset(ASCII_MARKDOWN).set_header(vec![
        "Column", "Dtype", "Non-null", "Nulls", "Mean", "Std", "Min", "Max",
    ]);

    for column in &profile.columns {
        let stats = column.numeric.clone().unwrap_or_default();
        table.add_row(vec![
            column.name.clone(),
            column.dtype.clone(),
            column.non_null.to_string(),
            column.nulls.to_string(),
            fmt_stat(stats.mean),
            fmt_stat(stats.std),
            fmt_stat(stats.min),
            fmt_stat(stats.max),
        ]);
    }

    format!(
        "# Dataset profile\n\nShape: {} rows x {} columns\n\n{table}\n",
        profile.rows,
        profile.columns.len()
    )
}
