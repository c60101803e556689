use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::{IngestionSource, PipelineConfig};
use crate::dataset;
use crate::error::{PipelineError, Result};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Serialize)]
pub struct IngestionOutcome {
    pub source: String,
    pub path: PathBuf,
    pub latest_path: PathBuf,
    pub rows: usize,
    pub columns: Vec<String>,
    pub content_hash: String,
}

/// Pulls the configured source, stamps every row with the collection time and
/// writes the raw extract.
pub async fn ingest(config: &PipelineConfig, now: DateTime<Utc>) -> Result<IngestionOutcome> {
    let timestamp_column = config.ingestion.timestamp_column.as_str();
    let (source, mut df) = match &config.ingestion.source {
        IngestionSource::Api {
            url,
            headers,
            records_pointer,
        } => {
            let client = reqwest::Client::new();
            let records = fetch_api_records(&client, url, headers, records_pointer.as_deref()).await?;
            info!(url = %url, records = records.len(), "fetched records from API");
            (url.clone(), records_to_frame(&records, timestamp_column, now)?)
        }
        IngestionSource::Files {
            pattern,
            keep_latest,
        } => {
            let df = load_files(pattern, *keep_latest)?;
            (pattern.clone(), stamp_frame(df, timestamp_column, now)?)
        }
    };

    let written = dataset::write_versioned(&mut df, &config.paths.raw_dir, "raw", now)?;
    let content_hash = dataset::content_hash(&written.path)?;
    let columns = dataset::column_names(&df);

    info!(
        source = %source,
        rows = df.height(),
        hash = %content_hash,
        "ingestion finished"
    );

    Ok(IngestionOutcome {
        source,
        path: written.path,
        latest_path: written.latest_path,
        rows: df.height(),
        columns,
        content_hash,
    })
}

pub async fn fetch_api_records(
    client: &reqwest::Client,
    url: &str,
    headers: &BTreeMap<String, String>,
    records_pointer: Option<&str>,
) -> Result<Vec<Record>> {
    let mut request = client.get(url);
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(PipelineError::Processing(format!(
            "API request to {url} failed with status {}",
            response.status()
        )));
    }

    let body: Value = response.json().await?;
    extract_records(body, records_pointer)
}

/// Accepts an array of objects, a single object, or an object holding the
/// array at `records_pointer`.
pub fn extract_records(body: Value, records_pointer: Option<&str>) -> Result<Vec<Record>> {
    let target = match records_pointer {
        Some(pointer) => body.pointer(pointer).cloned().ok_or_else(|| {
            PipelineError::Processing(format!("response has no value at pointer {pointer}"))
        })?,
        None => body,
    };

    match target {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| match item {
                Value::Object(map) => Ok(map),
                other => Err(PipelineError::Processing(format!(
                    "record {idx} is not a JSON object: {other}"
                ))),
            })
            .collect(),
        Value::Object(map) => Ok(vec![map]),
        other => Err(PipelineError::Processing(format!(
            "unexpected response shape: {other}"
        ))),
    }
}

/// Builds one column per record field (first-seen order) plus the collection
/// timestamp column.
pub fn records_to_frame(
    records: &[Record],
    timestamp_column: &str,
    collected_at: DateTime<Utc>,
) -> Result<DataFrame> {
    if records.is_empty() {
        return Err(PipelineError::Processing(
            "source returned no records".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let mut keys: Vec<&str> = Vec::new();
    for record in records {
        for key in record.keys() {
            if seen.insert(key.as_str()) {
                keys.push(key.as_str());
            }
        }
    }

    let mut columns: Vec<Column> = Vec::with_capacity(keys.len() + 1);
    for key in keys {
        if key == timestamp_column {
            warn!(column = key, "record field shadows the collection timestamp; dropping it");
            continue;
        }
        let values: Vec<Option<&Value>> = records
            .iter()
            .map(|record| record.get(key).filter(|value| !value.is_null()))
            .collect();

        let all_numeric = values
            .iter()
            .flatten()
            .all(|value| value.is_number() || value.is_boolean());

        let series = if all_numeric {
            let numbers: Vec<Option<f64>> = values
                .iter()
                .map(|value| value.and_then(json_number))
                .collect();
            Series::new(key.into(), numbers)
        } else {
            let texts: Vec<Option<String>> = values
                .iter()
                .map(|value| value.map(json_text))
                .collect();
            Series::new(key.into(), texts)
        };
        columns.push(series.into());
    }

    let stamp = collected_at.format(TIMESTAMP_FORMAT).to_string();
    columns.push(Series::new(timestamp_column.into(), vec![stamp; records.len()]).into());

    Ok(DataFrame::new(columns)?)
}

fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        other => other.as_f64(),
    }
}

fn json_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Stacks every CSV matching `pattern` (sorted by path) and optionally keeps
/// the last `keep_latest` rows.
pub fn load_files(pattern: &str, keep_latest: Option<usize>) -> Result<DataFrame> {
    let mut paths: Vec<PathBuf> = glob::glob(pattern)
        .map_err(|err| PipelineError::Validation(format!("invalid file pattern {pattern}: {err}")))?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(error = %err, "could not read path from glob pattern");
                None
            }
        })
        .filter(|path| path.is_file())
        .collect();
    paths.sort();

    let Some((first, rest)) = paths.split_first() else {
        return Err(PipelineError::MissingInput(PathBuf::from(pattern)));
    };

    let mut stacked = dataset::read_csv(first)?;
    for path in rest {
        let next = dataset::read_csv(path)?;
        stacked.vstack_mut(&next).map_err(|err| {
            PipelineError::Validation(format!(
                "{} does not match the columns of {}: {err}",
                path.display(),
                first.display()
            ))
        })?;
    }
    info!(files = paths.len(), rows = stacked.height(), "loaded source files");

    Ok(match keep_latest {
        Some(limit) if stacked.height() > limit => {
            info!(kept = limit, "keeping the latest rows only");
            stacked.tail(Some(limit))
        }
        _ => stacked,
    })
}

fn stamp_frame(mut df: DataFrame, timestamp_column: &str, now: DateTime<Utc>) -> Result<DataFrame> {
    let stamp = now.format(TIMESTAMP_FORMAT).to_string();
    df.with_column(Series::new(timestamp_column.into(), vec![stamp; df.height()]))?;
    Ok(df)
}
