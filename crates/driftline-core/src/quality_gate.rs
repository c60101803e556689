use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::*;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{QualityConfig, SchemaMode};
use crate::dataset::{self, is_numeric_dtype};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    NullFraction,
    Schema,
    RowCount,
    NumericType,
    Freshness,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::NullFraction => "null_fraction",
            CheckKind::Schema => "schema",
            CheckKind::RowCount => "row_count",
            CheckKind::NumericType => "numeric_type",
            CheckKind::Freshness => "freshness",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Warnings are reported but never fail the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub kind: CheckKind,
    pub column: Option<String>,
    pub passed: bool,
    pub severity: Severity,
    pub message: String,
}

impl CheckOutcome {
    fn pass(kind: CheckKind, column: Option<&str>, message: String) -> Self {
        Self {
            kind,
            column: column.map(str::to_string),
            passed: true,
            severity: Severity::Error,
            message,
        }
    }

    fn fail(kind: CheckKind, column: Option<&str>, message: String) -> Self {
        Self {
            kind,
            column: column.map(str::to_string),
            passed: false,
            severity: Severity::Error,
            message,
        }
    }

    fn warn(kind: CheckKind, column: Option<&str>, message: String) -> Self {
        Self {
            kind,
            column: column.map(str::to_string),
            passed: false,
            severity: Severity::Warning,
            message,
        }
    }

    pub fn is_failure(&self) -> bool {
        !self.passed && self.severity == Severity::Error
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub row_count: usize,
    pub column_count: usize,
    pub outcomes: Vec<CheckOutcome>,
}

impl QualityReport {
    pub fn passed(&self) -> bool {
        !self.outcomes.iter().any(CheckOutcome::is_failure)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.is_failure())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.passed && outcome.severity == Severity::Warning)
    }

    pub fn failed_kinds(&self) -> BTreeSet<&'static str> {
        self.failures().map(|outcome| outcome.kind.as_str()).collect()
    }

    pub fn failure_summary(&self) -> String {
        let messages: Vec<&str> = self.failures().map(|outcome| outcome.message.as_str()).collect();
        if messages.is_empty() {
            "no failed checks".to_string()
        } else {
            messages.join("; ")
        }
    }
}

/// Runs every check and collects the outcomes without failing.
pub fn evaluate(df: &DataFrame, config: &QualityConfig, now: DateTime<Utc>) -> Result<QualityReport> {
    let mut outcomes = Vec::new();

    outcomes.extend(check_null_fractions(df, config)?);
    outcomes.push(check_schema(df, config));
    outcomes.push(check_row_count(df, config));
    outcomes.extend(check_numeric_columns(df, config)?);
    if let Some(outcome) = check_freshness(df, config, now)? {
        outcomes.push(outcome);
    }

    for outcome in &outcomes {
        let column = outcome.column.as_deref().unwrap_or("-");
        match (outcome.passed, outcome.severity) {
            (true, _) => info!(check = %outcome.kind, column, "{}", outcome.message),
            (false, Severity::Warning) => warn!(check = %outcome.kind, column, "{}", outcome.message),
            (false, Severity::Error) => error!(check = %outcome.kind, column, "{}", outcome.message),
        }
    }

    Ok(QualityReport {
        row_count: df.height(),
        column_count: df.width(),
        outcomes,
    })
}

/// Evaluates the gate and turns any failed check into [`PipelineError::QualityGate`].
pub fn enforce(df: &DataFrame, config: &QualityConfig, now: DateTime<Utc>) -> Result<QualityReport> {
    let report = evaluate(df, config, now)?;
    if report.passed() {
        info!(rows = report.row_count, "all quality checks passed");
        Ok(report)
    } else {
        Err(PipelineError::QualityGate(report))
    }
}

pub fn check_file(path: &Path, config: &QualityConfig, now: DateTime<Utc>) -> Result<QualityReport> {
    info!(path = %path.display(), "running quality gate");
    let df = dataset::read_csv(path)?;
    enforce(&df, config, now)
}

fn null_count(column: &Column) -> Result<usize> {
    if column.dtype() == &DataType::String {
        let values = column.str()?;
        Ok(values
            .into_iter()
            .filter(|value| value.map_or(true, |text| text.trim().is_empty()))
            .count())
    } else {
        Ok(column.null_count())
    }
}

fn check_null_fractions(df: &DataFrame, config: &QualityConfig) -> Result<Vec<CheckOutcome>> {
    let rows = df.height();
    let keys: Vec<String> = if config.key_columns.is_empty() {
        dataset::column_names(df)
    } else {
        config.key_columns.clone()
    };

    let mut outcomes = Vec::with_capacity(keys.len());
    for name in &keys {
        let Ok(column) = df.column(name) else {
            outcomes.push(CheckOutcome::fail(
                CheckKind::NullFraction,
                Some(name),
                format!("{name}: key column missing from dataset"),
            ));
            continue;
        };
        let nulls = null_count(column)?;
        let fraction = if rows == 0 {
            0.0
        } else {
            nulls as f64 / rows as f64
        };

        let message = format!(
            "{name}: {:.2}% null values (threshold: {:.2}%)",
            fraction * 100.0,
            config.max_null_fraction * 100.0
        );
        if fraction > config.max_null_fraction {
            outcomes.push(CheckOutcome::fail(CheckKind::NullFraction, Some(name), message));
        } else {
            outcomes.push(CheckOutcome::pass(CheckKind::NullFraction, Some(name), message));
        }
    }
    Ok(outcomes)
}

fn check_schema(df: &DataFrame, config: &QualityConfig) -> CheckOutcome {
    if config.expected_columns.is_empty() {
        return CheckOutcome::pass(
            CheckKind::Schema,
            None,
            "no expected columns declared; schema check skipped".to_string(),
        );
    }

    let actual: BTreeSet<String> = dataset::column_names(df).into_iter().collect();
    let expected: BTreeSet<String> = config.expected_columns.iter().cloned().collect();

    let missing: Vec<&String> = expected.difference(&actual).collect();
    let unexpected: Vec<&String> = match config.schema_mode {
        SchemaMode::Exact => actual.difference(&expected).collect(),
        SchemaMode::Superset => Vec::new(),
    };

    let mut reasons = Vec::new();
    if !missing.is_empty() {
        reasons.push(format!("missing required columns: {missing:?}"));
    }
    if !unexpected.is_empty() {
        reasons.push(format!("unexpected columns: {unexpected:?}"));
    }

    if reasons.is_empty() {
        CheckOutcome::pass(
            CheckKind::Schema,
            None,
            format!("schema matches {} declared columns", expected.len()),
        )
    } else {
        CheckOutcome::fail(CheckKind::Schema, None, format!("schema mismatch: {}", reasons.join("; ")))
    }
}

fn check_row_count(df: &DataFrame, config: &QualityConfig) -> CheckOutcome {
    let rows = df.height();
    if rows < config.min_rows {
        CheckOutcome::fail(
            CheckKind::RowCount,
            None,
            format!("insufficient data rows: {rows} (minimum: {})", config.min_rows),
        )
    } else {
        CheckOutcome::pass(
            CheckKind::RowCount,
            None,
            format!("data volume: {rows} rows (minimum: {})", config.min_rows),
        )
    }
}

fn check_numeric_columns(df: &DataFrame, config: &QualityConfig) -> Result<Vec<CheckOutcome>> {
    let mut outcomes = Vec::with_capacity(config.numeric_columns.len());
    for name in &config.numeric_columns {
        let Ok(column) = df.column(name) else {
            continue;
        };
        if is_numeric_dtype(column.dtype()) {
            outcomes.push(CheckOutcome::pass(
                CheckKind::NumericType,
                Some(name),
                format!("{name}: numeric dtype {}", column.dtype()),
            ));
            continue;
        }

        let rendered = dataset::string_values(df, name)?;
        let bad: Vec<String> = rendered
            .into_iter()
            .flatten()
            .filter(|value| !value.trim().is_empty() && value.trim().parse::<f64>().is_err())
            .take(3)
            .collect();

        if bad.is_empty() {
            outcomes.push(CheckOutcome::pass(
                CheckKind::NumericType,
                Some(name),
                format!("{name}: all values parse as numbers"),
            ));
        } else {
            outcomes.push(CheckOutcome::fail(
                CheckKind::NumericType,
                Some(name),
                format!("{name} cannot be converted to numeric (e.g. {bad:?})"),
            ));
        }
    }
    Ok(outcomes)
}

fn check_freshness(
    df: &DataFrame,
    config: &QualityConfig,
    now: DateTime<Utc>,
) -> Result<Option<CheckOutcome>> {
    let (Some(column), Some(max_days)) = (&config.timestamp_column, config.max_staleness_days) else {
        return Ok(None);
    };

    if df.column(column).is_err() {
        return Ok(Some(CheckOutcome::warn(
            CheckKind::Freshness,
            Some(column),
            format!("timestamp column {column} not present; freshness unknown"),
        )));
    }

    let latest = dataset::string_values(df, column)?
        .into_iter()
        .flatten()
        .filter_map(|value| parse_timestamp(&value))
        .max();

    let Some(latest) = latest else {
        return Ok(Some(CheckOutcome::warn(
            CheckKind::Freshness,
            Some(column),
            format!("no parseable timestamps in {column}; freshness unknown"),
        )));
    };

    let days_old = (now - latest).num_days();
    if days_old > max_days {
        Ok(Some(CheckOutcome::warn(
            CheckKind::Freshness,
            Some(column),
            format!("data is {days_old} days old (limit: {max_days})"),
        )))
    } else {
        Ok(Some(CheckOutcome::pass(
            CheckKind::Freshness,
            Some(column),
            format!("latest data is {days_old} days old"),
        )))
    }
}

pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
