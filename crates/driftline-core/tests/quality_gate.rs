use chrono::{Duration, TimeZone, Utc};
use polars::prelude::*;

use driftline_core::config::{QualityConfig, SchemaMode};
use driftline_core::error::PipelineError;
use driftline_core::quality_gate::{self, CheckKind, Severity};

fn frame(rows: usize, null_every: Option<usize>) -> DataFrame {
    let price: Vec<Option<f64>> = (0..rows)
        .map(|idx| match null_every {
            Some(step) if idx % step == 0 => None,
            _ => Some(100.0 + idx as f64),
        })
        .collect();
    let volume: Vec<i64> = (0..rows).map(|idx| idx as i64 * 10).collect();
    let symbol: Vec<&str> = vec!["ACME"; rows];
    df![
        "price" => price,
        "volume" => volume,
        "symbol" => symbol,
    ]
    .expect("frame")
}

fn config() -> QualityConfig {
    QualityConfig {
        expected_columns: vec!["price".into(), "volume".into(), "symbol".into()],
        ..QualityConfig::default()
    }
}

#[test]
fn five_percent_nulls_fail_and_name_the_column() {
    let df = frame(200, Some(20));
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

    let report = quality_gate::evaluate(&df, &config(), now).expect("evaluate");
    assert!(!report.passed());

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, CheckKind::NullFraction);
    assert_eq!(failures[0].column.as_deref(), Some("price"));
    assert!(failures[0].message.contains("5.00%"), "{}", failures[0].message);

    match quality_gate::enforce(&df, &config(), now) {
        Err(PipelineError::QualityGate(report)) => {
            assert!(report.failed_kinds().contains("null_fraction"));
        }
        other => panic!("expected quality gate failure, got {other:?}"),
    }
}

#[test]
fn clean_frame_with_enough_rows_passes() {
    let df = frame(500, None);
    let now = Utc::now();
    let report = quality_gate::enforce(&df, &config(), now).expect("gate passes");
    assert!(report.passed());
    assert_eq!(report.row_count, 500);
    assert!(report.failures().next().is_none());
}

#[test]
fn null_fraction_at_threshold_passes() {
    // 1 null in 100 rows is exactly the default 1% threshold.
    let df = frame(100, Some(100));
    let report = quality_gate::evaluate(&df, &config(), Utc::now()).expect("evaluate");
    assert!(report.passed(), "{}", report.failure_summary());
}

#[test]
fn blank_strings_count_as_nulls() {
    let symbols: Vec<&str> = (0..100).map(|idx| if idx < 5 { "  " } else { "ACME" }).collect();
    let df = df!["symbol" => symbols].expect("frame");
    let cfg = QualityConfig {
        min_rows: 1,
        ..QualityConfig::default()
    };
    let report = quality_gate::evaluate(&df, &cfg, Utc::now()).expect("evaluate");
    assert!(report.failed_kinds().contains("null_fraction"));
}

#[test]
fn too_few_rows_fail_the_row_count_check() {
    let df = frame(50, None);
    let report = quality_gate::evaluate(&df, &config(), Utc::now()).expect("evaluate");
    let kinds = report.failed_kinds();
    assert_eq!(kinds.len(), 1);
    assert!(kinds.contains("row_count"));
    assert!(report.failure_summary().contains("insufficient data rows: 50"));
}

#[test]
fn exact_schema_reports_missing_and_unexpected_columns() {
    let df = frame(150, None).drop("volume").expect("drop");
    let mut df = df;
    df.with_column(Series::new("extra".into(), vec![1i64; 150]))
        .expect("extra column");

    let report = quality_gate::evaluate(&df, &config(), Utc::now()).expect("evaluate");
    let schema = report
        .failures()
        .find(|outcome| outcome.kind == CheckKind::Schema)
        .expect("schema failure");
    assert!(schema.message.contains("missing required columns: [\"volume\"]"));
    assert!(schema.message.contains("unexpected columns: [\"extra\"]"));
}

#[test]
fn superset_schema_tolerates_extra_columns() {
    let mut df = frame(150, None);
    df.with_column(Series::new("extra".into(), vec![1i64; 150]))
        .expect("extra column");
    let cfg = QualityConfig {
        schema_mode: SchemaMode::Superset,
        ..config()
    };
    let report = quality_gate::evaluate(&df, &cfg, Utc::now()).expect("evaluate");
    assert!(report.passed(), "{}", report.failure_summary());
}

#[test]
fn empty_declared_schema_passes_with_message() {
    let df = frame(150, None);
    let report = quality_gate::evaluate(&df, &QualityConfig::default(), Utc::now()).expect("evaluate");
    let schema = report
        .outcomes
        .iter()
        .find(|outcome| outcome.kind == CheckKind::Schema)
        .expect("schema outcome");
    assert!(schema.passed);
    assert!(schema.message.contains("no expected columns declared"));
}

#[test]
fn non_numeric_text_fails_the_numeric_check() {
    let amounts: Vec<&str> = (0..120).map(|idx| if idx == 7 { "n/a" } else { "12.5" }).collect();
    let df = df!["amount" => amounts].expect("frame");
    let cfg = QualityConfig {
        numeric_columns: vec!["amount".into()],
        ..QualityConfig::default()
    };
    let report = quality_gate::evaluate(&df, &cfg, Utc::now()).expect("evaluate");
    let failure = report.failures().next().expect("numeric failure");
    assert_eq!(failure.kind, CheckKind::NumericType);
    assert!(failure.message.contains("n/a"));
}

#[test]
fn stale_data_only_warns() {
    let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    let stale = (now - Duration::days(30)).format("%Y-%m-%d %H:%M:%S").to_string();
    let df = df![
        "value" => vec![1.0f64; 120],
        "collected_at" => vec![stale.as_str(); 120],
    ]
    .expect("frame");
    let cfg = QualityConfig {
        timestamp_column: Some("collected_at".into()),
        max_staleness_days: Some(7),
        ..QualityConfig::default()
    };

    let report = quality_gate::enforce(&df, &cfg, now).expect("warnings do not fail the gate");
    let warnings: Vec<_> = report.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].severity, Severity::Warning);
    assert_eq!(warnings[0].kind, CheckKind::Freshness);
    assert!(warnings[0].message.contains("30 days old"));
}

#[test]
fn check_file_reports_missing_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("absent.csv");
    let err = quality_gate::check_file(&missing, &QualityConfig::default(), Utc::now())
        .expect_err("missing file");
    assert!(matches!(err, PipelineError::MissingInput(path) if path == missing));
}

#[test]
fn missing_key_column_fails_the_null_check() {
    let df = frame(150, None);
    let cfg = QualityConfig {
        key_columns: vec!["price".into(), "region".into()],
        ..QualityConfig::default()
    };
    let report = quality_gate::evaluate(&df, &cfg, Utc::now()).expect("evaluate");
    let failure = report.failures().next().expect("missing key column");
    assert_eq!(failure.kind, CheckKind::NullFraction);
    assert_eq!(failure.column.as_deref(), Some("region"));
    assert!(failure.message.contains("key column missing"));
}

#[test]
fn default_config_checks_freshness_of_collection_stamp() {
    let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    let stamp = (now - Duration::days(1)).format("%Y-%m-%d %H:%M:%S").to_string();
    let df = df![
        "value" => vec![1.0f64; 120],
        "collected_at" => vec![stamp.as_str(); 120],
    ]
    .expect("frame");

    let report = quality_gate::evaluate(&df, &QualityConfig::default(), now).expect("evaluate");
    let freshness = report
        .outcomes
        .iter()
        .find(|outcome| outcome.kind == CheckKind::Freshness)
        .expect("freshness outcome");
    assert!(freshness.passed, "{}", freshness.message);
    assert!(freshness.message.contains("1 days old"));
}
