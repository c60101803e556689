use chrono::{TimeZone, Utc};
use polars::prelude::*;
use proptest::prelude::*;

use driftline_core::config::{FeatureConfig, PipelineConfig, TargetConfig};
use driftline_core::dataset;
use driftline_core::error::PipelineError;
use driftline_core::features::{self, FeatureError};

fn assert_close(actual: Option<f64>, expected: f64) {
    let value = actual.expect("value present");
    assert!((value - expected).abs() < 1e-9, "expected {expected}, got {value}");
}

fn price_frame() -> DataFrame {
    df![
        "day" => [1i64, 2, 3, 4, 5, 6],
        "price" => [10.0f64, 12.0, 11.0, 15.0, 14.0, 18.0],
    ]
    .expect("frame")
}

fn feature_config() -> FeatureConfig {
    FeatureConfig {
        order_by: Some("day".into()),
        source_columns: vec!["price".into()],
        lags: vec![1, 2],
        rolling_windows: vec![3],
        target: Some(TargetConfig {
            column: "price".into(),
            horizon: 1,
            name: "target".into(),
        }),
        drop_incomplete: false,
    }
}

#[test]
fn lag_and_rolling_values_use_past_rows_only() -> PolarsResult<()> {
    let (df, summary) = features::derive_features(&price_frame(), &feature_config()).expect("features");
    assert_eq!(summary.input_rows, 6);
    assert_eq!(summary.output_rows, 6);
    assert_eq!(
        summary.added_columns,
        vec![
            "price_lag_1",
            "price_lag_2",
            "price_rolling_mean_3",
            "price_rolling_std_3",
            "target"
        ]
    );

    let lag_1 = df.column("price_lag_1")?.f64()?;
    assert_eq!(lag_1.get(0), None);
    assert_close(lag_1.get(3), 11.0);

    let lag_2 = df.column("price_lag_2")?.f64()?;
    assert_eq!(lag_2.get(1), None);
    assert_close(lag_2.get(5), 15.0);

    let mean = df.column("price_rolling_mean_3")?.f64()?;
    assert_eq!(mean.get(1), None);
    assert_close(mean.get(2), 11.0);
    assert_close(mean.get(5), (15.0 + 14.0 + 18.0) / 3.0);

    let std = df.column("price_rolling_std_3")?.f64()?;
    assert_close(std.get(2), 1.0);

    let target = df.column("target")?.f64()?;
    assert_close(target.get(0), 12.0);
    assert_eq!(target.get(5), None);
    Ok(())
}

#[test]
fn incomplete_rows_are_dropped() -> PolarsResult<()> {
    let cfg = FeatureConfig {
        drop_incomplete: true,
        ..feature_config()
    };
    let (df, summary) = features::derive_features(&price_frame(), &cfg).expect("features");
    // Rows 0-1 lack lags or a full window and row 5 has no target.
    assert_eq!(summary.output_rows, 3);
    let days: Vec<Option<i64>> = df.column("day")?.i64()?.into_iter().collect();
    assert_eq!(days, vec![Some(3), Some(4), Some(5)]);
    Ok(())
}

#[test]
fn rows_are_sorted_before_deriving() -> PolarsResult<()> {
    let shuffled = df![
        "day" => [3i64, 1, 2],
        "price" => [30.0f64, 10.0, 20.0],
    ]?;
    let cfg = FeatureConfig {
        lags: vec![1],
        rolling_windows: vec![],
        target: None,
        ..feature_config()
    };
    let (df, _) = features::derive_features(&shuffled, &cfg).expect("features");
    let lag: Vec<Option<f64>> = df.column("price_lag_1")?.f64()?.into_iter().collect();
    assert_eq!(lag, vec![None, Some(10.0), Some(20.0)]);
    Ok(())
}

#[test]
fn missing_source_column_is_reported() {
    let cfg = FeatureConfig {
        source_columns: vec!["volume".into()],
        ..feature_config()
    };
    let err = features::derive_features(&price_frame(), &cfg).expect_err("missing column");
    assert!(matches!(err, FeatureError::MissingColumn { column } if column == "volume"));
}

#[test]
fn derived_names_must_not_overwrite_existing_columns() {
    let df = df![
        "price" => [1.0f64, 2.0, 3.0],
        "price_lag_1" => [0.0f64, 0.0, 0.0],
    ]
    .expect("frame");
    let cfg = FeatureConfig {
        order_by: None,
        rolling_windows: vec![],
        lags: vec![1],
        target: None,
        ..feature_config()
    };
    let err = features::derive_features(&df, &cfg).expect_err("collision");
    assert!(matches!(err, FeatureError::NameCollision { column } if column == "price_lag_1"));
}

#[test]
fn window_with_a_null_yields_null() {
    let values = vec![Some(1.0), None, Some(3.0), Some(4.0), Some(5.0)];
    let means = features::rolling_mean(&values, 2);
    assert_eq!(means, vec![None, None, None, Some(3.5), Some(4.5)]);
    assert_eq!(features::lead(&values, 2), vec![Some(3.0), Some(4.0), Some(5.0), None, None]);
}

#[test]
fn transform_round_trips_through_csv() -> Result<(), PipelineError> {
    let dir = tempfile::tempdir()?;
    let mut config = PipelineConfig::default();
    config.paths.raw_dir = dir.path().join("raw");
    config.paths.processed_dir = dir.path().join("processed");
    config.features = FeatureConfig {
        drop_incomplete: true,
        ..feature_config()
    };

    let mut raw = price_frame();
    dataset::write_csv(&mut raw, &config.paths.latest_raw())?;

    let now = Utc.with_ymd_and_hms(2025, 2, 3, 4, 5, 6).unwrap();
    let outcome = features::transform(&config, now)?;
    assert!(outcome
        .output_path
        .ends_with("processed/processed_20250203_040506.csv"));
    assert_eq!(outcome.features.output_rows, 3);

    let reloaded = dataset::read_csv(&outcome.latest_path)?;
    let expected = features::derive_features(&price_frame(), &config.features)?.0;
    for name in ["price_lag_1", "price_rolling_mean_3", "price_rolling_std_3", "target"] {
        let written = dataset::float_values(&reloaded, name)?;
        let original = dataset::float_values(&expected, name)?;
        assert_eq!(written.len(), original.len());
        for (a, b) in written.iter().zip(&original) {
            let (a, b) = (a.expect("written value"), b.expect("original value"));
            assert!((a - b).abs() < 1e-9, "{name}: {a} != {b}");
        }
    }
    Ok(())
}

#[test]
fn transform_without_raw_data_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = PipelineConfig::default();
    config.paths.raw_dir = dir.path().join("raw");
    let err = features::transform(&config, Utc::now()).expect_err("no raw data");
    assert!(matches!(err, PipelineError::MissingInput(_)));
}

proptest! {
    #[test]
    fn derived_values_ignore_future_rows(
        values in proptest::collection::vec(-1_000.0f64..1_000.0, 8..40),
        cut in 0usize..8,
        replacement in -1_000.0f64..1_000.0,
    ) {
        let series: Vec<Option<f64>> = values.iter().copied().map(Some).collect();
        let idx = cut.min(series.len() - 1);
        let mut altered = series.clone();
        for value in altered.iter_mut().skip(idx + 1) {
            *value = Some(replacement);
        }

        for window in [2usize, 3, 5] {
            prop_assert_eq!(
                &features::rolling_mean(&series, window)[..=idx],
                &features::rolling_mean(&altered, window)[..=idx]
            );
            prop_assert_eq!(
                &features::rolling_std(&series, window)[..=idx],
                &features::rolling_std(&altered, window)[..=idx]
            );
        }
        for offset in [1usize, 2, 3] {
            prop_assert_eq!(
                &features::lag(&series, offset)[..=idx],
                &features::lag(&altered, offset)[..=idx]
            );
        }
    }
}
