use polars::prelude::*;

use driftline_core::cleaning::{self, median, most_frequent, parse_currency, quantile};
use driftline_core::config::{CleaningConfig, FillRule, FillStrategy, OutlierRule};
use driftline_core::dataset;

#[test]
fn currency_text_parses_into_numbers() {
    assert_eq!(parse_currency("£1,234.50 "), Some(1234.5));
    assert_eq!(parse_currency("-$20"), Some(-20.0));
    assert_eq!(parse_currency("n/a"), None);
}

#[test]
fn quantiles_interpolate_linearly() {
    let sorted = [1.0, 2.0, 3.0, 4.0];
    assert_eq!(quantile(&sorted, 0.25), Some(1.75));
    assert_eq!(quantile(&sorted, 0.75), Some(3.25));
    assert_eq!(quantile(&[], 0.5), None);
    assert_eq!(median(&[5.0, 1.0, 3.0]), Some(3.0));
}

#[test]
fn most_frequent_prefers_smallest_on_ties() {
    let values: Vec<String> = ["b", "a", "b", "a", "c"].iter().map(|v| v.to_string()).collect();
    assert_eq!(most_frequent(&values).as_deref(), Some("a"));
}

#[test]
fn clean_applies_every_configured_step() -> PolarsResult<()> {
    let df = df![
        "id" => [1i64, 2, 3, 4, 5, 6],
        "charges" => ["£100", "£110", "£1,000", "£105", "£95", "£102"],
        "age" => [Some(30.0f64), None, Some(40.0), Some(50.0), None, Some(20.0)],
        "region" => [Some("north"), Some("south"), None, Some("south"), Some("east"), Some("")],
    ]?;
    let config = CleaningConfig {
        drop_columns: vec!["id".into(), "not_there".into()],
        currency_columns: vec!["charges".into()],
        fill: vec![
            FillRule {
                column: "age".into(),
                strategy: FillStrategy::Median,
            },
            FillRule {
                column: "region".into(),
                strategy: FillStrategy::MostFrequent,
            },
        ],
        outlier: Some(OutlierRule {
            column: "charges".into(),
            iqr_multiplier: 1.5,
        }),
    };

    let (cleaned, summary) = cleaning::clean(&df, &config).expect("clean");

    assert_eq!(summary.dropped_columns, vec!["id".to_string()]);
    assert_eq!(summary.filled.get("age"), Some(&2));
    assert_eq!(summary.filled.get("region"), Some(&2));
    assert_eq!(summary.outliers_removed, 1);
    assert_eq!(summary.output_rows, 5);
    assert!(cleaned.column("id").is_err());

    let charges = dataset::float_values(&cleaned, "charges").expect("charges");
    assert_eq!(
        charges,
        vec![Some(100.0), Some(110.0), Some(105.0), Some(95.0), Some(102.0)]
    );

    // Median of 30, 40, 50, 20 is 35.
    let ages = dataset::float_values(&cleaned, "age").expect("ages");
    assert_eq!(ages[1], Some(35.0));

    let regions = dataset::string_values(&cleaned, "region").expect("regions");
    assert_eq!(regions[4].as_deref(), Some("south"));
    Ok(())
}

#[test]
fn constant_fill_requires_a_number_for_numeric_columns() {
    let df = df!["age" => [Some(1.0f64), None]].expect("frame");
    let config = CleaningConfig {
        fill: vec![FillRule {
            column: "age".into(),
            strategy: FillStrategy::Constant {
                value: serde_json::json!("unknown"),
            },
        }],
        ..CleaningConfig::default()
    };
    assert!(cleaning::clean(&df, &config).is_err());
}
