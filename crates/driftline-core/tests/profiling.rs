use polars::prelude::*;

use driftline_core::profiling;

#[test]
fn numeric_and_text_columns_are_profiled() -> PolarsResult<()> {
    let df = df![
        "price" => [Some(2.0f64), Some(4.0), None, Some(6.0)],
        "symbol" => ["a", "b", "c", "d"],
    ]?;

    let profile = profiling::profile(&df).expect("profile");
    assert_eq!(profile.rows, 4);

    let price = profile.column("price").expect("price");
    assert_eq!((price.non_null, price.nulls), (3, 1));
    let stats = price.numeric.as_ref().expect("numeric stats");
    assert_eq!(stats.mean, Some(4.0));
    assert_eq!(stats.std, Some(2.0));
    assert_eq!((stats.min, stats.max), (Some(2.0), Some(6.0)));

    let symbol = profile.column("symbol").expect("symbol");
    assert!(symbol.numeric.is_none());
    assert_eq!(symbol.nulls, 0);
    Ok(())
}

#[test]
fn markdown_lists_shape_and_every_column() -> PolarsResult<()> {
    let df = df![
        "price" => [1.0f64, 3.0],
        "symbol" => ["a", "b"],
    ]?;
    let rendered = profiling::render_markdown(&profiling::profile(&df).expect("profile"));
    assert!(rendered.contains("Shape: 2 rows x 2 columns"));
    assert!(rendered.contains("| Column"));
    assert!(rendered.contains("price"));
    assert!(rendered.contains("2.0000"));
    assert!(rendered.lines().any(|line| line.contains("symbol") && line.contains(" - ")));
    Ok(())
}
