use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use comfy_table::presets::ASCII_MARKDOWN;
use comfy_table::Table;
use driftline_tracking::{resolve_pair, ModelVersion, ResolvedVersion, RunMetrics, TrackingBackend};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ComparisonConfig;
use crate::error::Result;

/// Absolute changes below this are treated as no change.
pub const TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricStatus {
    Improved,
    Degraded,
    Unchanged,
    Missing,
}

impl MetricStatus {
    pub fn label(&self) -> &'static str {
        match self {
            MetricStatus::Improved => "Improved",
            MetricStatus::Degraded => "Degraded",
            MetricStatus::Unchanged => "No Change",
            MetricStatus::Missing => "Missing",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricDelta {
    pub metric: String,
    pub baseline: Option<f64>,
    pub candidate: Option<f64>,
    pub change: Option<f64>,
    pub change_pct: Option<f64>,
    pub status: MetricStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Promote,
    Hold,
    Reject,
    SameModel,
}

impl Recommendation {
    pub fn describe(&self) -> &'static str {
        match self {
            Recommendation::Promote => {
                "**PROMOTE**: the candidate improves the primary metric past the promotion margin."
            }
            Recommendation::Hold => {
                "**HOLD**: the candidate does not improve the primary metric enough to promote."
            }
            Recommendation::Reject => {
                "**REJECT**: the candidate degrades at least one metric. Do not promote."
            }
            Recommendation::SameModel => {
                "**SAME MODEL**: both sides resolve to the same model version. No promotion needed."
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelComparison {
    pub baseline: ModelVersion,
    pub candidate: ModelVersion,
    pub deltas: Vec<MetricDelta>,
    pub primary_metric: String,
    pub recommendation: Recommendation,
}

impl ModelComparison {
    pub fn has_regression(&self) -> bool {
        self.deltas
            .iter()
            .any(|delta| delta.status == MetricStatus::Degraded)
    }

    pub fn same_model(&self) -> bool {
        self.recommendation == Recommendation::SameModel
    }

    pub fn delta(&self, metric: &str) -> Option<&MetricDelta> {
        self.deltas.iter().find(|delta| delta.metric == metric)
    }
}

/// Compares every configured metric, honoring each metric's direction.
pub fn compare_metrics(
    baseline: &RunMetrics,
    candidate: &RunMetrics,
    config: &ComparisonConfig,
) -> Vec<MetricDelta> {
    config
        .metrics
        .iter()
        .map(|metric| {
            let base = baseline.metric(metric);
            let cand = candidate.metric(metric);
            let (Some(base_value), Some(cand_value)) = (base, cand) else {
                return MetricDelta {
                    metric: metric.clone(),
                    baseline: base,
                    candidate: cand,
                    change: None,
                    change_pct: None,
                    status: MetricStatus::Missing,
                };
            };

            let change = cand_value - base_value;
            let change_pct = if base_value == 0.0 {
                0.0
            } else {
                change / base_value.abs() * 100.0
            };
            let improvement = if config.is_lower_better(metric) { -change } else { change };
            let status = if change.abs() < TOLERANCE {
                MetricStatus::Unchanged
            } else if improvement > 0.0 {
                MetricStatus::Improved
            } else {
                MetricStatus::Degraded
            };

            MetricDelta {
                metric: metric.clone(),
                baseline: Some(base_value),
                candidate: Some(cand_value),
                change: Some(change),
                change_pct: Some(change_pct),
                status,
            }
        })
        .collect()
}

/// Same model wins over everything; any degraded metric rejects; otherwise the
/// primary metric must improve past the promotion margin.
pub fn recommend(
    baseline: &ResolvedVersion,
    candidate: &ResolvedVersion,
    deltas: &[MetricDelta],
    config: &ComparisonConfig,
) -> Recommendation {
    if baseline.version.is_same_as(&candidate.version) {
        return Recommendation::SameModel;
    }
    if deltas.iter().any(|delta| delta.status == MetricStatus::Degraded) {
        return Recommendation::Reject;
    }
    let primary = &config.primary_metric;
    let (Some(base), Some(cand)) = (baseline.run.metric(primary), candidate.run.metric(primary)) else {
        warn!(metric = %primary, "primary metric missing on one side; holding");
        return Recommendation::Hold;
    };
    let improvement = if config.is_lower_better(primary) {
        base - cand
    } else {
        cand - base
    };
    if improvement > config.promotion_margin && improvement >= TOLERANCE {
        Recommendation::Promote
    } else {
        Recommendation::Hold
    }
}

pub fn compare_resolved(
    baseline: ResolvedVersion,
    candidate: ResolvedVersion,
    config: &ComparisonConfig,
) -> ModelComparison {
    let deltas = compare_metrics(&baseline.run, &candidate.run, config);
    let recommendation = recommend(&baseline, &candidate, &deltas, config);
    if recommendation == Recommendation::SameModel {
        warn!(
            version = %candidate.version.version,
            "comparing the same model version; the comparison may not be meaningful"
        );
    }
    ModelComparison {
        baseline: baseline.version,
        candidate: candidate.version,
        deltas,
        primary_metric: config.primary_metric.clone(),
        recommendation,
    }
}

/// Resolves both stages on `backend` and compares their runs.
pub async fn compare_stages(
    backend: &dyn TrackingBackend,
    model: &str,
    config: &ComparisonConfig,
) -> Result<ModelComparison> {
    let (baseline, candidate) =
        resolve_pair(backend, model, config.baseline_stage, config.candidate_stage).await?;
    info!(
        backend = backend.name(),
        model,
        baseline = %baseline.version.version,
        candidate = %candidate.version.version,
        "resolved model versions"
    );
    Ok(compare_resolved(baseline, candidate, config))
}

fn signed(value: f64, decimals: usize) -> String {
    let sign = if value >= 0.0 { "+" } else { "" };
    format!("{sign}{value:.decimals$}")
}

fn fmt_value(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}"))
}

fn side_label(side: &str, version: &ModelVersion) -> String {
    format!("{side} ({})", version.current_stage)
}

fn version_line(label: &str, version: &ModelVersion) -> String {
    format!(
        "- **{label}**: v{} (Run: {})\n",
        version.version,
        version.short_run_id()
    )
}

fn details(out: &mut String, label: &str, version: &ModelVersion) {
    let registered = version
        .creation_timestamp
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map_or_else(|| "unknown".to_string(), |ts| ts.to_rfc3339());
    let _ = write!(
        out,
        "\n### {label} Model\n- Version: {}\n- Stage: {}\n- Registered: {registered}\n",
        version.version, version.current_stage
    );
}

pub fn render_markdown(comparison: &ModelComparison) -> String {
    let baseline_label = side_label("Baseline", &comparison.baseline);
    let candidate_label = side_label("Candidate", &comparison.candidate);

    let mut table = Table::new();
    table
        .load_preset(ASCII_MARKDOWN)
        .set_header(vec!["Metric", "Baseline", "Candidate", "Change", "Status"]);
    for delta in &comparison.deltas {
        let change = match (delta.change, delta.change_pct) {
            (Some(change), Some(pct)) => format!("{} ({}%)", signed(change, 4), signed(pct, 2)),
            _ => "n/a".to_string(),
        };
        table.add_row(vec![
            delta.metric.clone(),
            fmt_value(delta.baseline),
            fmt_value(delta.candidate),
            change,
            delta.status.label().to_string(),
        ]);
    }

    let mut out = String::from("# Model Performance Comparison\n\n## Model Versions\n");
    out.push_str(&version_line(&baseline_label, &comparison.baseline));
    out.push_str(&version_line(&candidate_label, &comparison.candidate));
    let _ = write!(out, "\n## Metrics Comparison\n\n{table}\n");
    let _ = write!(
        out,
        "\n## Recommendation\n\n{}\n\n## Model Details\n",
        comparison.recommendation.describe()
    );
    details(&mut out, &baseline_label, &comparison.baseline);
    details(&mut out, &candidate_label, &comparison.candidate);
    out
}

pub fn write_report(comparison: &ModelComparison, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, render_markdown(comparison))?;
    info!(path = %path.display(), "comparison report written");
    Ok(())
}
