use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use driftline_tracking::Stage;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "driftline.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub ingestion: IngestionConfig,
    pub quality: QualityConfig,
    pub cleaning: CleaningConfig,
    pub features: FeatureConfig,
    pub training: TrainingConfig,
    pub comparison: ComparisonConfig,
    pub tracking: TrackingConfig,
    pub drift: DriftConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub models_dir: PathBuf,
    pub reference_stats: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            processed_dir: PathBuf::from("data/processed"),
            reports_dir: PathBuf::from("data/reports"),
            models_dir: PathBuf::from("models"),
            reference_stats: PathBuf::from("data/reference_stats.json"),
        }
    }
}

impl PathsConfig {
    pub fn latest_raw(&self) -> PathBuf {
        self.raw_dir.join(crate::dataset::LATEST_FILE)
    }

    pub fn latest_processed(&self) -> PathBuf {
        self.processed_dir.join(crate::dataset::LATEST_FILE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestionSource {
    Api {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        /// JSON pointer (e.g. `/data/items`) to the record array in the response.
        #[serde(default)]
        records_pointer: Option<String>,
    },
    Files {
        pattern: String,
        /// Keep only the last N rows after stacking.
        #[serde(default)]
        keep_latest: Option<usize>,
    },
}

impl Default for IngestionSource {
    fn default() -> Self {
        IngestionSource::Files {
            pattern: "data/production.csv".to_string(),
            keep_latest: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub source: IngestionSource,
    pub timestamp_column: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            source: IngestionSource::default(),
            timestamp_column: "collected_at".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    /// Column set must equal the declared columns.
    #[default]
    Exact,
    /// Declared columns must be present; extra columns are allowed.
    Superset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub max_null_fraction: f64,
    /// Columns subject to the null check. Empty means every column.
    pub key_columns: Vec<String>,
    pub expected_columns: Vec<String>,
    pub schema_mode: SchemaMode,
    pub min_rows: usize,
    pub numeric_columns: Vec<String>,
    pub timestamp_column: Option<String>,
    pub max_staleness_days: Option<i64>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            max_null_fraction: 0.01,
            key_columns: Vec::new(),
            expected_columns: Vec::new(),
            schema_mode: SchemaMode::Exact,
            min_rows: 100,
            numeric_columns: Vec::new(),
            timestamp_column: Some("collected_at".to_string()),
            max_staleness_days: Some(7),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum FillStrategy {
    Median,
    MostFrequent,
    Constant { value: serde_json::Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillRule {
    pub column: String,
    #[serde(flatten)]
    pub strategy: FillStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlierRule {
    pub column: String,
    #[serde(default = "default_iqr_multiplier")]
    pub iqr_multiplier: f64,
}

fn default_iqr_multiplier() -> f64 {
    1.5
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    pub drop_columns: Vec<String>,
    pub currency_columns: Vec<String>,
    pub fill: Vec<FillRule>,
    pub outlier: Option<OutlierRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub column: String,
    #[serde(default = "default_horizon")]
    pub horizon: usize,
    #[serde(default = "default_target_name")]
    pub name: String,
}

fn default_horizon() -> usize {
    1
}

fn default_target_name() -> String {
    "target".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub order_by: Option<String>,
    pub source_columns: Vec<String>,
    pub lags: Vec<usize>,
    pub rolling_windows: Vec<usize>,
    pub target: Option<TargetConfig>,
    pub drop_incomplete: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            order_by: None,
            source_columns: Vec::new(),
            lags: vec![1, 2, 3],
            rolling_windows: vec![3, 7],
            target: None,
            drop_incomplete: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub target: String,
    /// Explicit feature columns. Empty means every numeric column except the
    /// target and `exclude_columns`.
    pub feature_columns: Vec<String>,
    pub exclude_columns: Vec<String>,
    pub test_fraction: f64,
    pub l2_penalty: f64,
    pub stage: Stage,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            target: "target".to_string(),
            feature_columns: Vec::new(),
            exclude_columns: Vec::new(),
            test_fraction: 0.2,
            l2_penalty: 1e-3,
            stage: Stage::Staging,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    pub baseline_stage: Stage,
    pub candidate_stage: Stage,
    pub metrics: Vec<String>,
    pub primary_metric: String,
    /// Minimum improvement of the primary metric required to promote.
    pub promotion_margin: f64,
    pub lower_is_better: Vec<String>,
    pub report_path: PathBuf,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            baseline_stage: Stage::Production,
            candidate_stage: Stage::Staging,
            metrics: vec!["rmse".to_string(), "mae".to_string(), "r2".to_string()],
            primary_metric: "rmse".to_string(),
            promotion_margin: 0.0,
            lower_is_better: vec!["rmse".to_string(), "mae".to_string(), "mse".to_string()],
            report_path: PathBuf::from("comparison_report.md"),
        }
    }
}

impl ComparisonConfig {
    pub fn is_lower_better(&self, metric: &str) -> bool {
        self.lower_is_better.iter().any(|name| name == metric)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingBackendKind {
    #[default]
    Local,
    Mlflow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub backend: TrackingBackendKind,
    pub model_name: String,
    pub local_dir: PathBuf,
    pub mlflow_uri: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            backend: TrackingBackendKind::Local,
            model_name: "driftline_model".to_string(),
            local_dir: PathBuf::from("tracking"),
            mlflow_uri: None,
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub columns: Vec<String>,
    pub z_threshold: f64,
    pub window: usize,
    pub max_drift_ratio: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            z_threshold: 3.0,
            window: 100,
            max_drift_ratio: 0.1,
        }
    }
}

impl PipelineConfig {
    /// Loads the TOML config at `path`, or `driftline.toml` when no path is
    /// given. A missing default file yields the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(PipelineError::MissingInput(path.to_path_buf()));
                }
                Self::from_file(path)?
            }
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    info!("no {DEFAULT_CONFIG_FILE} found; using built-in defaults");
                    Self::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&text)?;
        info!(path = %path.display(), "loaded pipeline config");
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uri) = lookup("MLFLOW_TRACKING_URI") {
            self.tracking.mlflow_uri = Some(uri);
            self.tracking.backend = TrackingBackendKind::Mlflow;
        }
        if let Some(user) = lookup("MLFLOW_USERNAME") {
            self.tracking.username = Some(user);
        }
        if let Some(pass) = lookup("MLFLOW_PASSWORD") {
            self.tracking.password = Some(pass);
        }
        if let Some(model) = lookup("MODEL_NAME") {
            self.tracking.model_name = model;
        }
        if let Some(url) = lookup("DRIFTLINE_API_URL") {
            let (headers, records_pointer) = match &self.ingestion.source {
                IngestionSource::Api {
                    headers,
                    records_pointer,
                    ..
                } => (headers.clone(), records_pointer.clone()),
                IngestionSource::Files { .. } => (BTreeMap::new(), None),
            };
            self.ingestion.source = IngestionSource::Api {
                url,
                headers,
                records_pointer,
            };
        }
        if let Some(raw) = lookup("DRIFTLINE_MIN_ROWS") {
            self.quality.min_rows = raw.trim().parse().map_err(|_| {
                PipelineError::Validation(format!("DRIFTLINE_MIN_ROWS '{raw}' is not an integer"))
            })?;
        }
        if let Some(raw) = lookup("DRIFTLINE_MAX_NULL_FRACTION") {
            self.quality.max_null_fraction = raw.trim().parse().map_err(|_| {
                PipelineError::Validation(format!(
                    "DRIFTLINE_MAX_NULL_FRACTION '{raw}' is not a number"
                ))
            })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.quality.max_null_fraction) {
            return Err(PipelineError::Validation(format!(
                "quality.max_null_fraction must be within [0, 1], got {}",
                self.quality.max_null_fraction
            )));
        }
        if !(self.training.test_fraction > 0.0 && self.training.test_fraction < 1.0) {
            return Err(PipelineError::Validation(format!(
                "training.test_fraction must be within (0, 1), got {}",
                self.training.test_fraction
            )));
        }
        if self.training.l2_penalty < 0.0 {
            return Err(PipelineError::Validation(
                "training.l2_penalty must not be negative".to_string(),
            ));
        }
        if self.features.lags.contains(&0) {
            return Err(PipelineError::Validation(
                "features.lags must be positive offsets".to_string(),
            ));
        }
        // A sample std needs at least two values.
        if let Some(window) = self.features.rolling_windows.iter().find(|window| **window < 2) {
            return Err(PipelineError::Validation(format!(
                "features.rolling_windows must be at least 2, got {window}"
            )));
        }
        if let Some(target) = &self.features.target {
            if target.horizon == 0 {
                return Err(PipelineError::Validation(
                    "features.target.horizon must be positive".to_string(),
                ));
            }
        }
        if self.drift.window == 0 {
            return Err(PipelineError::Validation(
                "drift.window must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
