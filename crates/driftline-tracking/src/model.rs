use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registry stage of a model version, spelled the way MLflow spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    None,
    Staging,
    Production,
    Archived,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::None => "None",
            Stage::Staging => "Staging",
            Stage::Production => "Production",
            Stage::Archived => "Archived",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Stage {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Stage::None),
            "staging" => Ok(Stage::Staging),
            "production" | "prod" => Ok(Stage::Production),
            "archived" => Ok(Stage::Archived),
            other => Err(format!("unknown model stage '{other}'")),
        }
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::try_from(s)
    }
}

/// A registered model version as reported by the tracking platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: String,
    pub run_id: String,
    pub current_stage: Stage,
    /// Milliseconds since the Unix epoch.
    pub creation_timestamp: Option<i64>,
}

impl ModelVersion {
    /// Numeric version used for ordering; non-numeric versions sort first.
    pub fn version_number(&self) -> i64 {
        self.version.parse().unwrap_or(i64::MIN)
    }

    pub fn short_run_id(&self) -> &str {
        let end = self
            .run_id
            .char_indices()
            .nth(8)
            .map(|(idx, _)| idx)
            .unwrap_or(self.run_id.len());
        &self.run_id[..end]
    }

    pub fn is_same_as(&self, other: &ModelVersion) -> bool {
        (self.name == other.name && self.version == other.version) || self.run_id == other.run_id
    }
}

/// Final metric values and parameters logged for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub run_id: String,
    pub metrics: BTreeMap<String, f64>,
    pub params: BTreeMap<String, String>,
}

impl RunMetrics {
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }
}

/// Run as persisted by the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub model_name: String,
    pub started_at: DateTime<Utc>,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
}

impl From<&RunRecord> for RunMetrics {
    fn from(record: &RunRecord) -> Self {
        RunMetrics {
            run_id: record.run_id.clone(),
            metrics: record.metrics.clone(),
            params: record.params.clone(),
        }
    }
}
