use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::errors::TrackingError;
use crate::model::{ModelVersion, RunMetrics, RunRecord, Stage};
use crate::registry::{sort_newest_first, TrackingBackend};

const BACKEND: &str = "local";

/// File-backed tracking store: `runs/{run_id}.json` and `registry/{model}.json`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, TrackingError> {
        let root = root.into();
        for dir in [root.join("runs"), root.join("registry")] {
            fs::create_dir_all(&dir).map_err(|source| TrackingError::Io { path: dir, source })?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.root.join("runs").join(format!("{run_id}.json"))
    }

    fn registry_path(&self, model: &str) -> PathBuf {
        let file_name: String = model
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
            .collect();
        self.root.join("registry").join(format!("{file_name}.json"))
    }

    /// Persists a run and registers it as the next version of `model_name`.
    pub fn record_run(
        &self,
        model_name: &str,
        stage: Stage,
        params: BTreeMap<String, String>,
        metrics: BTreeMap<String, f64>,
        started_at: DateTime<Utc>,
    ) -> Result<ModelVersion, TrackingError> {
        let run = RunRecord {
            run_id: Uuid::new_v4().simple().to_string(),
            model_name: model_name.to_string(),
            started_at,
            params,
            metrics,
        };
        write_json(&self.run_path(&run.run_id), &run)?;

        let mut versions = self.versions(model_name)?;
        let next = versions
            .iter()
            .map(ModelVersion::version_number)
            .max()
            .unwrap_or(0)
            .max(0)
            + 1;
        let version = ModelVersion {
            name: model_name.to_string(),
            version: next.to_string(),
            run_id: run.run_id.clone(),
            current_stage: stage,
            creation_timestamp: Some(started_at.timestamp_millis()),
        };
        versions.push(version.clone());
        write_json(&self.registry_path(model_name), &versions)?;

        info!(
            model = model_name,
            version = %version.version,
            run_id = %version.run_id,
            stage = %stage,
            "recorded run in local tracking store"
        );
        Ok(version)
    }

    /// All registered versions of `model`, in registration order.
    pub fn versions(&self, model: &str) -> Result<Vec<ModelVersion>, TrackingError> {
        let path = self.registry_path(model);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_json(&path)
    }

    pub fn run(&self, run_id: &str) -> Result<RunRecord, TrackingError> {
        let path = self.run_path(run_id);
        if !path.exists() {
            return Err(TrackingError::RunNotFound {
                run_id: run_id.to_string(),
            });
        }
        read_json(&path)
    }
}

#[async_trait]
impl TrackingBackend for LocalStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn latest_versions(
        &self,
        model: &str,
        stage: Stage,
    ) -> Result<Vec<ModelVersion>, TrackingError> {
        let mut versions: Vec<ModelVersion> = self
            .versions(model)?
            .into_iter()
            .filter(|version| version.current_stage == stage)
            .collect();
        sort_newest_first(&mut versions);
        Ok(versions)
    }

    async fn run_metrics(&self, run_id: &str) -> Result<RunMetrics, TrackingError> {
        let record = self.run(run_id)?;
        Ok(RunMetrics::from(&record))
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), TrackingError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| TrackingError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, bytes).map_err(|source| TrackingError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, TrackingError> {
    let bytes = fs::read(path).map_err(|source| TrackingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| TrackingError::Json {
        path: path.to_path_buf(),
        source,
    })
}
