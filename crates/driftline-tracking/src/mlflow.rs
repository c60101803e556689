use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::errors::TrackingError;
use crate::model::{ModelVersion, RunMetrics, Stage};
use crate::registry::{sort_newest_first, TrackingBackend};

const BACKEND: &str = "mlflow";
const LATEST_VERSIONS_PATH: &str = "/api/2.0/mlflow/registered-models/get-latest-versions";
const RUNS_GET_PATH: &str = "/api/2.0/mlflow/runs/get";

/// Read-only client for the MLflow tracking server REST API.
#[derive(Debug, Clone)]
pub struct MlflowClient {
    base_url: String,
    http: reqwest::Client,
    credentials: Option<(String, String)>,
}

impl MlflowClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TrackingError> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(TrackingError::Config(
                "MLflow tracking URI must not be empty".to_string(),
            ));
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(TrackingError::Config(format!(
                "MLflow tracking URI '{base_url}' is not an http(s) URL"
            )));
        }
        Ok(Self {
            base_url,
            http: reqwest::Client::new(),
            credentials: None,
        })
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some((user, pass)) => request.basic_auth(user, Some(pass)),
            None => request,
        }
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: String,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TrackingError> {
        debug!(endpoint = %endpoint, "sending MLflow request");
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|source| TrackingError::Http {
                backend: BACKEND,
                endpoint: endpoint.clone(),
                source,
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| TrackingError::Http {
            backend: BACKEND,
            endpoint: endpoint.clone(),
            source,
        })?;

        if !status.is_success() {
            return Err(TrackingError::Status {
                backend: BACKEND,
                endpoint,
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|err| TrackingError::Decode {
            backend: BACKEND,
            message: format!("{endpoint}: {err}"),
        })
    }
}

#[async_trait]
impl TrackingBackend for MlflowClient {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn latest_versions(
        &self,
        model: &str,
        stage: Stage,
    ) -> Result<Vec<ModelVersion>, TrackingError> {
        let endpoint = self.endpoint(LATEST_VERSIONS_PATH);
        let request = self
            .http
            .post(&endpoint)
            .json(&json!({ "name": model, "stages": [stage.as_str()] }));
        let payload: LatestVersionsResponse = self.send(endpoint, request).await?;
        decode_versions(payload)
    }

    async fn run_metrics(&self, run_id: &str) -> Result<RunMetrics, TrackingError> {
        let endpoint = self.endpoint(RUNS_GET_PATH);
        let request = self.http.get(&endpoint).query(&[("run_id", run_id)]);
        let payload: RunResponse = self.send(endpoint, request).await?;
        Ok(decode_run(payload))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct LatestVersionsResponse {
    #[serde(default)]
    model_versions: Vec<RawModelVersion>,
}

#[derive(Debug, Deserialize)]
struct RawModelVersion {
    name: String,
    version: String,
    #[serde(default)]
    run_id: String,
    #[serde(default)]
    current_stage: Option<String>,
    #[serde(default)]
    creation_timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunResponse {
    run: RawRun,
}

#[derive(Debug, Deserialize)]
struct RawRun {
    info: RawRunInfo,
    #[serde(default)]
    data: RawRunData,
}

#[derive(Debug, Deserialize)]
struct RawRunInfo {
    run_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawRunData {
    #[serde(default)]
    metrics: Vec<RawMetric>,
    #[serde(default)]
    params: Vec<RawParam>,
}

#[derive(Debug, Deserialize)]
struct RawMetric {
    key: String,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct RawParam {
    key: String,
    value: String,
}

pub(crate) fn decode_versions(
    payload: LatestVersionsResponse,
) -> Result<Vec<ModelVersion>, TrackingError> {
    let mut versions = payload
        .model_versions
        .into_iter()
        .map(|raw| {
            let stage = Stage::try_from(raw.current_stage.as_deref().unwrap_or("None"))
                .map_err(|message| TrackingError::Decode {
                    backend: BACKEND,
                    message,
                })?;
            Ok(ModelVersion {
                name: raw.name,
                version: raw.version,
                run_id: raw.run_id,
                current_stage: stage,
                creation_timestamp: raw.creation_timestamp,
            })
        })
        .collect::<Result<Vec<_>, TrackingError>>()?;
    sort_newest_first(&mut versions);
    Ok(versions)
}

pub(crate) fn decode_run(payload: RunResponse) -> RunMetrics {
    let metrics: BTreeMap<String, f64> = payload
        .run
        .data
        .metrics
        .into_iter()
        .map(|metric| (metric.key, metric.value))
        .collect();
    let params: BTreeMap<String, String> = payload
        .run
        .data
        .params
        .into_iter()
        .map(|param| (param.key, param.value))
        .collect();

    RunMetrics {
        run_id: payload.run.info.run_id,
        metrics,
        params,
    }
}
