use async_trait::async_trait;
use tracing::warn;

use crate::errors::TrackingError;
use crate::model::{ModelVersion, RunMetrics, Stage};

#[async_trait]
pub trait TrackingBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Versions of `model` currently in `stage`, newest first.
    async fn latest_versions(
        &self,
        model: &str,
        stage: Stage,
    ) -> Result<Vec<ModelVersion>, TrackingError>;

    async fn run_metrics(&self, run_id: &str) -> Result<RunMetrics, TrackingError>;
}

/// A model version together with the metrics of the run that produced it.
#[derive(Debug, Clone)]
pub struct ResolvedVersion {
    pub version: ModelVersion,
    pub run: RunMetrics,
}

pub async fn resolve_newest(
    backend: &dyn TrackingBackend,
    model: &str,
    stage: Stage,
) -> Result<Option<ResolvedVersion>, TrackingError> {
    let versions = backend.latest_versions(model, stage).await?;
    match versions.into_iter().next() {
        Some(version) => {
            let run = backend.run_metrics(&version.run_id).await?;
            Ok(Some(ResolvedVersion { version, run }))
        }
        None => Ok(None),
    }
}

pub async fn resolve_oldest(
    backend: &dyn TrackingBackend,
    model: &str,
    stage: Stage,
) -> Result<Option<ResolvedVersion>, TrackingError> {
    let versions = backend.latest_versions(model, stage).await?;
    match versions.into_iter().last() {
        Some(version) => {
            let run = backend.run_metrics(&version.run_id).await?;
            Ok(Some(ResolvedVersion { version, run }))
        }
        None => Ok(None),
    }
}

/// Resolves the baseline and candidate versions for a comparison.
///
/// When the baseline stage is empty the oldest candidate-stage version stands
/// in as the baseline. An empty candidate stage is an error.
pub async fn resolve_pair(
    backend: &dyn TrackingBackend,
    model: &str,
    baseline_stage: Stage,
    candidate_stage: Stage,
) -> Result<(ResolvedVersion, ResolvedVersion), TrackingError> {
    let candidate = resolve_newest(backend, model, candidate_stage)
        .await?
        .ok_or_else(|| TrackingError::NoModelVersion {
            model: model.to_string(),
            stage: candidate_stage,
        })?;

    let baseline = match resolve_newest(backend, model, baseline_stage).await? {
        Some(resolved) => resolved,
        None => {
            warn!(
                backend = backend.name(),
                model,
                baseline_stage = %baseline_stage,
                candidate_stage = %candidate_stage,
                "no baseline-stage version; using oldest candidate-stage version as baseline"
            );
            resolve_oldest(backend, model, candidate_stage)
                .await?
                .ok_or_else(|| TrackingError::NoModelVersion {
                    model: model.to_string(),
                    stage: baseline_stage,
                })?
        }
    };

    Ok((baseline, candidate))
}

pub(crate) fn sort_newest_first(versions: &mut [ModelVersion]) {
    versions.sort_by(|a, b| {
        b.version_number()
            .cmp(&a.version_number())
            .then_with(|| b.creation_timestamp.cmp(&a.creation_timestamp))
    });
}
