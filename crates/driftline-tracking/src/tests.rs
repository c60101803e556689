use std::collections::{BTreeMap, HashMap};

use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use crate::errors::TrackingError;
use crate::local::LocalStore;
use crate::mlflow::{decode_run, decode_versions, MlflowClient};
use crate::model::{ModelVersion, Stage};
use crate::registry::{resolve_pair, TrackingBackend};

fn metrics(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[test]
fn stage_parses_mlflow_spellings() {
    assert_eq!(Stage::try_from("Production").unwrap(), Stage::Production);
    assert_eq!(Stage::try_from("staging").unwrap(), Stage::Staging);
    assert_eq!(Stage::try_from("None").unwrap(), Stage::None);
    assert!(Stage::try_from("canary").is_err());
    assert_eq!(Stage::Archived.to_string(), "Archived");
}

#[test]
fn short_run_id_truncates_to_eight_chars() {
    let version = ModelVersion {
        name: "m".into(),
        version: "1".into(),
        run_id: "0123456789abcdef".into(),
        current_stage: Stage::Staging,
        creation_timestamp: None,
    };
    assert_eq!(version.short_run_id(), "01234567");
}

#[test]
fn decodes_latest_versions_newest_first() {
    let payload = serde_json::from_value(json!({
        "model_versions": [
            { "name": "m", "version": "2", "run_id": "r2", "current_stage": "Staging", "creation_timestamp": 20 },
            { "name": "m", "version": "10", "run_id": "r10", "current_stage": "Staging", "creation_timestamp": 100 }
        ]
    }))
    .unwrap();

    let versions = decode_versions(payload).unwrap();
    assert_eq!(versions[0].version, "10");
    assert_eq!(versions[1].run_id, "r2");
    assert_eq!(versions[0].current_stage, Stage::Staging);
}

#[test]
fn decodes_empty_latest_versions() {
    let payload = serde_json::from_value(json!({})).unwrap();
    assert!(decode_versions(payload).unwrap().is_empty());
}

#[test]
fn decodes_run_metrics_and_params() {
    let payload = serde_json::from_value(json!({
        "run": {
            "info": { "run_id": "abc", "status": "FINISHED" },
            "data": {
                "metrics": [{ "key": "rmse", "value": 0.25, "timestamp": 1, "step": 0 }],
                "params": [{ "key": "l2_penalty", "value": "0.1" }]
            }
        }
    }))
    .unwrap();

    let run = decode_run(payload);
    assert_eq!(run.run_id, "abc");
    assert_eq!(run.metric("rmse"), Some(0.25));
    assert_eq!(run.params.get("l2_penalty").map(String::as_str), Some("0.1"));
}

#[test]
fn client_rejects_non_http_uri() {
    assert!(matches!(
        MlflowClient::new("file:///tmp/mlruns"),
        Err(TrackingError::Config(_))
    ));
    assert!(matches!(MlflowClient::new("  "), Err(TrackingError::Config(_))));
    let client = MlflowClient::new("http://localhost:5000/").unwrap();
    assert_eq!(client.base_url(), "http://localhost:5000");
}

#[tokio::test]
async fn local_store_registers_incrementing_versions() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::open(dir.path()).unwrap();
    let started = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

    let first = store
        .record_run("model", Stage::Production, BTreeMap::new(), metrics(&[("rmse", 1.0)]), started)
        .unwrap();
    let second = store
        .record_run("model", Stage::Staging, BTreeMap::new(), metrics(&[("rmse", 0.5)]), started)
        .unwrap();

    assert_eq!(first.version, "1");
    assert_eq!(second.version, "2");

    let staging = store.latest_versions("model", Stage::Staging).await.unwrap();
    assert_eq!(staging.len(), 1);
    assert_eq!(staging[0].run_id, second.run_id);

    let run = store.run_metrics(&second.run_id).await.unwrap();
    assert_eq!(run.metric("rmse"), Some(0.5));
}

#[tokio::test]
async fn local_store_reports_missing_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::open(dir.path()).unwrap();
    let err = store.run_metrics("nope").await.unwrap_err();
    assert!(matches!(err, TrackingError::RunNotFound { .. }));
}

#[tokio::test]
async fn resolve_pair_falls_back_to_oldest_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::open(dir.path()).unwrap();
    let started = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

    let oldest = store
        .record_run("model", Stage::Staging, BTreeMap::new(), metrics(&[("rmse", 1.0)]), started)
        .unwrap();
    let newest = store
        .record_run("model", Stage::Staging, BTreeMap::new(), metrics(&[("rmse", 0.8)]), started)
        .unwrap();

    let (baseline, candidate) =
        resolve_pair(&store, "model", Stage::Production, Stage::Staging)
            .await
            .unwrap();
    assert_eq!(baseline.version.version, oldest.version);
    assert_eq!(candidate.version.version, newest.version);
}

#[tokio::test]
async fn resolve_pair_requires_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::open(dir.path()).unwrap();
    let err = resolve_pair(&store, "model", Stage::Production, Stage::Staging)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TrackingError::NoModelVersion { stage: Stage::Staging, .. }
    ));
}

async fn mock_latest_versions(Json(body): Json<Value>) -> Json<Value> {
    let stage = body["stages"][0].as_str().unwrap_or_default().to_string();
    let run_id = if stage == "Production" { "prod-run" } else { "stage-run" };
    let version = if stage == "Production" { "3" } else { "4" };
    Json(json!({
        "model_versions": [{
            "name": body["name"],
            "version": version,
            "run_id": run_id,
            "current_stage": stage,
            "creation_timestamp": 1_700_000_000_000i64
        }]
    }))
}

async fn mock_get_run(
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let run_id = query.get("run_id").cloned().unwrap_or_default();
    let rmse = match run_id.as_str() {
        "prod-run" => 1.0,
        "stage-run" => 0.9,
        _ => return Err((StatusCode::NOT_FOUND, "RESOURCE_DOES_NOT_EXIST".to_string())),
    };
    Ok(Json(json!({
        "run": {
            "info": { "run_id": run_id },
            "data": { "metrics": [{ "key": "rmse", "value": rmse }] }
        }
    })))
}

async fn spawn_mock_server() -> String {
    let app = Router::new()
        .route(
            "/api/2.0/mlflow/registered-models/get-latest-versions",
            post(mock_latest_versions),
        )
        .route("/api/2.0/mlflow/runs/get", get(mock_get_run));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn mlflow_client_resolves_stage_pair() {
    let base = spawn_mock_server().await;
    let client = MlflowClient::new(base).unwrap().with_basic_auth("user", "secret");

    let (baseline, candidate) =
        resolve_pair(&client, "insurance_model", Stage::Production, Stage::Staging)
            .await
            .unwrap();

    assert_eq!(baseline.version.version, "3");
    assert_eq!(baseline.run.metric("rmse"), Some(1.0));
    assert_eq!(candidate.version.version, "4");
    assert_eq!(candidate.version.name, "insurance_model");
    assert_eq!(candidate.run.metric("rmse"), Some(0.9));
}

#[tokio::test]
async fn mlflow_client_surfaces_http_status() {
    let base = spawn_mock_server().await;
    let client = MlflowClient::new(base).unwrap();

    let err = client.run_metrics("missing").await.unwrap_err();
    match err {
        TrackingError::Status { status, body, .. } => {
            assert_eq!(status, 404);
            assert!(body.contains("RESOURCE_DOES_NOT_EXIST"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
