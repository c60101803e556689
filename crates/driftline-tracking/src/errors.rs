use std::path::PathBuf;

use thiserror::Error;

use crate::model::Stage;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("{backend} request to {endpoint} failed: {source}")]
    Http {
        backend: &'static str,
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{backend} returned status {status} for {endpoint}: {body}")]
    Status {
        backend: &'static str,
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("{backend} response could not be decoded: {message}")]
    Decode {
        backend: &'static str,
        message: String,
    },

    #[error("tracking store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tracking store JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no version of model '{model}' in stage {stage}")]
    NoModelVersion { model: String, stage: Stage },

    #[error("run '{run_id}' not found")]
    RunNotFound { run_id: String },

    #[error("invalid tracking configuration: {0}")]
    Config(String),
}
