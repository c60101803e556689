pub mod cleaning;
pub mod comparison;
pub mod config;
pub mod dataset;
pub mod drift;
pub mod error;
pub mod features;
pub mod ingestion;
pub mod profiling;
pub mod quality_gate;
pub mod training;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
