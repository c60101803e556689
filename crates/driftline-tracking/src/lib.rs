pub mod errors;
pub mod local;
pub mod mlflow;
pub mod model;
mod registry;

pub use errors::TrackingError;
pub use local::LocalStore;
pub use mlflow::MlflowClient;
pub use model::{ModelVersion, RunMetrics, RunRecord, Stage};
pub use registry::{resolve_newest, resolve_oldest, resolve_pair, ResolvedVersion, TrackingBackend};

#[cfg(test)]
mod tests;
