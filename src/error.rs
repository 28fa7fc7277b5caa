use thiserror::Error;

use crate::artifacts::ArtifactError;
use crate::runtime::RuntimeError;

/// Terminal failures of the provisioning sequence. Each variant maps to the
/// step that produced it; none of them leave `ServiceState` claiming
/// readiness.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("model download failed: {0}")]
    DownloadFailed(#[from] ArtifactError),
    #[error("backend container '{0}' not found")]
    BackendProcessNotFound(String),
    #[error("failed to restart backend container: {0}")]
    RestartFailed(RuntimeError),
    #[error("backend exited during startup (it may have run out of memory); logs:\n{logs}")]
    BackendExitedDuringStartup { logs: String },
    #[error("backend did not become healthy within {0:?}")]
    HealthTimeout(std::time::Duration),
}
