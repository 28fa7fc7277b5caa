use std::path::PathBuf;
use std::time::Duration;

const BACKEND_DEFAULT_URL: &str = "http://llama:8080";
const BACKEND_CONTAINER_NAME: &str = "mathstral-llama-1";
const MODEL_DIR: &str = "/models";
const MODEL_REPO_ID: &str = "reach-vb/mathstral-7B-v0.1-Q8_0-GGUF";
const MODEL_FILENAME: &str = "mathstral-7b-v0.1-q8_0.gguf";

/// Externally-supplied gateway settings. Everything here is fixed for the
/// lifetime of the process; request handlers only ever read it.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the inference backend (`LLAMA_URL` env var).
    pub backend_base_url: String,
    /// Name of the container running the backend process.
    pub container_name: String,
    /// Directory model weights are downloaded into.
    pub model_dir: PathBuf,
    /// Artifact repository the weights are fetched from.
    pub model_repo_id: String,
    /// Weight file within the repository.
    pub model_filename: String,
    /// Total time allowed for the post-restart health gate.
    pub health_timeout: Duration,
    /// Delay between health probes.
    pub health_poll_interval: Duration,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            backend_base_url: std::env::var("LLAMA_URL")
                .unwrap_or_else(|_| BACKEND_DEFAULT_URL.to_string()),
            ..Self::default()
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backend_base_url: BACKEND_DEFAULT_URL.to_string(),
            container_name: BACKEND_CONTAINER_NAME.to_string(),
            model_dir: PathBuf::from(MODEL_DIR),
            model_repo_id: MODEL_REPO_ID.to_string(),
            model_filename: MODEL_FILENAME.to_string(),
            health_timeout: Duration::from_secs(60),
            health_poll_interval: Duration::from_secs(1),
        }
    }
}
