//! Provisioning: drive the backend container from cold to serving-ready.
//!
//! The sequence is download gate -> container restart -> health gate. The
//! whole thing runs under one async mutex so concurrent `initialize` calls
//! serialize instead of interleaving restarts and health polls; a caller
//! that arrives while another is in flight waits, then re-runs only the
//! restart and health steps because the download flag is already set.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::artifacts::ArtifactStore;
use crate::config::GatewayConfig;
use crate::error::ProvisionError;
use crate::runtime::{ContainerRuntime, ContainerStatus, RuntimeError};

/// State shared between the provisioner and the stream proxy.
///
/// `downloaded` transitions false -> true exactly once and is never reset.
/// The download gate is flag-level only: nothing re-verifies the file on
/// disk, so a gateway restart forgets the flag and downloads again, and a
/// file removed out from under a live gateway goes unnoticed. Known
/// limitation, kept to preserve observable behavior.
#[derive(Default)]
pub struct ServiceState {
    downloaded: AtomicBool,
    model_path: std::sync::Mutex<Option<PathBuf>>,
}

impl ServiceState {
    pub fn downloaded(&self) -> bool {
        self.downloaded.load(Ordering::Acquire)
    }

    pub fn model_path(&self) -> Option<PathBuf> {
        self.model_path.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn mark_downloaded(&self, path: PathBuf) {
        *self.model_path.lock().unwrap_or_else(|e| e.into_inner()) = Some(path);
        self.downloaded.store(true, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn mark_downloaded_for_tests(&self) {
        self.mark_downloaded(PathBuf::from("/models/test.gguf"));
    }
}

pub struct Provisioner {
    config: GatewayConfig,
    artifacts: Arc<dyn ArtifactStore>,
    runtime: Arc<dyn ContainerRuntime>,
    state: Arc<ServiceState>,
    client: reqwest::Client,
    init_lock: Mutex<()>,
}

impl Provisioner {
    pub fn new(
        config: GatewayConfig,
        artifacts: Arc<dyn ArtifactStore>,
        runtime: Arc<dyn ContainerRuntime>,
        state: Arc<ServiceState>,
    ) -> Self {
        Self {
            config,
            artifacts,
            runtime,
            state,
            client: reqwest::Client::new(),
            init_lock: Mutex::new(()),
        }
    }

    /// Run the full provisioning sequence. Idempotent on the download step;
    /// restart and health gating always run. Any terminal failure halts the
    /// sequence without claiming readiness.
    pub async fn initialize(&self, hf_token: &str) -> Result<(), ProvisionError> {
        let _guard = self.init_lock.lock().await;
        tracing::info!("Starting initialization process");

        if !self.state.downloaded() {
            tracing::info!(
                "Model not downloaded. Fetching {}/{}",
                self.config.model_repo_id,
                self.config.model_filename
            );
            let path = self
                .artifacts
                .fetch(
                    &self.config.model_repo_id,
                    &self.config.model_filename,
                    hf_token,
                    &self.config.model_dir,
                )
                .await?;
            self.state.mark_downloaded(path);
            tracing::info!("Model downloaded to {:?}", self.state.model_path());
        }

        let container = &self.config.container_name;
        tracing::info!("Restarting backend container '{}'", container);
        self.runtime.restart(container).await.map_err(|e| match e {
            RuntimeError::NotFound(name) => {
                tracing::error!("Backend container '{}' not found", name);
                ProvisionError::BackendProcessNotFound(name)
            }
            other => {
                tracing::error!("Error restarting backend container: {}", other);
                ProvisionError::RestartFailed(other)
            }
        })?;
        tracing::info!("Backend container restarted");

        tracing::info!("Waiting for backend to become healthy");
        if !self.await_healthy().await {
            // The usual cause is the backend dying mid-load (commonly OOM);
            // its captured output is the only diagnostic, so attach it.
            if let Ok(ContainerStatus::Exited) = self.runtime.status(container).await {
                let logs = self.runtime.logs(container).await.unwrap_or_default();
                tracing::error!("Backend container exited during startup. Logs: {}", logs);
                return Err(ProvisionError::BackendExitedDuringStartup { logs });
            }
            tracing::error!("Backend did not become healthy in time");
            return Err(ProvisionError::HealthTimeout(self.config.health_timeout));
        }

        tracing::info!("Initialization complete");
        Ok(())
    }

    /// Poll `GET {base}/health` until 2xx or the timeout elapses. Network
    /// errors and non-2xx responses are swallowed and retried; only timeout
    /// exhaustion fails the gate.
    async fn await_healthy(&self) -> bool {
        let url = format!("{}/health", self.config.backend_base_url);
        let deadline = Instant::now() + self.config.health_timeout;
        loop {
            match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::info!("Backend is healthy");
                    return true;
                }
                Ok(_) | Err(_) => {}
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(self.config.health_poll_interval).await;
        }
    }
}
