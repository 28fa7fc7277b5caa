//! llmgate: a serving gateway for a containerized llama.cpp backend.
//!
//! The gateway owns two pieces of machinery: the [`provision::Provisioner`],
//! which takes the backend from cold to health-check-passing (download
//! weights, restart the container, poll its health endpoint), and the
//! [`proxy::StreamProxy`], which forwards generation requests and re-streams
//! backend tokens as normalized events with a guaranteed terminal event.

use std::sync::Arc;

pub mod api;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod provision;
pub mod proxy;
pub mod runtime;

use artifacts::ArtifactStore;
use config::GatewayConfig;
use provision::{Provisioner, ServiceState};
use proxy::StreamProxy;
use runtime::ContainerRuntime;

/// Shared handler state: one gateway instance constructed at process start
/// and injected into every request handler. The provisioner and the proxy
/// share only the service state and the backend base URL.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ServiceState>,
    pub provisioner: Arc<Provisioner>,
    pub proxy: Arc<StreamProxy>,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        artifacts: Arc<dyn ArtifactStore>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let service = Arc::new(ServiceState::default());
        let proxy = Arc::new(StreamProxy::new(
            config.backend_base_url.clone(),
            service.clone(),
        ));
        let provisioner = Arc::new(Provisioner::new(config, artifacts, runtime, service.clone()));
        Self {
            service,
            provisioner,
            proxy,
        }
    }
}
