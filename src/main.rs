use std::sync::Arc;

use clap::Parser;

use llmgate::artifacts::HfArtifactStore;
use llmgate::config::GatewayConfig;
use llmgate::runtime::DockerCli;
use llmgate::{api, AppState};

#[derive(Debug, Parser)]
#[command(name = "llmgate", about = "Serving gateway for a containerized llama.cpp backend")]
struct Args {
    /// Address the gateway listens on.
    #[arg(long, default_value = "0.0.0.0:8000")]
    bind: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = GatewayConfig::from_env();
    tracing::info!("Backend base URL: {}", config.backend_base_url);
    tracing::info!("Backend container: {}", config.container_name);

    let state = AppState::new(
        config,
        Arc::new(HfArtifactStore::default()),
        Arc::new(DockerCli),
    );
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .expect("Failed to bind listen address");

    tracing::info!("Gateway starting on http://{}", args.bind);
    tracing::info!("Available endpoints:");
    tracing::info!("  - GET  /                - Liveness probe");
    tracing::info!("  - GET  /health          - Gateway health");
    tracing::info!("  - POST /api/initialize  - Provision the backend");
    tracing::info!("  - POST /api/generate    - Streaming generation (SSE)");

    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}
