//! HTTP transport shell: routing, request shapes and SSE framing. All the
//! interesting behavior lives in `provision` and `proxy`; handlers here only
//! translate between the wire and the core.

use std::convert::Infallible;

use async_stream::stream;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::proxy::GenerationRequest;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct InitializeRequest {
    pub hf_token: String,
    #[serde(default = "default_serving_framework")]
    pub serving_framework: String,
}

fn default_serving_framework() -> String {
    "llama".to_string()
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub text: String,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
}

fn default_max_new_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    1.0
}

fn default_top_k() -> u32 {
    50
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub initialized: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/initialize", post(initialize))
        .route("/api/generate", post(generate))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

async fn log_requests(request: Request, next: Next) -> Response {
    tracing::debug!("Received {} request to {}", request.method(), request.uri());
    next.run(request).await
}

async fn root() -> impl IntoResponse {
    Json(MessageResponse {
        message: "Model serving gateway is running".to_string(),
    })
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        initialized: state.service.downloaded(),
    };
    (StatusCode::OK, Json(response))
}

async fn initialize(
    State(state): State<AppState>,
    Json(req): Json<InitializeRequest>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    tracing::info!(
        "Initializing model with serving framework: {}",
        req.serving_framework
    );
    state
        .provisioner
        .initialize(&req.hf_token)
        .await
        .map_err(|e| {
            tracing::error!("Error during model initialization: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
    tracing::info!("Model initialized successfully");
    Ok(Json(MessageResponse {
        message: "Model initialized successfully".to_string(),
    }))
}

async fn generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut events = state.proxy.generate(GenerationRequest {
        prompt: req.text,
        max_tokens: req.max_new_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
    });

    let sse_events = stream! {
        while let Some(event) = events.next().await {
            let finished = event.finished;
            if let Ok(json) = serde_json::to_string(&event) {
                yield Ok(Event::default().data(json));
            }
            // The stream contract ends at the first terminal event.
            if finished {
                break;
            }
        }
    };

    Sse::new(sse_events).keep_alive(KeepAlive::default())
}
