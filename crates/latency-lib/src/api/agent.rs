//! Management API of the latency agent sidecar
//!
//! - `GET /health` - probe target, always `200`
//! - `GET /healthz`, `GET /readyz` - component health as JSON
//! - `GET /metrics` - Prometheus metrics
//! - `GET /latency` - current desired delay
//! - `GET|PUT /latency/:latency` - set the desired delay

use crate::duration::FormatDuration;
use crate::health::HealthRegistry;
use crate::latency::SharedLatencyConfig;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use std::sync::Arc;

/// Shared state of the management API
#[derive(Debug, Clone)]
pub struct AgentState {
    pub config: SharedLatencyConfig,
    pub health: HealthRegistry,
}

impl AgentState {
    pub fn new(config: SharedLatencyConfig, health: HealthRegistry) -> Self {
        Self { config, health }
    }
}

async fn healthz(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    super::health_report(&state.health).await
}

async fn readyz(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    super::readiness_report(&state.health).await
}

async fn get_latency(State(state): State<Arc<AgentState>>) -> String {
    FormatDuration(state.config.delay()).to_string()
}

/// Set the desired delay; malformed input leaves it unchanged
async fn set_latency(
    State(state): State<Arc<AgentState>>,
    Path(latency): Path<String>,
) -> (StatusCode, String) {
    match state.config.set_delay_str(&latency) {
        Ok(delay) => (StatusCode::OK, FormatDuration(delay).to_string()),
        Err(_) => (
            StatusCode::BAD_REQUEST,
            format!("Invalid Latency: {}", latency),
        ),
    }
}

pub fn router(state: Arc<AgentState>) -> Router {
    Router::new()
        .route("/health", get(super::health))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(super::metrics))
        .route("/latency", get(get_latency))
        .route("/latency/:latency", get(set_latency).put(set_latency))
        .with_state(state)
}
