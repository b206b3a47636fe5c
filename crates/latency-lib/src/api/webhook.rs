//! Injection webhook
//!
//! - `POST /inject` - admission review in, admission review out
//! - `GET /health` - probe target
//! - `GET /healthz`, `GET /readyz` - component health as JSON
//! - `GET /metrics` - Prometheus metrics

use crate::admission::AdmissionController;
use crate::health::HealthRegistry;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::debug;

/// Shared state for webhook handlers
#[derive(Debug, Clone)]
pub struct WebhookState {
    pub controller: AdmissionController,
    pub health: HealthRegistry,
}

impl WebhookState {
    pub fn new(controller: AdmissionController, health: HealthRegistry) -> Self {
        Self { controller, health }
    }
}

async fn inject(State(state): State<Arc<WebhookState>>, body: Bytes) -> Response {
    debug!(bytes = body.len(), "Admission review received");
    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, "no body found").into_response();
    }

    Json(state.controller.review(&body)).into_response()
}

async fn healthz(State(state): State<Arc<WebhookState>>) -> impl IntoResponse {
    super::health_report(&state.health).await
}

async fn readyz(State(state): State<Arc<WebhookState>>) -> impl IntoResponse {
    super::readiness_report(&state.health).await
}

pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/inject", post(inject))
        .route("/health", get(super::health))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(super::metrics))
        .with_state(state)
}
