//! HTTP routers for the agent's management API and the injection webhook

pub mod agent;
pub mod webhook;

use crate::health::{ComponentStatus, HealthRegistry};
use axum::{http::StatusCode, response::IntoResponse, Json};
use prometheus::{Encoder, TextEncoder};
use tracing::error;

/// Prometheus text exposition of the global registry
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}

/// Liveness target of the readiness probe: succeeds whenever the server answers
async fn health() -> StatusCode {
    StatusCode::OK
}

/// Component health: 200 if healthy or degraded, 503 if unhealthy
async fn health_report(health: &HealthRegistry) -> impl IntoResponse {
    let health = health.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readiness_report(health: &HealthRegistry) -> impl IntoResponse {
    let readiness = health.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}
