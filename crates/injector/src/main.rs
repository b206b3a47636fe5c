//! Latency Injector - mutating admission webhook
//!
//! Adds the latency agent sidecar to selected pods at creation time.

use anyhow::Result;
use clap::Parser;
use latency_lib::{
    api::webhook::WebhookState,
    duration::FormatDuration,
    health::{components, HealthRegistry},
    AdmissionController, SidecarInjector, StructuredLogger,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const INJECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = config::Cli::parse();
    let sidecar = config::load_sidecar_config(cli.config.as_deref())?;
    info!(
        image = %format!("{}:{}", sidecar.image, sidecar.image_tag),
        container = %sidecar.container_name,
        initial_latency = %FormatDuration(sidecar.initial_latency),
        selector = ?sidecar.selector,
        "Sidecar configured"
    );

    let pod_name = std::env::var("POD_NAME").unwrap_or_else(|_| "latency-injector".to_string());
    let logger = StructuredLogger::new(pod_name);
    logger.log_startup("latency-injector", INJECTOR_VERSION);

    let controller = AdmissionController::new(SidecarInjector::new(sidecar), logger.clone());
    let health = HealthRegistry::new();
    health.register(components::WEBHOOK).await;
    let state = Arc::new(WebhookState::new(controller, health));

    tokio::select! {
        result = api::serve(cli.listen, &cli.tls_cert, &cli.tls_key, state) => {
            if let Err(e) = &result {
                error!(error = %e, "Webhook server failed");
            }
            result?;
            logger.log_shutdown("webhook server stopped");
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
        }
    }

    info!("Shutting down");
    Ok(())
}
