//! Latency Agent - network delay emulation sidecar
//!
//! Runs next to the workload container, keeps the pod interface's netem
//! delay at the desired value and exposes a management API to change it.

use anyhow::{Context, Result};
use clap::Parser;
use latency_lib::{
    api::agent::AgentState,
    duration::FormatDuration,
    health::{components, HealthRegistry},
    LatencyReconciler, SharedLatencyConfig, StructuredLogger, TcController,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = config::Cli::parse();
    let config = config::AgentConfig::load(&cli)?;
    info!(
        interface = %config.interface,
        latency = %FormatDuration(config.latency),
        period = %FormatDuration(config.period),
        port = config.port,
        "Agent configured"
    );

    let logger = StructuredLogger::new(&config.pod_name);
    logger.log_startup("latency-agent", AGENT_VERSION);

    let health = HealthRegistry::new();
    health.register(components::RECONCILER).await;
    health.register(components::CONTROL_API).await;

    let latency = SharedLatencyConfig::new(config.latency, config.period);
    let controller = TcController::new()
        .with_program(&config.tc_path)
        .with_timeout(config.command_timeout);

    let reconciler = LatencyReconciler::builder()
        .controller(Arc::new(controller))
        .config(latency.clone())
        .interface(&config.interface)
        .health(health.clone())
        .logger(logger.clone())
        .build()?;

    // The initial delay must be in place before the pod turns ready
    reconciler
        .reconcile()
        .await
        .context("Failed to apply initial latency")?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let reconciler_handle = tokio::spawn(reconciler.run(shutdown_rx));

    let state = Arc::new(AgentState::new(latency, health));
    let api_handle = tokio::spawn(api::serve(config.port, state));

    tokio::select! {
        reason = shutdown_signal() => logger.log_shutdown(reason),
        result = api_handle => {
            match result {
                Ok(Ok(())) => logger.log_shutdown("management API stopped"),
                Ok(Err(e)) => error!(error = %e, "Management API failed"),
                Err(e) => error!(error = %e, "Management API task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(());
    reconciler_handle.await?;
    info!("Shutting down");

    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT received",
        _ = terminate => "SIGTERM received",
    }
}
