//! Webhook HTTPS server

use anyhow::{Context, Result};
use axum_server::{tls_rustls::RustlsConfig, Handle};
use latency_lib::api::webhook::{router, WebhookState};
use latency_lib::health::components;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Serve the webhook over TLS until the server stops.
///
/// The injector turns ready once the listener is bound; a TLS or serve
/// failure marks the webhook unhealthy.
pub async fn serve(
    addr: SocketAddr,
    cert: &Path,
    key: &Path,
    state: Arc<WebhookState>,
) -> Result<()> {
    let health = state.health.clone();
    let app = router(state);

    let tls_config = match RustlsConfig::from_pem_file(cert, key).await {
        Ok(config) => config,
        Err(e) => {
            health
                .set_unhealthy(components::WEBHOOK, format!("TLS config: {}", e))
                .await;
            return Err(e).with_context(|| format!("TLS config error for {}", cert.display()));
        }
    };

    let handle = Handle::new();
    let listening = {
        let handle = handle.clone();
        let health = health.clone();
        tokio::spawn(async move {
            if let Some(addr) = handle.listening().await {
                info!(addr = %addr, "Injection webhook listening");
                health.set_ready(true).await;
            }
        })
    };

    info!(addr = %addr, "Starting injection webhook");
    let result = axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(app.into_make_service())
        .await;
    listening.abort();

    if let Err(e) = result {
        health
            .set_unhealthy(components::WEBHOOK, e.to_string())
            .await;
        health.set_ready(false).await;
        return Err(e).context("Webhook server error");
    }

    Ok(())
}
