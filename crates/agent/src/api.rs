//! Management API server

use latency_lib::api::agent::{router, AgentState};
use latency_lib::health::components;
use std::sync::Arc;
use tracing::info;

/// Serve the management API on all interfaces.
///
/// The agent turns ready once the listener is bound; a bind or serve
/// failure marks the control API unhealthy.
pub async fn serve(port: u16, state: Arc<AgentState>) -> anyhow::Result<()> {
    let health = state.health.clone();
    let app = router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            health
                .set_unhealthy(components::CONTROL_API, format!("bind {}: {}", addr, e))
                .await;
            return Err(e.into());
        }
    };
    info!(addr = %listener.local_addr()?, "Starting management API");
    health.set_ready(true).await;

    if let Err(e) = axum::serve(listener, app).await {
        health
            .set_unhealthy(components::CONTROL_API, e.to_string())
            .await;
        health.set_ready(false).await;
        return Err(e.into());
    }

    Ok(())
}
