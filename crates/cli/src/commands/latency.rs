//! Agent latency and health commands

use anyhow::{Context, Result};
use colored::Colorize;
use latency_lib::duration::{self, FormatDuration};
use latency_lib::ComponentStatus;
use serde::Serialize;
use serde_json::json;
use tabled::Tabled;

use crate::client::AgentClient;
use crate::output::{color_status, print_json, print_success, print_table, OutputFormat};

/// Row for the component health table
#[derive(Tabled, Serialize)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    component: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Last Update")]
    last_update: String,
}

fn status_label(status: ComponentStatus) -> String {
    match status {
        ComponentStatus::Healthy => "healthy",
        ComponentStatus::Degraded => "degraded",
        ComponentStatus::Unhealthy => "unhealthy",
    }
    .to_string()
}

/// Print the agent's desired delay
pub async fn get_latency(client: &AgentClient, format: OutputFormat) -> Result<()> {
    let latency = client.get_latency().await?;

    match format {
        OutputFormat::Json => print_json(&json!({ "latency": latency })),
        OutputFormat::Table => println!("{}", latency.cyan()),
    }

    Ok(())
}

/// Validate `latency` locally, then send it to the agent
pub async fn set_latency(client: &AgentClient, latency: &str, format: OutputFormat) -> Result<()> {
    let parsed = duration::parse(latency).context("Refusing to send invalid latency")?;

    let accepted = client
        .set_latency(&FormatDuration(parsed).to_string())
        .await?;

    match format {
        OutputFormat::Json => print_json(&json!({ "latency": accepted })),
        OutputFormat::Table => print_success(&format!("Latency set to {}", accepted.cyan())),
    }

    Ok(())
}

/// Print the agent's component health
pub async fn show_health(client: &AgentClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;

    if let OutputFormat::Json = format {
        print_json(&health);
        return Ok(());
    }

    println!("{} {}", "Agent:".bold(), color_status(&status_label(health.status)));
    println!();

    let rows: Vec<ComponentRow> = health
        .components
        .iter()
        .map(|(name, component)| {
            ComponentRow {
                component: name.clone(),
                status: color_status(&status_label(component.status)),
                message: component.message.clone().unwrap_or_else(|| "-".to_string()),
                last_update: component.last_update.format("%Y-%m-%d %H:%M:%S").to_string(),
            }
        })
        .collect();

    print_table(&rows, format);
    Ok(())
}
