//! Latency agent CLI
//!
//! Reads and sets the emulated latency of a running agent, shows its
//! health and lists the pods the sidecar was injected into.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{latency, pods};
use std::path::PathBuf;

/// Latency agent CLI
#[derive(Parser)]
#[command(name = "latctl")]
#[command(author, version, about = "CLI for the latency agent", long_about = None)]
pub struct Cli {
    /// Agent management API URL [default: http://localhost:2332]
    #[arg(long, env = "LATCTL_AGENT_URL")]
    pub agent_url: Option<String>,

    /// Path to kubeconfig file (uses default if not specified)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the agent's current latency
    Get,

    /// Set the agent's latency (e.g. 100ms, 1.5s, 0)
    Set {
        /// New latency
        latency: String,
    },

    /// Show the agent's component health
    Health,

    /// List pods running the latency agent
    Pods {
        /// Namespace to search (all namespaces if not specified)
        #[arg(long, short)]
        namespace: Option<String>,

        /// Label selector (e.g. app.kubernetes.io/component=tidb)
        #[arg(long, short = 'l')]
        selector: Option<String>,
    },
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::Config::load()?;

    match cli.command {
        Commands::Get => {
            let client = client::AgentClient::new(&config.agent_url(cli.agent_url))?;
            latency::get_latency(&client, cli.format).await?;
        }
        Commands::Set { latency: value } => {
            let client = client::AgentClient::new(&config.agent_url(cli.agent_url))?;
            latency::set_latency(&client, &value, cli.format).await?;
        }
        Commands::Health => {
            let client = client::AgentClient::new(&config.agent_url(cli.agent_url))?;
            latency::show_health(&client, cli.format).await?;
        }
        Commands::Pods {
            namespace,
            selector,
        } => {
            let namespace = namespace.or(config.default_namespace);
            pods::list_pods(
                cli.kubeconfig.as_deref(),
                namespace.as_deref(),
                selector.as_deref(),
                cli.format,
            )
            .await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
