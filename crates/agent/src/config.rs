//! Agent configuration
//!
//! Layered as: built-in defaults < `AGENT_*` environment < command-line
//! flags. The injector passes `--port`, `--latency`, `--period` and
//! `--interface` to the sidecar, so flags win.

use anyhow::{Context, Result};
use clap::Parser;
use latency_lib::duration;
use serde::Deserialize;
use std::time::Duration;

/// Network latency emulation sidecar
#[derive(Debug, Parser)]
#[command(name = "latency-agent", version, about, long_about = None)]
pub struct Cli {
    /// Management API port
    #[arg(long)]
    pub port: Option<u16>,

    /// Initial desired latency (e.g. 100ms, 1.5s)
    #[arg(long)]
    pub latency: Option<String>,

    /// Reconcile period (e.g. 1s)
    #[arg(long)]
    pub period: Option<String>,

    /// Network interface to program
    #[arg(long)]
    pub interface: Option<String>,
}

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Pod name from the downward API, used in log records
    pub pod_name: String,

    /// Management API port
    pub port: u16,

    /// Delay applied at startup
    #[serde(with = "duration::text")]
    pub latency: Duration,

    #[serde(with = "duration::text")]
    pub period: Duration,

    pub interface: String,

    /// Path or name of the `tc` binary
    pub tc_path: String,

    /// Upper bound on a single `tc` invocation
    #[serde(with = "duration::text")]
    pub command_timeout: Duration,
}

fn default_pod_name() -> String {
    std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

impl AgentConfig {
    pub fn load(cli: &Cli) -> Result<Self> {
        let config = config::Config::builder()
            .set_default("pod_name", default_pod_name())?
            .set_default("port", 2332_i64)?
            .set_default("latency", "0s")?
            .set_default("period", "1s")?
            .set_default("interface", "eth0")?
            .set_default("tc_path", "tc")?
            .set_default("command_timeout", "5s")?
            .add_source(config::Environment::with_prefix("AGENT"))
            .set_override_option("port", cli.port.map(i64::from))?
            .set_override_option("latency", cli.latency.clone())?
            .set_override_option("period", cli.period.clone())?
            .set_override_option("interface", cli.interface.clone())?
            .build()?;

        config
            .try_deserialize()
            .context("Invalid agent configuration")
    }
}
