//! Injector configuration
//!
//! Sidecar settings are layered as: built-in defaults < optional config
//! file < `INJECTOR_*` environment. Nested keys use `__` in environment
//! names, e.g. `INJECTOR_SELECTOR__APP=db`.

use anyhow::{Context, Result};
use clap::Parser;
use latency_lib::SidecarConfig;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Admission webhook injecting the latency agent sidecar
#[derive(Debug, Parser)]
#[command(name = "latency-injector", version, about, long_about = None)]
pub struct Cli {
    /// Sidecar settings file (YAML, TOML or JSON)
    #[arg(long, env = "INJECTOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTPS listen address
    #[arg(long, env = "INJECTOR_LISTEN", default_value = "0.0.0.0:8443")]
    pub listen: SocketAddr,

    /// PEM certificate served to the API server
    #[arg(long, env = "INJECTOR_TLS_CERT", default_value = "/etc/webhook/certs/tls.crt")]
    pub tls_cert: PathBuf,

    /// PEM private key of the certificate
    #[arg(long, env = "INJECTOR_TLS_KEY", default_value = "/etc/webhook/certs/tls.key")]
    pub tls_key: PathBuf,
}

/// Load sidecar settings; fields missing from every source keep their defaults
pub fn load_sidecar_config(path: Option<&Path>) -> Result<SidecarConfig> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let config = builder
        .add_source(
            config::Environment::with_prefix("INJECTOR")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .context("Failed to load injector configuration")?;

    config
        .try_deserialize()
        .context("Invalid sidecar configuration")
}
