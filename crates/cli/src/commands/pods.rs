//! Listing of pods running the latency agent

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use latency_lib::inject::is_injected;
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

use crate::output::{print_table, OutputFormat};

/// Row for the pods table
#[derive(Debug, Tabled, Serialize)]
pub struct PodRow {
    #[tabled(rename = "Namespace")]
    pub namespace: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Pod IP")]
    pub pod_ip: String,
    #[tabled(rename = "Phase")]
    pub phase: String,
}

async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
            let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context("Failed to load kubeconfig")?;
            Client::try_from(config).context("Failed to create Kubernetes client")
        }
        None => Client::try_default()
            .await
            .context("Failed to create Kubernetes client"),
    }
}

/// Rows for the pods carrying the injected marker
pub fn injected_rows(pods: &[Pod]) -> Vec<PodRow> {
    let dash = || "-".to_string();

    pods.iter()
        .filter(|pod| is_injected(pod))
        .map(|pod| {
            let status = pod.status.as_ref();
            PodRow {
                namespace: pod.metadata.namespace.clone().unwrap_or_else(dash),
                name: pod.metadata.name.clone().unwrap_or_else(dash),
                pod_ip: status.and_then(|s| s.pod_ip.clone()).unwrap_or_else(dash),
                phase: status.and_then(|s| s.phase.clone()).unwrap_or_else(dash),
            }
        })
        .collect()
}

/// List injected pods in `namespace`, or cluster-wide when `None`
pub async fn list_pods(
    kubeconfig: Option<&Path>,
    namespace: Option<&str>,
    selector: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let client = create_client(kubeconfig).await?;

    let api: Api<Pod> = match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    let mut params = ListParams::default();
    if let Some(selector) = selector {
        params = params.labels(selector);
    }

    let pods = api.list(&params).await.context("Failed to list pods")?;
    print_table(&injected_rows(&pods.items), format);

    Ok(())
}
