//! Sidecar injection
//!
//! Decides whether a pod qualifies for the latency agent and, if so,
//! produces a copy of it with the agent container appended and the
//! idempotency marker annotation set. The caller's pod is never modified.

use crate::duration::{self, FormatDuration};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HTTPGetAction, Pod, Probe, SecurityContext,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Annotation recording that the sidecar was injected
pub const ANNOTATION_INJECTED: &str = "latency-agent.io/injected";

/// Label selecting pods eligible for injection by default
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";

/// Name of the sidecar's exposed port
pub const MANAGEMENT_PORT_NAME: &str = "management";

/// Path polled by the sidecar's readiness probe
pub const HEALTH_PATH: &str = "/health";

/// Injection failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InjectError {
    /// The pod already runs a container with the sidecar's name
    #[error("unable to inject sidecar, duplicated name found: {0}")]
    DuplicateContainer(String),
}

/// Sidecar settings and injection policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// Container name of the sidecar, must not collide with workload containers
    pub container_name: String,
    pub image: String,
    pub image_tag: String,
    /// Command launching the agent inside the image
    pub command: Vec<String>,
    pub management_port: u16,
    /// Delay the agent applies as soon as it starts
    #[serde(with = "duration::text")]
    pub initial_latency: Duration,
    /// Reconcile period of the agent
    #[serde(with = "duration::text")]
    pub apply_period: Duration,
    /// Network interface the agent programs
    pub interface: String,
    /// Labels a pod must carry (all of them) to be injected
    pub selector: BTreeMap<String, String>,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            container_name: "latency-agent".to_string(),
            image: "latency-agent".to_string(),
            image_tag: "latest".to_string(),
            command: vec!["latency-agent".to_string()],
            management_port: 2332,
            initial_latency: Duration::ZERO,
            apply_period: Duration::from_secs(1),
            interface: "eth0".to_string(),
            selector: BTreeMap::from([(LABEL_COMPONENT.to_string(), "tidb".to_string())]),
        }
    }
}

/// Whether the pod carries the injected marker set to `"true"`
pub fn is_injected(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(ANNOTATION_INJECTED))
        .is_some_and(|value| value == "true")
}

/// Builds the sidecar and merges it into pods
#[derive(Debug, Clone)]
pub struct SidecarInjector {
    config: SidecarConfig,
}

impl SidecarInjector {
    pub fn new(config: SidecarConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SidecarConfig {
        &self.config
    }

    /// Injection predicate: selector matches and the pod is not yet injected
    pub fn needs_injection(&self, pod: &Pod) -> bool {
        let labels = pod.metadata.labels.as_ref();
        let selected = self.config.selector.iter().all(|(key, value)| {
            labels
                .and_then(|labels| labels.get(key))
                .is_some_and(|actual| actual == value)
        });

        selected && !is_injected(pod)
    }

    /// Container spec of the latency agent sidecar
    pub fn sidecar_container(&self) -> Container {
        let config = &self.config;
        let port = i32::from(config.management_port);

        Container {
            name: config.container_name.clone(),
            image: Some(format!("{}:{}", config.image, config.image_tag)),
            command: Some(config.command.clone()),
            args: Some(vec![
                "--port".to_string(),
                config.management_port.to_string(),
                "--latency".to_string(),
                FormatDuration(config.initial_latency).to_string(),
                "--period".to_string(),
                FormatDuration(config.apply_period).to_string(),
                "--interface".to_string(),
                config.interface.clone(),
            ]),
            ports: Some(vec![ContainerPort {
                name: Some(MANAGEMENT_PORT_NAME.to_string()),
                container_port: port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            readiness_probe: Some(Probe {
                http_get: Some(HTTPGetAction {
                    path: Some(HEALTH_PATH.to_string()),
                    port: IntOrString::Int(port),
                    ..Default::default()
                }),
                initial_delay_seconds: Some(2),
                timeout_seconds: Some(2),
                period_seconds: Some(1),
                ..Default::default()
            }),
            image_pull_policy: Some("IfNotPresent".to_string()),
            // netem needs CAP_NET_ADMIN on the pod's network namespace
            security_context: Some(SecurityContext {
                privileged: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Return a copy of `pod` with the sidecar appended and the marker set.
    ///
    /// A pod that is already marked as injected is returned unchanged.
    pub fn inject(&self, pod: &Pod) -> Result<Pod, InjectError> {
        let mut merged = pod.clone();
        if is_injected(pod) {
            return Ok(merged);
        }

        let sidecar = self.sidecar_container();
        let spec = merged.spec.get_or_insert_with(Default::default);
        if spec.containers.iter().any(|c| c.name == sidecar.name) {
            return Err(InjectError::DuplicateContainer(sidecar.name));
        }
        spec.containers.push(sidecar);

        merged
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(ANNOTATION_INJECTED.to_string(), "true".to_string());

        Ok(merged)
    }
}
