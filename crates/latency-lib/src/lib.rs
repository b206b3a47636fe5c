//! Network latency emulation for Kubernetes workloads
//!
//! This crate provides the core functionality for:
//! - Mutating admission that injects the latency agent sidecar into pods
//! - Structural JSON patch generation for admission responses
//! - The agent's reconcile loop converging the interface's netem delay
//! - Management and webhook HTTP routers, health checks and observability

pub mod admission;
pub mod api;
pub mod duration;
pub mod health;
pub mod inject;
pub mod latency;
pub mod netem;
pub mod observability;
pub mod patch;
pub mod reconciler;

pub use admission::{AdmissionController, AdmissionError, AdmissionReview, AdmissionResponse};
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse};
pub use inject::{InjectError, SidecarConfig, SidecarInjector};
pub use latency::SharedLatencyConfig;
pub use netem::{DelayController, DelayControllerError, TcController};
pub use observability::{AgentMetrics, StructuredLogger, WebhookMetrics};
pub use reconciler::{LatencyReconciler, ReconcileOutcome};
