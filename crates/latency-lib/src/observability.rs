//! Observability infrastructure for the agent and the injector
//!
//! Provides:
//! - Prometheus metrics for reconcile ticks and admission decisions
//! - Structured JSON logging of lifecycle events with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec, Gauge,
    Histogram, IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

use crate::duration::FormatDuration;

/// Histogram buckets for short operations (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

static AGENT_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();
static WEBHOOK_METRICS: OnceLock<WebhookMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    reconcile_duration_seconds: Histogram,
    reconcile_ticks: IntCounter,
    reconcile_errors: IntCounter,
    delay_applies: IntCounter,
    desired_delay_seconds: Gauge,
    observed_delay_seconds: Gauge,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            reconcile_duration_seconds: register_histogram!(
                "latency_agent_reconcile_duration_seconds",
                "Time spent querying and converging the emulated delay",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_duration_seconds"),

            reconcile_ticks: register_int_counter!(
                "latency_agent_reconcile_ticks_total",
                "Total number of reconcile ticks"
            )
            .expect("Failed to register reconcile_ticks"),

            reconcile_errors: register_int_counter!(
                "latency_agent_reconcile_errors_total",
                "Total number of reconcile ticks that failed"
            )
            .expect("Failed to register reconcile_errors"),

            delay_applies: register_int_counter!(
                "latency_agent_delay_applies_total",
                "Total number of times a new delay was programmed"
            )
            .expect("Failed to register delay_applies"),

            desired_delay_seconds: register_gauge!(
                "latency_agent_desired_delay_seconds",
                "Delay the agent is converging to"
            )
            .expect("Failed to register desired_delay_seconds"),

            observed_delay_seconds: register_gauge!(
                "latency_agent_observed_delay_seconds",
                "Delay last reported by the network delay controller"
            )
            .expect("Failed to register observed_delay_seconds"),
        }
    }
}

/// Latency agent metrics for Prometheus exposition
///
/// Lightweight handle to the process-global metrics; clones share them.
#[derive(Debug, Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    pub fn new() -> Self {
        AGENT_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        AGENT_METRICS.get_or_init(AgentMetricsInner::new)
    }

    /// Record one finished reconcile tick
    pub fn observe_reconcile(&self, elapsed: Duration, success: bool) {
        let inner = self.inner();
        inner.reconcile_ticks.inc();
        inner.reconcile_duration_seconds.observe(elapsed.as_secs_f64());
        if !success {
            inner.reconcile_errors.inc();
        }
    }

    pub fn inc_delay_applies(&self) {
        self.inner().delay_applies.inc();
    }

    pub fn set_desired_delay(&self, delay: Duration) {
        self.inner().desired_delay_seconds.set(delay.as_secs_f64());
    }

    pub fn set_observed_delay(&self, delay: Duration) {
        self.inner().observed_delay_seconds.set(delay.as_secs_f64());
    }
}

struct WebhookMetricsInner {
    admissions: IntCounterVec,
    admission_duration_seconds: Histogram,
    patch_operations: IntCounter,
}

impl WebhookMetricsInner {
    fn new() -> Self {
        Self {
            admissions: register_int_counter_vec!(
                "latency_injector_admissions_total",
                "Admission reviews handled, by outcome",
                &["outcome"]
            )
            .expect("Failed to register admissions"),

            admission_duration_seconds: register_histogram!(
                "latency_injector_admission_duration_seconds",
                "Time spent building an admission response",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register admission_duration_seconds"),

            patch_operations: register_int_counter!(
                "latency_injector_patch_operations_total",
                "Total number of JSON patch operations returned"
            )
            .expect("Failed to register patch_operations"),
        }
    }
}

/// Admission outcome label values
pub mod outcomes {
    pub const INJECTED: &str = "injected";
    pub const SKIPPED: &str = "skipped";
    pub const ERROR: &str = "error";
}

/// Injector metrics for Prometheus exposition
#[derive(Debug, Clone)]
pub struct WebhookMetrics {
    _private: (),
}

impl Default for WebhookMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookMetrics {
    pub fn new() -> Self {
        WEBHOOK_METRICS.get_or_init(WebhookMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &WebhookMetricsInner {
        WEBHOOK_METRICS.get_or_init(WebhookMetricsInner::new)
    }

    /// Record one admission decision (see [`outcomes`])
    pub fn observe_admission(&self, outcome: &str, elapsed: Duration, patch_ops: usize) {
        let inner = self.inner();
        inner.admissions.with_label_values(&[outcome]).inc();
        inner
            .admission_duration_seconds
            .observe(elapsed.as_secs_f64());
        inner.patch_operations.inc_by(patch_ops as u64);
    }
}

/// Structured logger for lifecycle events
///
/// Every record carries an `event` field and the pod it was emitted from.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    pod_name: String,
}

impl StructuredLogger {
    pub fn new(pod_name: impl Into<String>) -> Self {
        Self {
            pod_name: pod_name.into(),
        }
    }

    pub fn log_startup(&self, component: &str, version: &str) {
        info!(
            event = "started",
            pod = %self.pod_name,
            component = %component,
            version = %version,
            "Component started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "shutdown",
            pod = %self.pod_name,
            reason = %reason,
            "Shutting down"
        );
    }

    /// A new delay was programmed on the interface
    pub fn log_delay_applied(&self, interface: &str, from: Duration, to: Duration) {
        info!(
            event = "delay_applied",
            pod = %self.pod_name,
            interface = %interface,
            from = %FormatDuration(from),
            to = %FormatDuration(to),
            "Applied emulated delay"
        );
    }

    pub fn log_admission(&self, uid: &str, namespace: &str, outcome: &str, patch_ops: usize) {
        if outcome == outcomes::ERROR {
            warn!(
                event = "admission",
                pod = %self.pod_name,
                uid = %uid,
                namespace = %namespace,
                outcome = %outcome,
                "Admission review rejected"
            );
        } else {
            info!(
                event = "admission",
                pod = %self.pod_name,
                uid = %uid,
                namespace = %namespace,
                outcome = %outcome,
                patch_ops = patch_ops,
                "Admission review handled"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_metrics_observe() {
        let metrics = AgentMetrics::new();
        let before = metrics.inner().reconcile_errors.get();

        metrics.observe_reconcile(Duration::from_millis(3), true);
        metrics.observe_reconcile(Duration::from_millis(3), false);
        metrics.inc_delay_applies();
        metrics.set_desired_delay(Duration::from_millis(500));
        metrics.set_observed_delay(Duration::ZERO);

        // other tests share the global registry, so only monotonic checks here
        assert!(metrics.inner().reconcile_errors.get() > before);
    }

    #[test]
    fn test_webhook_metrics_observe() {
        let metrics = WebhookMetrics::new();
        metrics.observe_admission(outcomes::INJECTED, Duration::from_micros(200), 2);

        let injected = metrics
            .inner()
            .admissions
            .with_label_values(&[outcomes::INJECTED])
            .get();
        assert!(injected >= 1);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("tidb-0");
        assert_eq!(logger.pod_name, "tidb-0");
    }
}
