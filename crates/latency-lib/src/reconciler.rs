//! Latency reconcile loop
//!
//! On every tick the reconciler reads the observed delay from the
//! [`DelayController`], compares it with the desired delay held in
//! [`SharedLatencyConfig`] and programs the desired one when they differ.
//! A failed tick is logged and retried from scratch on the next one; the
//! loop only stops on shutdown.

use crate::duration::FormatDuration;
use crate::health::{components, HealthRegistry};
use crate::latency::SharedLatencyConfig;
use crate::netem::{DelayController, DelayControllerError};
use crate::observability::{AgentMetrics, StructuredLogger};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Shortest period the loop runs at; a zero period would spin
pub const MIN_PERIOD: Duration = Duration::from_millis(100);

/// Result of a successful reconcile tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Observed delay already matched the desired one
    InSync { delay: Duration },
    /// A new delay was programmed
    Applied { from: Duration, to: Duration },
}

/// Converges the interface's emulated delay to the desired one
pub struct LatencyReconciler {
    controller: Arc<dyn DelayController>,
    config: SharedLatencyConfig,
    interface: String,
    health: HealthRegistry,
    metrics: AgentMetrics,
    logger: StructuredLogger,
}

impl LatencyReconciler {
    pub fn builder() -> LatencyReconcilerBuilder {
        LatencyReconcilerBuilder::new()
    }

    /// Run a single query/compare/apply cycle
    pub async fn reconcile(&self) -> Result<ReconcileOutcome, DelayControllerError> {
        let desired = self.config.delay();
        self.metrics.set_desired_delay(desired);

        let observed = self
            .controller
            .query(&self.interface)
            .await?
            .unwrap_or(Duration::ZERO);
        self.metrics.set_observed_delay(observed);

        if self.controller.matches(observed, desired) {
            debug!(
                interface = %self.interface,
                delay = %FormatDuration(observed),
                "Delay in sync"
            );
            return Ok(ReconcileOutcome::InSync { delay: observed });
        }

        self.controller.apply(&self.interface, desired).await?;
        self.metrics.inc_delay_applies();
        self.metrics.set_observed_delay(desired);
        self.logger
            .log_delay_applied(&self.interface, observed, desired);

        Ok(ReconcileOutcome::Applied {
            from: observed,
            to: desired,
        })
    }

    /// One loop iteration: reconcile and report, never fail
    async fn tick(&self) {
        let start = Instant::now();
        let result = self.reconcile().await;
        self.metrics.observe_reconcile(start.elapsed(), result.is_ok());

        match result {
            Ok(_) => self.health.set_healthy(components::RECONCILER).await,
            Err(e) => {
                error!(
                    interface = %self.interface,
                    error = %e,
                    "Error when applying latency"
                );
                self.health
                    .set_degraded(components::RECONCILER, e.to_string())
                    .await;
            }
        }
    }

    /// Tick every period until `shutdown` fires.
    ///
    /// The first tick happens one period after the call; run
    /// [`reconcile`](Self::reconcile) beforehand to apply the initial delay.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let period = effective_period(self.config.period());
        info!(
            interface = %self.interface,
            period = %FormatDuration(period),
            "Latency reconciler started"
        );

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.recv() => {
                    info!("Shutting down latency reconciler");
                    break;
                }
            }
        }
    }
}

fn effective_period(period: Duration) -> Duration {
    if period < MIN_PERIOD {
        warn!(
            requested = %FormatDuration(period),
            used = %FormatDuration(MIN_PERIOD),
            "Reconcile period too short, clamping"
        );
        MIN_PERIOD
    } else {
        period
    }
}

/// Missing builder input
#[derive(Debug, Error)]
#[error("{0} is required")]
pub struct BuildError(&'static str);

/// Builder for [`LatencyReconciler`]
pub struct LatencyReconcilerBuilder {
    controller: Option<Arc<dyn DelayController>>,
    config: Option<SharedLatencyConfig>,
    interface: String,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl LatencyReconcilerBuilder {
    pub fn new() -> Self {
        Self {
            controller: None,
            config: None,
            interface: "eth0".to_string(),
            health: None,
            logger: None,
        }
    }

    pub fn controller(mut self, controller: Arc<dyn DelayController>) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn config(mut self, config: SharedLatencyConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Result<LatencyReconciler, BuildError> {
        Ok(LatencyReconciler {
            controller: self.controller.ok_or(BuildError("controller"))?,
            config: self.config.ok_or(BuildError("config"))?,
            interface: self.interface,
            health: self.health.unwrap_or_default(),
            metrics: AgentMetrics::new(),
            logger: self
                .logger
                .unwrap_or_else(|| StructuredLogger::new("unknown")),
        })
    }
}

impl Default for LatencyReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
