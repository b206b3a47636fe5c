//! Desired latency shared between the control endpoint and the reconciler

use crate::duration::{self, ParseDurationError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Thread-safe holder for the desired delay and the reconcile period.
///
/// The delay lives in a single `AtomicU64` of nanoseconds, so a reader
/// always sees either the previous or the new value. The period is fixed
/// for the process lifetime. Clones share state.
#[derive(Debug, Clone)]
pub struct SharedLatencyConfig {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    delay_nanos: AtomicU64,
    period: Duration,
}

impl SharedLatencyConfig {
    pub fn new(initial_delay: Duration, period: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                delay_nanos: AtomicU64::new(to_nanos(initial_delay)),
                period,
            }),
        }
    }

    /// Current desired delay
    pub fn delay(&self) -> Duration {
        Duration::from_nanos(self.inner.delay_nanos.load(Ordering::Acquire))
    }

    /// Reconcile period
    pub fn period(&self) -> Duration {
        self.inner.period
    }

    /// Set the desired delay, returning the previous one.
    ///
    /// Delays beyond `u64::MAX` nanoseconds are clamped.
    pub fn set_delay(&self, delay: Duration) -> Duration {
        let previous = self
            .inner
            .delay_nanos
            .swap(to_nanos(delay), Ordering::AcqRel);
        Duration::from_nanos(previous)
    }

    /// Parse `input` and set it as the desired delay.
    ///
    /// On a parse error the held value is left untouched.
    pub fn set_delay_str(&self, input: &str) -> Result<Duration, ParseDurationError> {
        let delay = duration::parse(input).map_err(|e| {
            warn!(input = %input, error = %e, "Rejected latency update");
            e
        })?;

        let previous = self.set_delay(delay);
        info!(
            previous = %duration::FormatDuration(previous),
            latency = %duration::FormatDuration(delay),
            "Desired latency updated"
        );
        Ok(delay)
    }
}

fn to_nanos(delay: Duration) -> u64 {
    u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX)
}
