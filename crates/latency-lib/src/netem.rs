//! Network delay controller
//!
//! The reconciler drives the kernel's queuing discipline through the
//! [`DelayController`] trait. [`TcController`] is the production
//! implementation and shells out to `tc` from iproute2, programming a
//! `netem` root qdisc on the target interface.

use crate::duration::{self, FormatDuration};
use async_trait::async_trait;
use std::process::Output;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Failure talking to the network delay controller
#[derive(Debug, Error)]
pub enum DelayControllerError {
    /// The controller binary could not be started
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command did not finish in time
    #[error("{command} timed out after {timeout}")]
    Timeout {
        command: String,
        timeout: FormatDuration,
    },

    /// The command exited with a non-zero status
    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// The reported qdisc carries a delay we cannot read
    #[error("unparseable delay in qdisc output: {0}")]
    UnparseableOutput(String),
}

/// Query/apply interface to the kernel's emulated delay
#[async_trait]
pub trait DelayController: Send + Sync {
    /// Currently active delay on `interface`, `None` when no delay is emulated
    async fn query(&self, interface: &str) -> Result<Option<Duration>, DelayControllerError>;

    /// Replace whatever emulation rule exists on `interface` with `delay`
    async fn apply(&self, interface: &str, delay: Duration) -> Result<(), DelayControllerError>;

    /// Whether an `observed` delay already satisfies `desired`.
    ///
    /// Controllers that report delays with less precision than they accept
    /// override this so converged state is not reprogrammed on every tick.
    fn matches(&self, observed: Duration, desired: Duration) -> bool {
        observed == desired
    }
}

/// Round `delay` down to whole microseconds, the unit `apply` programs in
fn truncate_to_micros(delay: Duration) -> Duration {
    let nanos = delay.as_nanos() / 1_000 * 1_000;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// The delay `tc qdisc show` reports once `delay` is programmed.
///
/// iproute2 prints times with `%.3g` in the largest unit not exceeding the
/// value (`s`, `ms`, `us`), so only three significant digits survive:
/// 1234ms reads back as `1.23s`, 123456us as `123ms`.
pub fn displayed_delay(delay: Duration) -> Duration {
    let delay = truncate_to_micros(delay);
    let nanos = delay.as_nanos();

    let unit: u128 = if nanos >= 1_000_000_000 {
        1_000_000_000
    } else if nanos >= 1_000_000 {
        1_000_000
    } else {
        // below 1ms whole microseconds have at most three digits
        return delay;
    };

    let value = nanos as f64 / unit as f64;
    let scale = 10f64.powi(2 - value.log10().floor() as i32);
    let rounded = (value * scale).round() / scale * unit as f64;
    Duration::from_nanos(rounded.round() as u64)
}

/// Default bound on a single `tc` invocation
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// `tc`-backed delay controller
#[derive(Debug, Clone)]
pub struct TcController {
    program: String,
    timeout: Duration,
}

impl Default for TcController {
    fn default() -> Self {
        Self::new()
    }
}

impl TcController {
    pub fn new() -> Self {
        Self {
            program: "tc".to_string(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Use a different `tc` binary (absolute path or name on `PATH`)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, args: &[&str]) -> Result<Output, DelayControllerError> {
        let command = format!("{} {}", self.program, args.join(" "));
        debug!(command = %command, "Running delay controller command");

        let child = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(DelayControllerError::Spawn { command, source }),
            Err(_) => {
                return Err(DelayControllerError::Timeout {
                    command,
                    timeout: FormatDuration(self.timeout),
                })
            }
        };

        if !output.status.success() {
            return Err(DelayControllerError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output)
    }
}

#[async_trait]
impl DelayController for TcController {
    async fn query(&self, interface: &str) -> Result<Option<Duration>, DelayControllerError> {
        let output = self.run(&["qdisc", "show", "dev", interface]).await?;
        parse_qdisc_delay(&String::from_utf8_lossy(&output.stdout))
    }

    async fn apply(&self, interface: &str, delay: Duration) -> Result<(), DelayControllerError> {
        // tc reads microseconds reliably across iproute2 versions
        let delay_arg = format!("{}us", delay.as_micros());
        self.run(&[
            "qdisc", "replace", "dev", interface, "root", "netem", "delay", &delay_arg,
        ])
        .await?;
        Ok(())
    }

    fn matches(&self, observed: Duration, desired: Duration) -> bool {
        observed == displayed_delay(desired)
    }
}

/// Extract the emulated delay from `tc qdisc show` output.
///
/// Looks for the `delay` keyword and parses the token right after it, so
/// jitter and correlation columns (`delay 100ms  10ms 25%`) are ignored.
pub fn parse_qdisc_delay(output: &str) -> Result<Option<Duration>, DelayControllerError> {
    let mut tokens = output.split_whitespace();

    while let Some(token) = tokens.next() {
        if token != "delay" {
            continue;
        }
        let value = tokens
            .next()
            .ok_or_else(|| DelayControllerError::UnparseableOutput(output.trim().to_string()))?;
        return duration::parse(value)
            .ok()
            .or_else(|| parse_exponent_delay(value))
            .map(Some)
            .ok_or_else(|| DelayControllerError::UnparseableOutput(value.to_string()));
    }

    Ok(None)
}

/// `%.3g` switches to exponent form at unit boundaries, e.g. `1e+03ms`
fn parse_exponent_delay(value: &str) -> Option<Duration> {
    let split = value.find(|c: char| c.is_alphabetic() && c != 'e')?;
    let (number, unit) = value.split_at(split);
    if !number.contains('e') {
        return None;
    }

    let scale = match unit {
        "s" => 1e9,
        "ms" => 1e6,
        "us" => 1e3,
        "ns" => 1.0,
        _ => return None,
    };
    let number: f64 = number.parse().ok()?;
    let nanos = number * scale;
    if !nanos.is_finite() || nanos < 0.0 || nanos > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(nanos.round() as u64))
}
