//! Textual duration codec
//!
//! Delays travel as text in three places: the control endpoint
//! (`/latency/300ms`), the sidecar arguments written by the injector
//! (`--latency 1.5s`), and the output of `tc qdisc show` (`delay 250us`).
//! This module parses and formats the compact unit-suffixed form used by
//! all three, e.g. `"300ms"`, `"1.5h"`, `"2h45m"`, `"0s"`.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

const NANOS_PER_MICRO: u64 = 1_000;
const NANOS_PER_MILLI: u64 = 1_000_000;
const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Fraction digits beyond this are truncated; keeps the arithmetic in `u128`.
const MAX_FRACTION_DIGITS: usize = 18;

/// Reason a duration string was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseDurationErrorKind {
    #[error("empty string")]
    Empty,
    #[error("negative durations are not supported")]
    Negative,
    #[error("expected a number")]
    InvalidNumber,
    #[error("missing unit")]
    MissingUnit,
    #[error("unknown unit")]
    UnknownUnit,
    #[error("value out of range")]
    Overflow,
}

/// A duration string could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid duration {input:?}: {kind}")]
pub struct ParseDurationError {
    input: String,
    kind: ParseDurationErrorKind,
}

impl ParseDurationError {
    fn new(input: &str, kind: ParseDurationErrorKind) -> Self {
        Self {
            input: input.to_string(),
            kind,
        }
    }

    /// The rejected input, verbatim
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn kind(&self) -> ParseDurationErrorKind {
        self.kind
    }
}

/// Parse a duration such as `"300ms"`, `"1.5h"` or `"2h45m"`.
///
/// Accepted units are `ns`, `us` (also `µs`/`μs`), `ms`, `s`, `m` and `h`.
/// A bare `"0"` is zero. Negative values are rejected.
pub fn parse(input: &str) -> Result<Duration, ParseDurationError> {
    use ParseDurationErrorKind::*;

    let err = |kind| ParseDurationError::new(input, kind);

    let mut s = input;
    if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    } else if s.starts_with('-') {
        return Err(err(Negative));
    }

    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(err(Empty));
    }

    let mut total: u128 = 0;
    while !s.is_empty() {
        let int_len = s.bytes().take_while(u8::is_ascii_digit).count();
        let (int_part, rest) = s.split_at(int_len);
        s = rest;

        let mut frac_part = "";
        if let Some(rest) = s.strip_prefix('.') {
            let frac_len = rest.bytes().take_while(u8::is_ascii_digit).count();
            frac_part = &rest[..frac_len];
            s = &rest[frac_len..];
        }

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(err(InvalidNumber));
        }

        let unit_len = s
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(s.len());
        let (unit, rest) = s.split_at(unit_len);
        s = rest;

        let scale = unit_scale(unit).ok_or_else(|| {
            if unit.is_empty() {
                err(MissingUnit)
            } else {
                err(UnknownUnit)
            }
        })?;

        let int_value: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| err(Overflow))?
        };
        let mut nanos = int_value.checked_mul(scale).ok_or_else(|| err(Overflow))?;

        let digits = &frac_part[..frac_part.len().min(MAX_FRACTION_DIGITS)];
        if !digits.is_empty() {
            let frac_value: u128 = digits.parse().map_err(|_| err(InvalidNumber))?;
            nanos += frac_value * scale / 10u128.pow(digits.len() as u32);
        }

        total = total.checked_add(nanos).ok_or_else(|| err(Overflow))?;
        if total > u128::from(u64::MAX) {
            return Err(err(Overflow));
        }
    }

    Ok(Duration::from_nanos(total as u64))
}

fn unit_scale(unit: &str) -> Option<u128> {
    let nanos: u64 = match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => NANOS_PER_MICRO,
        "ms" => NANOS_PER_MILLI,
        "s" => NANOS_PER_SEC,
        "m" => 60 * NANOS_PER_SEC,
        "h" => 3600 * NANOS_PER_SEC,
        _ => return None,
    };
    Some(u128::from(nanos))
}

/// Format a duration in canonical form: `"0s"`, `"500µs"`, `"1.5ms"`, `"1h2m3.5s"`.
///
/// Durations longer than `u64::MAX` nanoseconds are clamped.
pub fn format(duration: Duration) -> String {
    FormatDuration(duration).to_string()
}

/// `Display` adapter for [`format`], usable directly in `tracing` fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDuration(pub Duration);

impl fmt::Display for FormatDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = u64::try_from(self.0.as_nanos()).unwrap_or(u64::MAX);

        if nanos == 0 {
            return f.write_str("0s");
        }

        if nanos < NANOS_PER_MICRO {
            return write!(f, "{}ns", nanos);
        }
        if nanos < NANOS_PER_MILLI {
            return write_scaled(f, nanos, NANOS_PER_MICRO, 3, "µs");
        }
        if nanos < NANOS_PER_SEC {
            return write_scaled(f, nanos, NANOS_PER_MILLI, 6, "ms");
        }

        let secs = nanos / NANOS_PER_SEC;
        let hours = secs / 3600;
        let minutes = (secs / 60) % 60;

        if hours > 0 {
            write!(f, "{}h", hours)?;
        }
        if hours > 0 || minutes > 0 {
            write!(f, "{}m", minutes)?;
        }
        write!(f, "{}", secs % 60)?;
        write_fraction(f, nanos % NANOS_PER_SEC, 9)?;
        f.write_str("s")
    }
}

fn write_scaled(
    f: &mut fmt::Formatter<'_>,
    nanos: u64,
    unit: u64,
    digits: usize,
    suffix: &str,
) -> fmt::Result {
    write!(f, "{}", nanos / unit)?;
    write_fraction(f, nanos % unit, digits)?;
    f.write_str(suffix)
}

fn write_fraction(f: &mut fmt::Formatter<'_>, fraction: u64, digits: usize) -> fmt::Result {
    if fraction == 0 {
        return Ok(());
    }
    let padded = format!("{:0width$}", fraction, width = digits);
    write!(f, ".{}", padded.trim_end_matches('0'))
}

/// Serde adapter for `Duration` fields stored as text
///
/// ```ignore
/// #[serde(with = "latency_lib::duration::text")]
/// period: Duration,
/// ```
pub mod text {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&super::FormatDuration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse(&s).map_err(serde::de::Error::custom)
    }
}
