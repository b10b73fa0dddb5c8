//! Domain types providing compile-time safety and self-documentation
//!
//! Thread and timestamp newtypes come from `calltrace-common`; this module
//! adds the byte-size type used by the memory sampler and configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::errors::ConfigError;
use calltrace_common::Timestamp;

/// Monotonic capture clock
///
/// Timestamps are nanoseconds since the clock was created, so every producer
/// sharing one clock (traced threads, the memory sampler) agrees on time.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    #[must_use]
    pub fn start() -> Self {
        Self { origin: Instant::now() }
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn now(&self) -> Timestamp {
        Timestamp(self.origin.elapsed().as_nanos() as u64)
    }
}

/// Absolute memory size in bytes
///
/// Parses human-friendly values (`512`, `64KB`, `5MB`, `1GiB`). Decimal
/// suffixes (`KB`, `MB`, `GB`) and binary suffixes (`KiB`, `MiB`, `GiB`) are
/// both treated as powers of 1024, matching what `ps` and `top` report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub const KIB: u64 = 1024;
    pub const MIB: u64 = 1024 * 1024;
    pub const GIB: u64 = 1024 * 1024 * 1024;

    #[must_use]
    pub const fn mib(n: u64) -> Self {
        Self(n * Self::MIB)
    }

    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ByteSize {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        if bytes >= Self::GIB {
            write!(f, "{:.1} GB", bytes as f64 / Self::GIB as f64)
        } else if bytes >= Self::MIB {
            write!(f, "{:.1} MB", bytes as f64 / Self::MIB as f64)
        } else if bytes >= Self::KIB {
            write!(f, "{:.1} KB", bytes as f64 / Self::KIB as f64)
        } else {
            write!(f, "{bytes} B")
        }
    }
}

impl FromStr for ByteSize {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed.find(|c: char| !c.is_ascii_digit()).unwrap_or(trimmed.len());
        let (digits, suffix) = trimmed.split_at(split);
        let value: u64 =
            digits.parse().map_err(|_| ConfigError::InvalidByteSize(s.to_string()))?;

        let multiplier = match suffix.trim().to_ascii_lowercase().as_str() {
            "" | "b" => 1,
            "k" | "kb" | "kib" => Self::KIB,
            "m" | "mb" | "mib" => Self::MIB,
            "g" | "gb" | "gib" => Self::GIB,
            _ => return Err(ConfigError::InvalidByteSize(s.to_string())),
        };

        value
            .checked_mul(multiplier)
            .map(ByteSize)
            .ok_or_else(|| ConfigError::InvalidByteSize(s.to_string()))
    }
}

/// Format a nanosecond duration for display (`850ns`, `12.40us`, `3.21ms`, `1.50s`)
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_nanos(nanos: u64) -> String {
    if nanos >= 1_000_000_000 {
        format!("{:.2}s", nanos as f64 / 1_000_000_000.0)
    } else if nanos >= 1_000_000 {
        format!("{:.2}ms", nanos as f64 / 1_000_000.0)
    } else if nanos >= 1_000 {
        format!("{:.2}us", nanos as f64 / 1_000.0)
    } else {
        format!("{nanos}ns")
    }
}
