//! Core configuration
//!
//! Every knob the core consumes lives in [`TraceConfig`]. The CLI layer builds
//! one from flags; library users construct it directly or start from
//! `TraceConfig::default()`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::{ByteSize, ConfigError, FunctionIdentity};
use crate::memory::LeakPolicy;

/// Default comparison tolerance (1%)
pub const DEFAULT_TOLERANCE: f64 = 0.01;

/// Default cap for captured argument snapshots, in bytes
pub const DEFAULT_ARG_CAPTURE_LIMIT: usize = 256;

/// Default number of entries in hotspot and leak-consumer reports
pub const DEFAULT_TOP_N: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Period of the memory sampler
    #[serde(with = "duration_secs")]
    pub sample_interval: Duration,
    /// Absolute growth that flags a leak
    pub leak_threshold: ByteSize,
    /// Flamegraph intervals shorter than this are hidden (nanoseconds)
    pub min_flame_duration_ns: u64,
    /// Relative change above which the comparator reports `Changed`
    pub tolerance: f64,
    /// Keep argument snapshots on call nodes
    pub capture_args: bool,
    /// Maximum bytes kept per argument snapshot
    pub arg_capture_limit: usize,
    /// Qualified-name prefixes to keep (empty keeps everything)
    pub include: Vec<String>,
    /// Qualified-name prefixes to drop
    pub exclude: Vec<String>,
    /// Size of hotspot and top-consumer reports
    pub top_n: usize,
    pub leak_policy: LeakPolicy,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            leak_threshold: ByteSize::mib(5),
            min_flame_duration_ns: 0,
            tolerance: DEFAULT_TOLERANCE,
            capture_args: false,
            arg_capture_limit: DEFAULT_ARG_CAPTURE_LIMIT,
            include: Vec::new(),
            exclude: Vec::new(),
            top_n: DEFAULT_TOP_N,
            leak_policy: LeakPolicy::default(),
        }
    }
}

impl TraceConfig {
    /// Check value ranges
    ///
    /// # Errors
    /// Returns the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        validate_tolerance(self.tolerance)?;
        self.leak_policy.validate()?;
        Ok(())
    }

    /// Whether events for `identity` pass the include/exclude filters
    #[must_use]
    pub fn traces(&self, identity: &FunctionIdentity) -> bool {
        let name = identity.name.as_str();
        if !self.include.is_empty() && !self.include.iter().any(|p| name.starts_with(p.as_str())) {
            return false;
        }
        !self.exclude.iter().any(|p| name.starts_with(p.as_str()))
    }

    /// Apply the argument-capture policy to a raw snapshot
    #[must_use]
    pub fn snapshot_args(&self, args: Option<&str>) -> Option<String> {
        if !self.capture_args {
            return None;
        }
        args.map(|a| truncate_snapshot(a, self.arg_capture_limit))
    }
}

/// # Errors
/// Fails when `tolerance` is negative, NaN or infinite.
pub fn validate_tolerance(tolerance: f64) -> Result<(), ConfigError> {
    if tolerance.is_finite() && tolerance >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidTolerance(tolerance))
    }
}

/// Cut `s` to at most `limit` bytes on a char boundary, marking the cut with `…`
fn truncate_snapshot(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

/// Durations as fractional seconds, so sub-millisecond intervals survive
mod duration_secs {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
