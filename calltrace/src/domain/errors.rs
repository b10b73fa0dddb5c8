//! Structured error types for calltrace
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Protocol violations in the event feed are not errors: they are recorded as
//! anomalies on the session (see `trace_data::Anomaly`).

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Sampling interval must be greater than zero")]
    ZeroInterval,

    #[error("Comparison tolerance must be a finite, non-negative fraction (got {0})")]
    InvalidTolerance(f64),

    #[error("Leak majority must be within (0, 1] (got {0})")]
    InvalidMajority(f64),

    #[error("Invalid byte size: {0:?}")]
    InvalidByteSize(String),
}

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Malformed trace document in section `{section}`: {message}")]
    Parse { section: &'static str, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DocumentError {
    pub(crate) fn parse(section: &'static str, message: impl Into<String>) -> Self {
        DocumentError::Parse { section, message: message.into() }
    }

    /// Section named by a parse error, if this is one
    #[must_use]
    pub fn section(&self) -> Option<&'static str> {
        match self {
            DocumentError::Parse { section, .. } => Some(section),
            _ => None,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum CompareError {
    #[error("Invalid comparator input ({which} session): {reason}")]
    InvalidInput { which: &'static str, reason: String },

    #[error("Comparison tolerance must be a finite, non-negative fraction (got {0})")]
    InvalidTolerance(f64),
}

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Memory statistics unavailable: {0}")]
    StatsUnavailable(String),

    #[error("Failed to spawn sampler thread: {0}")]
    SpawnFailed(std::io::Error),
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Malformed event on line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Invalid capture configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sampler(#[from] SamplerError),
}
