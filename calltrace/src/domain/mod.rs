//! Domain model for calltrace
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling

pub mod errors;
pub mod types;

// Event feed types live in the shared contract crate
pub use calltrace_common::{EventKind, FeedEvent, FunctionIdentity, Tid, Timestamp};
pub use types::{format_nanos, ByteSize, Clock};

pub use errors::{
    CaptureError, CompareError, ConfigError, DocumentError, FeedError, SamplerError,
};
