//! # Event Feed Contract (Instrumentation ↔ Core)
//!
//! Defines the records an instrumentation layer emits while the target program
//! runs, and that the `calltrace` core consumes. Whatever installs the hooks
//! (bytecode hooks, compiler-inserted probes, binary instrumentation) only has
//! to depend on this crate.
//!
//! ## Ordering Contract
//!
//! Events for one thread arrive in true temporal order, and every exit matches
//! the most recent un-exited enter on that thread. Violations are tolerated by
//! the core but recorded as anomalies.
//!
//! ## Key Types
//!
//! - [`FunctionIdentity`] - Stable key for a callable unit
//! - [`FeedEvent`] - One enter/exit record
//! - [`Tid`] / [`Timestamp`] - Thread and time newtypes
//!
//! The optional `serde` feature makes every type (de)serializable; recorded
//! feeds use it for their JSON Lines format.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ============================================================================
// Identity
// ============================================================================

/// Immutable key identifying a function across invocations.
///
/// Two events with equal identities always aggregate into the same graph node,
/// including recursive and re-entrant activations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FunctionIdentity {
    /// Qualified name (e.g. `app::net::Client::send`)
    pub name: String,
    /// Defining module or source file
    pub module: String,
    /// Declaration line (0 when unknown)
    pub line: u32,
}

impl FunctionIdentity {
    pub fn new(name: impl Into<String>, module: impl Into<String>, line: u32) -> Self {
        Self { name: name.into(), module: module.into(), line }
    }
}

impl fmt::Display for FunctionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.module.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} ({}:{})", self.name, self.module, self.line)
        }
    }
}

// ============================================================================
// Threads and Time
// ============================================================================

/// Thread ID as reported by the instrumentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct Tid(pub u64);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// Monotonic timestamp in nanoseconds.
///
/// The epoch is chosen by the producer (process start, capture start, boot);
/// only differences between timestamps of one feed are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Nanoseconds elapsed since `earlier`, clamped at zero for out-of-order input.
    #[must_use]
    pub fn nanos_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Convert to seconds (f64)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Convert to microseconds (u64)
    #[must_use]
    pub fn as_micros(self) -> u64 {
        self.0 / 1_000
    }
}

// ============================================================================
// Events
// ============================================================================

/// Call boundary kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "lowercase"))]
pub enum EventKind {
    Enter,
    Exit,
}

/// A single record of the event feed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeedEvent {
    pub kind: EventKind,
    pub identity: FunctionIdentity,
    pub timestamp: Timestamp,
    pub thread: Tid,
    /// Opaque argument snapshot (enter events only)
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub args: Option<String>,
}

impl FeedEvent {
    #[must_use]
    pub fn enter(identity: FunctionIdentity, timestamp: Timestamp, thread: Tid) -> Self {
        Self { kind: EventKind::Enter, identity, timestamp, thread, args: None }
    }

    #[must_use]
    pub fn exit(identity: FunctionIdentity, timestamp: Timestamp, thread: Tid) -> Self {
        Self { kind: EventKind::Exit, identity, timestamp, thread, args: None }
    }

    /// Attach an argument snapshot.
    #[must_use]
    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        self.args = Some(args.into());
        self
    }

    #[must_use]
    pub fn is_enter(&self) -> bool {
        self.kind == EventKind::Enter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ordering_is_name_first() {
        let a = FunctionIdentity::new("alpha", "z.rs", 99);
        let b = FunctionIdentity::new("beta", "a.rs", 1);
        assert!(a < b);
    }

    #[test]
    fn test_identity_display() {
        let id = FunctionIdentity::new("app::run", "src/main.rs", 12);
        assert_eq!(id.to_string(), "app::run (src/main.rs:12)");
        assert_eq!(FunctionIdentity::new("bare", "", 0).to_string(), "bare");
    }

    #[test]
    fn test_nanos_since_clamps() {
        assert_eq!(Timestamp(10).nanos_since(Timestamp(4)), 6);
        assert_eq!(Timestamp(4).nanos_since(Timestamp(10)), 0);
    }

    #[test]
    fn test_event_constructors() {
        let id = FunctionIdentity::new("f", "m", 1);
        let enter = FeedEvent::enter(id.clone(), Timestamp(1), Tid(7)).with_args("x=1");
        assert!(enter.is_enter());
        assert_eq!(enter.args.as_deref(), Some("x=1"));
        let exit = FeedEvent::exit(id, Timestamp(2), Tid(7));
        assert!(!exit.is_enter());
        assert!(exit.args.is_none());
    }
}
