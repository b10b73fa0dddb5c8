//! Profiling core modules
//!
//! This module contains the capture-time side of calltrace:
//! - Call graph aggregation from enter/exit events
//! - Per-thread call stacks
//! - Live capture with RAII scopes
//! - Recorded event feeds (JSON Lines) and replay
//! - Text summaries of sessions and reports

pub mod call_graph;
pub mod capture;
pub mod event_display;
pub mod event_feed;
pub mod stack;

// Re-export common types
pub use call_graph::CallGraphBuilder;
pub use capture::{current_tid, Capture, ScopeGuard, Tracer};
pub use event_display::{
    display_comparison, display_flame_summary, display_hotspots, display_leak_report,
    display_progress, display_session_summary,
};
pub use event_feed::{load_event_log, read_event_log, replay, write_event_log};
pub use stack::{CallStackFrame, ThreadStack};
