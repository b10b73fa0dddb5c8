//! Analysis logic for sealed sessions
//!
//! Pure functions over [`TraceSession`](crate::trace_data::TraceSession)s:
//! none of them mutate their inputs.

pub mod comparator;
pub mod hotspot_analyzer;

pub use comparator::{compare, ChangeStatus, ComparisonResult, ComparisonSummary, FunctionDiff};
pub use hotspot_analyzer::{analyze_hotspots, FunctionHotspot};
