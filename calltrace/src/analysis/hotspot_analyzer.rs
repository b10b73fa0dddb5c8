//! Hotspot analysis for sealed sessions.
//!
//! Ranks functions by self time, the time spent in the function's own body,
//! so a dispatcher that merely calls expensive children does not crowd out
//! the children themselves.
//!
//! ```text
//! HOTSPOTS (by self time)
//! ─────────────────────────────────────────────
//!   parser::lex         42.3%   1.20 s   1204 calls
//!   cache::lookup       18.7%   530 ms    88k calls
//! ```
//!
//! # Performance
//!
//! - `analyze_hotspots()`: O(n log n + e) where n = nodes, e = edges

// Percentage calculations intentionally convert u64 to f64
#![allow(clippy::cast_precision_loss)]

use std::collections::HashMap;

use crate::domain::FunctionIdentity;
use crate::trace_data::TraceSession;

/// Maximum callers listed per hotspot.
///
/// Heavily shared helpers can have hundreds of callers; the few heaviest
/// explain most of the time.
const MAX_CALLERS_PER_HOTSPOT: usize = 5;

/// A function ranked by self time
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionHotspot {
    pub identity: FunctionIdentity,

    pub self_ns: u64,

    pub total_ns: u64,

    pub call_count: u64,

    pub avg_ns: u64,

    /// Share of the session's summed self time (0.0 - 100.0).
    pub percentage: f64,

    /// Heaviest callers with the time attributed through each,
    /// most expensive first. Limited to `MAX_CALLERS_PER_HOTSPOT`.
    pub callers: Vec<(FunctionIdentity, u64)>,
}

/// Rank every function of `session` by self time (descending, ties by identity)
#[must_use]
pub fn analyze_hotspots(session: &TraceSession) -> Vec<FunctionHotspot> {
    let total_self = session.total_self_ns();

    let mut callers: HashMap<&FunctionIdentity, Vec<(FunctionIdentity, u64)>> = HashMap::new();
    for edge in session.edges() {
        callers.entry(&edge.callee).or_default().push((edge.caller.clone(), edge.cumulative_ns));
    }

    let mut hotspots: Vec<FunctionHotspot> = session
        .nodes()
        .map(|node| {
            let percentage = if total_self > 0 {
                (node.self_ns as f64 / total_self as f64) * 100.0
            } else {
                0.0
            };

            let mut top_callers = callers.remove(&node.identity).unwrap_or_default();
            top_callers.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            top_callers.truncate(MAX_CALLERS_PER_HOTSPOT);

            FunctionHotspot {
                identity: node.identity.clone(),
                self_ns: node.self_ns,
                total_ns: node.total_ns,
                call_count: node.call_count,
                avg_ns: node.avg_ns(),
                percentage,
                callers: top_callers,
            }
        })
        .collect();

    hotspots.sort_by(|a, b| b.self_ns.cmp(&a.self_ns).then_with(|| a.identity.cmp(&b.identity)));
    hotspots
}
