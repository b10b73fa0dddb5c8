//! Flamegraph reconstruction
//!
//! Rebuilds the nested interval tree of every thread from a recorded event
//! feed. Unlike the call graph, which aggregates by function, the flamegraph
//! keeps every activation in call order:
//!
//! ```text
//! enter(main,0) enter(f,1) exit(f,3) enter(g,3) exit(g,4) exit(main,5)
//!
//! thread-1  [main 0..5                    ]
//!              [f 1..3   ][g 3..4]
//! ```
//!
//! Construction is a pure left-to-right scan of the log ([`build`]), so it can
//! run after the fact or next to a live builder without sharing state.

mod reconstruct;

pub use reconstruct::build;

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::domain::{FunctionIdentity, Tid};

/// One displayed activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInterval {
    pub identity: FunctionIdentity,
    pub thread: Tid,
    /// Nanoseconds since the first event of the log
    pub start_offset: u64,
    pub duration: u64,
    /// `duration` minus the displayed children; hidden children stay in here
    pub self_duration: u64,
    /// In call order
    pub children: Vec<FrameInterval>,
}

impl FrameInterval {
    #[must_use]
    pub fn end_offset(&self) -> u64 {
        self.start_offset + self.duration
    }

    /// Number of displayed intervals in this subtree, itself included
    #[must_use]
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(FrameInterval::len).sum::<usize>()
    }

    /// Deepest nesting level below and including this interval
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(FrameInterval::depth).max().unwrap_or(0)
    }
}

/// Interval tree of one thread
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadFlame {
    /// Outermost displayed intervals, in call order
    pub roots: Vec<FrameInterval>,
    /// Elapsed time of every outermost activation, hidden ones included
    pub total_ns: u64,
}

/// Per-thread interval trees for one event log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlameForest {
    pub threads: BTreeMap<Tid, ThreadFlame>,
    /// Minimum displayed duration the forest was built with
    pub min_duration: u64,
    /// Some frame was force-closed (mismatched exit or unterminated call)
    pub truncated: bool,
}

impl FlameForest {
    #[must_use]
    pub fn thread(&self, tid: Tid) -> Option<&ThreadFlame> {
        self.threads.get(&tid)
    }

    /// Recorded time of `tid`'s outermost frames (0 for unknown threads)
    #[must_use]
    pub fn total_for(&self, tid: Tid) -> u64 {
        self.threads.get(&tid).map_or(0, |t| t.total_ns)
    }

    #[must_use]
    pub fn total_by_thread(&self) -> BTreeMap<Tid, u64> {
        self.threads.iter().map(|(tid, t)| (*tid, t.total_ns)).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.values().all(|t| t.roots.is_empty())
    }

    /// Collapsed-stack lines (`thread-1;main;f 2000`), weighted by self time
    ///
    /// Identical stacks are merged and lines are sorted, so output is
    /// deterministic. Stacks with no self time are omitted.
    #[must_use]
    pub fn folded(&self) -> Vec<String> {
        let mut stacks: BTreeMap<String, u64> = BTreeMap::new();
        for (tid, flame) in &self.threads {
            let prefix = format!("thread-{}", tid.0);
            for root in &flame.roots {
                fold_into(root, &prefix, &mut stacks);
            }
        }
        stacks
            .into_iter()
            .filter(|(_, weight)| *weight > 0)
            .map(|(stack, weight)| format!("{stack} {weight}"))
            .collect()
    }

    /// `folded()` joined into one newline-terminated string
    #[must_use]
    pub fn folded_text(&self) -> String {
        let mut out = String::new();
        for line in self.folded() {
            let _ = writeln!(out, "{line}");
        }
        out
    }
}

fn fold_into(interval: &FrameInterval, prefix: &str, stacks: &mut BTreeMap<String, u64>) {
    // ';' separates frames and ' ' the weight
    let name = interval.identity.name.replace(';', ":").replace(' ', "_");
    let path = format!("{prefix};{name}");
    *stacks.entry(path.clone()).or_default() += interval.self_duration;
    for child in &interval.children {
        fold_into(child, &path, stacks);
    }
}
