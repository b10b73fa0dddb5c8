//! Left-to-right interval reconstruction
//!
//! Each thread keeps a stack of open intervals. Closing an interval either
//! attaches it to its parent's children (displayed) or drops it (shorter than
//! `min_duration`). A dropped interval's time is never subtracted from the
//! parent, so it shows up as parent self time.
//!
//! Protocol violations are handled the same way the call graph builder does:
//! an exit that matches a deeper frame unwinds everything above it, an exit
//! with no open match is ignored, and frames still open at the end of the log
//! close at the last timestamp seen.

use log::debug;
use std::collections::BTreeMap;

use super::{FlameForest, FrameInterval, ThreadFlame};
use crate::domain::{EventKind, FeedEvent, FunctionIdentity, Tid, Timestamp};

struct OpenInterval {
    identity: FunctionIdentity,
    start: Timestamp,
    children: Vec<FrameInterval>,
    /// Sum of displayed children durations
    shown_ns: u64,
}

#[derive(Default)]
struct ThreadScan {
    open: Vec<OpenInterval>,
    flame: ThreadFlame,
}

impl ThreadScan {
    fn close_top(&mut self, tid: Tid, at: Timestamp, origin: Timestamp, min_duration: u64) {
        let Some(open) = self.open.pop() else {
            return;
        };
        let duration = at.nanos_since(open.start);
        let displayed = duration >= min_duration;

        match self.open.last_mut() {
            Some(parent) => {
                if displayed {
                    parent.shown_ns += duration;
                }
            }
            None => self.flame.total_ns += duration,
        }
        if !displayed {
            return;
        }

        let interval = FrameInterval {
            identity: open.identity,
            thread: tid,
            start_offset: open.start.nanos_since(origin),
            duration,
            self_duration: duration.saturating_sub(open.shown_ns),
            children: open.children,
        };
        match self.open.last_mut() {
            Some(parent) => parent.children.push(interval),
            None => self.flame.roots.push(interval),
        }
    }
}

/// Reconstruct per-thread interval trees from an event log
///
/// Intervals shorter than `min_duration` (ns) are hidden; their time stays in
/// the parent's `self_duration` and in the thread total. Pure function of its
/// inputs.
#[must_use]
pub fn build(events: &[FeedEvent], min_duration: u64) -> FlameForest {
    let origin = events.iter().map(|e| e.timestamp).min().unwrap_or_default();
    let last = events.iter().map(|e| e.timestamp).max().unwrap_or_default();

    let mut scans: BTreeMap<Tid, ThreadScan> = BTreeMap::new();
    let mut truncated = false;
    let mut ignored = 0usize;

    for event in events {
        let scan = scans.entry(event.thread).or_default();
        match event.kind {
            EventKind::Enter => scan.open.push(OpenInterval {
                identity: event.identity.clone(),
                start: event.timestamp,
                children: Vec::new(),
                shown_ns: 0,
            }),
            EventKind::Exit => {
                let Some(depth) = scan.open.iter().rposition(|o| o.identity == event.identity)
                else {
                    ignored += 1;
                    continue;
                };
                if depth + 1 < scan.open.len() {
                    truncated = true;
                }
                while scan.open.len() > depth {
                    scan.close_top(event.thread, event.timestamp, origin, min_duration);
                }
            }
        }
    }

    for (tid, scan) in &mut scans {
        if !scan.open.is_empty() {
            truncated = true;
        }
        while !scan.open.is_empty() {
            scan.close_top(*tid, last, origin, min_duration);
        }
    }

    if ignored > 0 {
        debug!("Flamegraph ignored {ignored} exits without a matching enter");
    }

    FlameForest {
        threads: scans.into_iter().map(|(tid, scan)| (tid, scan.flame)).collect(),
        min_duration,
        truncated,
    }
}
