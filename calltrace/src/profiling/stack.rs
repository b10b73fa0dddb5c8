//! Per-thread call stacks
//!
//! One [`ThreadStack`] exists per observed thread. Only the owning thread
//! pushes and pops it; frames live exactly as long as the activation they
//! describe.

use std::sync::Arc;

use super::call_graph::NodeCell;
use crate::domain::{Tid, Timestamp};
use crate::trace_data::ThreadSummary;

/// One active invocation
#[derive(Debug)]
pub struct CallStackFrame {
    /// Shared aggregate of the function this activation belongs to
    pub(crate) node: Arc<NodeCell>,
    pub entered: Timestamp,
    /// Elapsed time of already-returned children
    pub child_ns: u64,
    pub thread: Tid,
}

/// Call stack of a single thread, outermost frame first
///
/// The parent of the frame at depth `d` is the frame at `d - 1`.
#[derive(Debug, Default)]
pub struct ThreadStack {
    frames: Vec<CallStackFrame>,
    events: u64,
    root_ns: u64,
    max_depth: usize,
}

impl ThreadStack {
    pub(crate) fn push(&mut self, frame: CallStackFrame) {
        self.frames.push(frame);
        self.events += 1;
        self.max_depth = self.max_depth.max(self.frames.len());
    }

    pub(crate) fn pop(&mut self) -> Option<CallStackFrame> {
        self.frames.pop()
    }

    /// Innermost open frame, which becomes the parent once the current top pops
    pub(crate) fn top_mut(&mut self) -> Option<&mut CallStackFrame> {
        self.frames.last_mut()
    }

    pub(crate) fn top(&self) -> Option<&CallStackFrame> {
        self.frames.last()
    }

    /// Depth (0-based from the outermost frame) of the innermost frame matching `pred`
    pub(crate) fn rposition(&self, pred: impl Fn(&CallStackFrame) -> bool) -> Option<usize> {
        self.frames.iter().rposition(pred)
    }

    pub(crate) fn record_exit(&mut self) {
        self.events += 1;
    }

    pub(crate) fn add_root_time(&mut self, nanos: u64) {
        self.root_ns += nanos;
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub(crate) fn summary(&self, tid: Tid) -> ThreadSummary {
        ThreadSummary {
            tid,
            events: self.events,
            root_ns: self.root_ns,
            max_depth: self.max_depth,
        }
    }
}
