//! # Call Graph Builder
//!
//! Consumes enter/exit events inline on the traced threads and aggregates them
//! into call nodes and call edges.
//!
//! ## Attribution
//!
//! ```text
//! enter(main,0) enter(f,1) exit(f,3) exit(main,5)
//!
//!   f    elapsed 2, children 0 → total += 2, self += 2
//!        parent(main).child_ns += 2, edge main→f += (1 call, 2ns)
//!   main elapsed 5, children 2 → total += 5, self += 3
//! ```
//!
//! Each activation is its own frame, so direct and mutual recursion aggregate
//! into one node per identity without special cases.
//!
//! ## Performance
//!
//! - `on_enter()` / `on_exit()`: O(1): a stack push/pop, one node lookup,
//!   one edge lookup and relaxed atomic increments.
//! - Aggregates live in sharded `DashMap`s; threads only contend when they
//!   touch the same shard at the same time.
//! - Nodes get a dense numeric id on first sight so edge keys never allocate.

use dashmap::DashMap;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::stack::{CallStackFrame, ThreadStack};
use crate::config::TraceConfig;
use crate::domain::{EventKind, FeedEvent, FunctionIdentity, Tid, Timestamp};
use crate::trace_data::{Anomaly, AnomalyKind, CallEdge, CallNode, SessionMetadata, TraceSession};

// =============================================================================
// LIVE AGGREGATES
// =============================================================================

/// Shared, atomically updated statistics for one function
#[derive(Debug)]
pub(crate) struct NodeCell {
    id: u32,
    identity: FunctionIdentity,
    call_count: AtomicU64,
    total_ns: AtomicU64,
    self_ns: AtomicU64,
    last_arguments: Mutex<Option<String>>,
}

impl NodeCell {
    fn new(id: u32, identity: FunctionIdentity) -> Self {
        Self {
            id,
            identity,
            call_count: AtomicU64::new(0),
            total_ns: AtomicU64::new(0),
            self_ns: AtomicU64::new(0),
            last_arguments: Mutex::new(None),
        }
    }

    pub(crate) fn identity(&self) -> &FunctionIdentity {
        &self.identity
    }

    fn snapshot(&self) -> CallNode {
        CallNode {
            identity: self.identity.clone(),
            call_count: self.call_count.load(Ordering::Relaxed),
            total_ns: self.total_ns.load(Ordering::Relaxed),
            self_ns: self.self_ns.load(Ordering::Relaxed),
            last_arguments: self
                .last_arguments
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

#[derive(Debug)]
struct EdgeCell {
    caller: Arc<NodeCell>,
    callee: Arc<NodeCell>,
    count: AtomicU64,
    cumulative_ns: AtomicU64,
}

impl EdgeCell {
    fn snapshot(&self) -> CallEdge {
        CallEdge {
            caller: self.caller.identity.clone(),
            callee: self.callee.identity.clone(),
            count: self.count.load(Ordering::Relaxed),
            cumulative_ns: self.cumulative_ns.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Aggregates an event feed into a [`TraceSession`].
///
/// Shareable across the traced threads (`Send + Sync`); wrap it in an `Arc`
/// and call `on_enter`/`on_exit` from each thread. After `finalize()` the
/// builder ignores further events.
#[derive(Debug)]
pub struct CallGraphBuilder {
    config: TraceConfig,
    title: String,
    source: String,
    start: Timestamp,

    nodes: DashMap<FunctionIdentity, Arc<NodeCell>>,
    next_node_id: AtomicU32,
    edges: DashMap<(u32, u32), EdgeCell>,
    stacks: DashMap<Tid, ThreadStack>,

    anomalies: Mutex<Vec<Anomaly>>,
    truncated: AtomicBool,
    sealed: AtomicBool,
}

impl CallGraphBuilder {
    /// Create a builder whose session starts at `start`
    #[must_use]
    pub fn new(config: TraceConfig, start: Timestamp) -> Self {
        Self {
            config,
            title: String::new(),
            source: String::new(),
            start,
            nodes: DashMap::new(),
            next_node_id: AtomicU32::new(0),
            edges: DashMap::new(),
            stacks: DashMap::new(),
            anomalies: Mutex::new(Vec::new()),
            truncated: AtomicBool::new(false),
            sealed: AtomicBool::new(false),
        }
    }

    /// Set the session title and source identifier
    #[must_use]
    pub fn with_metadata(mut self, title: impl Into<String>, source: impl Into<String>) -> Self {
        self.title = title.into();
        self.source = source.into();
        self
    }

    #[must_use]
    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Dispatch a recorded event
    pub fn record(&self, event: &FeedEvent) {
        match event.kind {
            EventKind::Enter => {
                self.on_enter(&event.identity, event.timestamp, event.thread, event.args.as_deref());
            }
            EventKind::Exit => self.on_exit(&event.identity, event.timestamp, event.thread),
        }
    }

    /// Push a frame for `identity` on `thread`'s stack
    pub fn on_enter(
        &self,
        identity: &FunctionIdentity,
        timestamp: Timestamp,
        thread: Tid,
        args: Option<&str>,
    ) {
        if self.sealed.load(Ordering::Relaxed) || !self.config.traces(identity) {
            return;
        }

        let node = self.intern(identity);
        node.call_count.fetch_add(1, Ordering::Relaxed);
        if let Some(snapshot) = self.config.snapshot_args(args) {
            *node.last_arguments.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
        }

        self.stacks.entry(thread).or_default().push(CallStackFrame {
            node,
            entered: timestamp,
            child_ns: 0,
            thread,
        });
    }

    /// Pop the frame matching `identity` from `thread`'s stack
    ///
    /// A mismatching top frame is a protocol anomaly: if `identity` is open
    /// deeper in the stack, every frame above it is force-closed at
    /// `timestamp` before it is closed; otherwise the exit is ignored.
    pub fn on_exit(&self, identity: &FunctionIdentity, timestamp: Timestamp, thread: Tid) {
        if self.sealed.load(Ordering::Relaxed) || !self.config.traces(identity) {
            return;
        }

        let Some(mut stack) = self.stacks.get_mut(&thread) else {
            self.record_anomaly(AnomalyKind::UnmatchedExit, thread, timestamp, identity);
            return;
        };

        let matches = |frame: &CallStackFrame| frame.node.identity() == identity;
        match stack.top() {
            Some(top) if matches(top) => {}
            Some(top) => {
                let expected = top.node.identity().clone();
                let Some(depth) = stack.rposition(matches) else {
                    self.record_anomaly(AnomalyKind::UnmatchedExit, thread, timestamp, identity);
                    return;
                };
                self.record_anomaly(
                    AnomalyKind::MismatchedExit { expected },
                    thread,
                    timestamp,
                    identity,
                );
                self.truncated.store(true, Ordering::Relaxed);
                while stack.depth() > depth + 1 {
                    self.close_top(&mut stack, timestamp);
                }
            }
            None => {
                self.record_anomaly(AnomalyKind::UnmatchedExit, thread, timestamp, identity);
                return;
            }
        }

        self.close_top(&mut stack, timestamp);
        stack.record_exit();
    }

    /// Seal the session at `end`
    ///
    /// Frames still open are force-closed at `end`, recorded as
    /// `Unterminated` anomalies and mark the session truncated. Subsequent
    /// events are ignored.
    pub fn finalize(&self, end: Timestamp) -> TraceSession {
        self.sealed.store(true, Ordering::Relaxed);
        let end = end.max(self.start);

        let mut threads = Vec::with_capacity(self.stacks.len());
        for mut entry in self.stacks.iter_mut() {
            let tid = *entry.key();
            let stack = entry.value_mut();
            while let Some(top) = stack.top() {
                let identity = top.node.identity().clone();
                self.record_anomaly(AnomalyKind::Unterminated, tid, end, &identity);
                self.truncated.store(true, Ordering::Relaxed);
                self.close_top(stack, end);
            }
            threads.push(stack.summary(tid));
        }
        threads.sort_by_key(|t| t.tid);

        let nodes: Vec<CallNode> = self.nodes.iter().map(|n| n.value().snapshot()).collect();
        let edges: Vec<CallEdge> = self.edges.iter().map(|e| e.value().snapshot()).collect();

        let metadata = SessionMetadata {
            title: self.title.clone(),
            source: self.source.clone(),
            start: self.start,
            end: Some(end),
            threads,
            truncated: self.truncated.load(Ordering::Relaxed),
            anomalies: self.anomalies.lock().unwrap_or_else(PoisonError::into_inner).clone(),
            warnings: Vec::new(),
        };

        info!(
            "Sealed session: {} functions, {} edges, {} threads{}",
            nodes.len(),
            edges.len(),
            metadata.threads.len(),
            if metadata.truncated { " (truncated)" } else { "" }
        );

        TraceSession::from_parts(metadata, nodes, edges, Vec::new())
    }

    /// Current stack depth of `thread` (0 when unknown)
    #[must_use]
    pub fn depth(&self, thread: Tid) -> usize {
        self.stacks.get(&thread).map_or(0, |s| s.depth())
    }

    // Private helpers

    fn intern(&self, identity: &FunctionIdentity) -> Arc<NodeCell> {
        if let Some(node) = self.nodes.get(identity) {
            return Arc::clone(node.value());
        }
        let node = self.nodes.entry(identity.clone()).or_insert_with(|| {
            let id = self.next_node_id.fetch_add(1, Ordering::Relaxed);
            Arc::new(NodeCell::new(id, identity.clone()))
        });
        Arc::clone(node.value())
    }

    /// Pop the top frame and attribute its time to node, parent and edge
    fn close_top(&self, stack: &mut ThreadStack, timestamp: Timestamp) {
        let Some(frame) = stack.pop() else {
            return;
        };

        let elapsed = timestamp.nanos_since(frame.entered);
        let self_ns = elapsed.saturating_sub(frame.child_ns);
        frame.node.total_ns.fetch_add(elapsed, Ordering::Relaxed);
        frame.node.self_ns.fetch_add(self_ns, Ordering::Relaxed);

        match stack.top_mut() {
            Some(parent) => {
                parent.child_ns += elapsed;
                self.bump_edge(&parent.node, &frame.node, elapsed);
            }
            None => stack.add_root_time(elapsed),
        }
    }

    fn bump_edge(&self, caller: &Arc<NodeCell>, callee: &Arc<NodeCell>, elapsed: u64) {
        let key = (caller.id, callee.id);
        if let Some(edge) = self.edges.get(&key) {
            edge.count.fetch_add(1, Ordering::Relaxed);
            edge.cumulative_ns.fetch_add(elapsed, Ordering::Relaxed);
            return;
        }
        let edge = self.edges.entry(key).or_insert_with(|| EdgeCell {
            caller: Arc::clone(caller),
            callee: Arc::clone(callee),
            count: AtomicU64::new(0),
            cumulative_ns: AtomicU64::new(0),
        });
        edge.count.fetch_add(1, Ordering::Relaxed);
        edge.cumulative_ns.fetch_add(elapsed, Ordering::Relaxed);
    }

    fn record_anomaly(
        &self,
        kind: AnomalyKind,
        thread: Tid,
        timestamp: Timestamp,
        identity: &FunctionIdentity,
    ) {
        warn!("Protocol anomaly on {thread} at {}ns: {kind:?} for {identity}", timestamp.0);
        self.anomalies.lock().unwrap_or_else(PoisonError::into_inner).push(Anomaly {
            kind,
            thread,
            timestamp,
            identity: identity.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T1: Tid = Tid(1);

    fn id(name: &str) -> FunctionIdentity {
        FunctionIdentity::new(name, "app.rs", 1)
    }

    fn builder() -> CallGraphBuilder {
        CallGraphBuilder::new(TraceConfig::default(), Timestamp(0))
    }

    #[test]
    fn test_nested_call_attribution() {
        let b = builder();
        b.on_enter(&id("main"), Timestamp(0), T1, None);
        b.on_enter(&id("f"), Timestamp(1), T1, None);
        b.on_exit(&id("f"), Timestamp(3), T1);
        b.on_exit(&id("main"), Timestamp(5), T1);
        let session = b.finalize(Timestamp(5));

        let main = session.node(&id("main")).unwrap();
        assert_eq!((main.total_ns, main.self_ns, main.call_count), (5, 3, 1));
        let f = session.node(&id("f")).unwrap();
        assert_eq!((f.total_ns, f.self_ns, f.call_count), (2, 2, 1));

        assert_eq!(session.edge_count(), 1);
        let edge = session.edge(&id("main"), &id("f")).unwrap();
        assert_eq!((edge.count, edge.cumulative_ns), (1, 2));
        assert!(!session.metadata().truncated);
        assert_eq!(session.root_time(T1), 5);
    }

    #[test]
    fn test_direct_recursion_aggregates_one_node() {
        let b = builder();
        b.on_enter(&id("a"), Timestamp(0), T1, None);
        b.on_enter(&id("a"), Timestamp(1), T1, None);
        b.on_exit(&id("a"), Timestamp(2), T1);
        b.on_exit(&id("a"), Timestamp(3), T1);
        let session = b.finalize(Timestamp(3));

        assert_eq!(session.node_count(), 1);
        let a = session.node(&id("a")).unwrap();
        assert_eq!(a.call_count, 2);
        // inner activation: 1 self; outer: 3 elapsed - 1 child = 2 self
        assert_eq!(a.self_ns, 3);
        assert_eq!(a.total_ns, 4);
        let self_loop = session.edge(&id("a"), &id("a")).unwrap();
        assert_eq!((self_loop.count, self_loop.cumulative_ns), (1, 1));
    }

    #[test]
    fn test_call_count_increments_on_enter() {
        let b = builder();
        b.on_enter(&id("slow"), Timestamp(0), T1, None);
        let session = b.finalize(Timestamp(10));
        assert_eq!(session.node(&id("slow")).unwrap().call_count, 1);
    }

    #[test]
    fn test_finalize_force_closes_open_frames() {
        let b = builder();
        b.on_enter(&id("main"), Timestamp(0), T1, None);
        b.on_enter(&id("worker"), Timestamp(4), T1, None);
        let session = b.finalize(Timestamp(10));

        assert!(session.metadata().truncated);
        assert_eq!(session.metadata().anomalies.len(), 2);
        assert!(session
            .metadata()
            .anomalies
            .iter()
            .all(|a| a.kind == AnomalyKind::Unterminated && a.timestamp == Timestamp(10)));
        assert_eq!(session.node(&id("worker")).unwrap().total_ns, 6);
        assert_eq!(session.node(&id("main")).unwrap().self_ns, 4);
    }

    #[test]
    fn test_exit_without_enter_is_recorded_and_ignored() {
        let b = builder();
        b.on_exit(&id("ghost"), Timestamp(1), T1);
        b.on_enter(&id("main"), Timestamp(2), T1, None);
        b.on_exit(&id("other"), Timestamp(3), T1);
        b.on_exit(&id("main"), Timestamp(4), T1);
        let session = b.finalize(Timestamp(4));

        let anomalies = &session.metadata().anomalies;
        assert_eq!(anomalies.len(), 2);
        assert!(anomalies.iter().all(|a| a.kind == AnomalyKind::UnmatchedExit));
        assert_eq!(session.node(&id("main")).unwrap().total_ns, 2);
        assert!(session.node(&id("ghost")).is_none());
        assert!(!session.metadata().truncated);
    }

    #[test]
    fn test_mismatched_exit_unwinds_to_match() {
        let b = builder();
        b.on_enter(&id("main"), Timestamp(0), T1, None);
        b.on_enter(&id("parse"), Timestamp(1), T1, None);
        b.on_enter(&id("lex"), Timestamp(2), T1, None);
        // lex and parse unwound by an exception caught in main
        b.on_exit(&id("main"), Timestamp(6), T1);
        let session = b.finalize(Timestamp(6));

        assert!(session.metadata().truncated);
        let anomaly = &session.metadata().anomalies[0];
        assert_eq!(anomaly.kind, AnomalyKind::MismatchedExit { expected: id("lex") });
        assert_eq!(session.node(&id("lex")).unwrap().total_ns, 4);
        assert_eq!(session.node(&id("parse")).unwrap().total_ns, 5);
        assert_eq!(session.node(&id("main")).unwrap().total_ns, 6);
        assert_eq!(session.node(&id("main")).unwrap().self_ns, 1);
        assert_eq!(b.depth(T1), 0);
    }

    #[test]
    fn test_events_after_finalize_are_ignored() {
        let b = builder();
        let first = b.finalize(Timestamp(1));
        b.on_enter(&id("late"), Timestamp(2), T1, None);
        assert_eq!(first.node_count(), 0);
        assert_eq!(b.finalize(Timestamp(3)).node_count(), 0);
    }

    #[test]
    fn test_last_arguments_overwritten() {
        let config = TraceConfig { capture_args: true, ..TraceConfig::default() };
        let b = CallGraphBuilder::new(config, Timestamp(0));
        for (i, args) in ["n=1", "n=2"].iter().enumerate() {
            let t = i as u64 * 2;
            b.on_enter(&id("fib"), Timestamp(t), T1, Some(*args));
            b.on_exit(&id("fib"), Timestamp(t + 1), T1);
        }
        let session = b.finalize(Timestamp(4));
        assert_eq!(session.node(&id("fib")).unwrap().last_arguments.as_deref(), Some("n=2"));
    }

    #[test]
    fn test_excluded_functions_fold_into_caller() {
        let config =
            TraceConfig { exclude: vec!["log::".to_string()], ..TraceConfig::default() };
        let b = CallGraphBuilder::new(config, Timestamp(0));
        b.on_enter(&id("main"), Timestamp(0), T1, None);
        b.on_enter(&id("log::write"), Timestamp(1), T1, None);
        b.on_exit(&id("log::write"), Timestamp(4), T1);
        b.on_exit(&id("main"), Timestamp(5), T1);
        let session = b.finalize(Timestamp(5));

        assert_eq!(session.node_count(), 1);
        assert_eq!(session.node(&id("main")).unwrap().self_ns, 5);
    }

    #[test]
    fn test_threads_keep_separate_stacks() {
        let b = builder();
        b.on_enter(&id("a"), Timestamp(0), Tid(1), None);
        b.on_enter(&id("b"), Timestamp(1), Tid(2), None);
        b.on_exit(&id("a"), Timestamp(3), Tid(1));
        b.on_exit(&id("b"), Timestamp(4), Tid(2));
        let session = b.finalize(Timestamp(4));

        assert_eq!(session.edge_count(), 0);
        assert_eq!(session.thread_ids(), vec![Tid(1), Tid(2)]);
        assert_eq!(session.root_time(Tid(1)), 3);
        assert_eq!(session.root_time(Tid(2)), 3);
    }
}
