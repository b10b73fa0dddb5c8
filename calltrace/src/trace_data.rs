//! Trace data models
//!
//! A [`TraceSession`] is the sealed result of one capture: aggregated call
//! nodes, call edges, the optional memory sample series and session metadata.
//! Sessions come out of `CallGraphBuilder::finalize()` or from loading a trace
//! document, and are read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{FunctionIdentity, Tid, Timestamp};

/// Aggregated statistics for one function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallNode {
    pub identity: FunctionIdentity,
    /// Incremented once per enter event
    pub call_count: u64,
    /// Wall time across all activations, nested calls included
    pub total_ns: u64,
    /// `total_ns` minus time spent in callees
    pub self_ns: u64,
    /// Snapshot of the most recent call's arguments
    pub last_arguments: Option<String>,
}

impl CallNode {
    #[must_use]
    pub fn avg_ns(&self) -> u64 {
        if self.call_count == 0 {
            0
        } else {
            self.total_ns / self.call_count
        }
    }
}

/// Aggregated statistics for one caller → callee pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEdge {
    pub caller: FunctionIdentity,
    pub callee: FunctionIdentity,
    pub count: u64,
    /// Callee time attributed through this caller
    pub cumulative_ns: u64,
}

/// Per-site allocation change between two consecutive samples
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationDelta {
    /// Allocation site or object category
    pub site: String,
    pub size_delta: i64,
    pub count_delta: i64,
}

/// One periodic memory measurement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySample {
    pub timestamp: Timestamp,
    pub rss_bytes: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allocations: Vec<AllocationDelta>,
}

/// Event-feed protocol violation observed during capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Exit with no open frame of that identity on the thread
    UnmatchedExit,
    /// Exit whose identity differs from the top frame; frames above the match were force-closed
    MismatchedExit { expected: FunctionIdentity },
    /// Frame still open at finalize; force-closed at the finalize timestamp
    Unterminated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    #[serde(flatten)]
    pub kind: AnomalyKind,
    pub thread: Tid,
    pub timestamp: Timestamp,
    pub identity: FunctionIdentity,
}

/// Per-thread capture statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub tid: Tid,
    /// Enter and exit events accepted for this thread
    pub events: u64,
    /// Sum of elapsed time of outermost frames
    pub root_ns: u64,
    pub max_depth: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionMetadata {
    pub title: String,
    /// Identifier of the traced program or recording
    pub source: String,
    pub start: Timestamp,
    /// Set when the session is sealed
    pub end: Option<Timestamp>,
    /// Sorted by thread id
    pub threads: Vec<ThreadSummary>,
    /// Any frame was force-closed
    pub truncated: bool,
    pub anomalies: Vec<Anomaly>,
    pub warnings: Vec<String>,
}

/// Sealed capture result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceSession {
    metadata: SessionMetadata,
    nodes: BTreeMap<FunctionIdentity, CallNode>,
    edges: BTreeMap<(FunctionIdentity, FunctionIdentity), CallEdge>,
    memory_samples: Vec<MemorySample>,
}

impl TraceSession {
    pub(crate) fn from_parts(
        metadata: SessionMetadata,
        nodes: impl IntoIterator<Item = CallNode>,
        edges: impl IntoIterator<Item = CallEdge>,
        memory_samples: Vec<MemorySample>,
    ) -> Self {
        Self {
            metadata,
            nodes: nodes.into_iter().map(|n| (n.identity.clone(), n)).collect(),
            edges: edges
                .into_iter()
                .map(|e| ((e.caller.clone(), e.callee.clone()), e))
                .collect(),
            memory_samples,
        }
    }

    /// Merge the sampler's output into a freshly finalized session
    pub(crate) fn attach_memory(&mut self, samples: Vec<MemorySample>, warnings: Vec<String>) {
        self.memory_samples = samples;
        self.metadata.warnings.extend(warnings);
    }

    #[must_use]
    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.metadata.end.is_some()
    }

    /// Nodes in identity order
    pub fn nodes(&self) -> impl Iterator<Item = &CallNode> {
        self.nodes.values()
    }

    /// Edges in (caller, callee) order
    pub fn edges(&self) -> impl Iterator<Item = &CallEdge> {
        self.edges.values()
    }

    #[must_use]
    pub fn node(&self, identity: &FunctionIdentity) -> Option<&CallNode> {
        self.nodes.get(identity)
    }

    #[must_use]
    pub fn edge(&self, caller: &FunctionIdentity, callee: &FunctionIdentity) -> Option<&CallEdge> {
        self.edges.get(&(caller.clone(), callee.clone()))
    }

    /// Look a node up by qualified name alone (first match in identity order)
    #[must_use]
    pub fn node_named(&self, name: &str) -> Option<&CallNode> {
        self.nodes.values().find(|n| n.identity.name == name)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn memory_samples(&self) -> &[MemorySample] {
        &self.memory_samples
    }

    /// Observed thread ids, ascending
    #[must_use]
    pub fn thread_ids(&self) -> Vec<Tid> {
        self.metadata.threads.iter().map(|t| t.tid).collect()
    }

    /// Outermost-frame time for `tid` (0 for unknown threads)
    #[must_use]
    pub fn root_time(&self, tid: Tid) -> u64 {
        self.metadata.threads.iter().find(|t| t.tid == tid).map_or(0, |t| t.root_ns)
    }

    /// Session wall time (0 while unsealed)
    #[must_use]
    pub fn wall_ns(&self) -> u64 {
        self.metadata.end.map_or(0, |end| end.nanos_since(self.metadata.start))
    }

    #[must_use]
    pub fn total_self_ns(&self) -> u64 {
        self.nodes.values().map(|n| n.self_ns).sum()
    }

    /// Check the metadata invariants
    ///
    /// # Errors
    /// Describes the first violated invariant.
    pub fn check_metadata(&self) -> Result<(), String> {
        if let Some(end) = self.metadata.end {
            if end < self.metadata.start {
                return Err(format!(
                    "end timestamp {} precedes start timestamp {}",
                    end.0, self.metadata.start.0
                ));
            }
        }
        Ok(())
    }

    /// Check the graph invariants
    ///
    /// # Errors
    /// Describes the first violated invariant.
    pub fn check_graph(&self) -> Result<(), String> {
        for node in self.nodes.values() {
            if node.self_ns > node.total_ns {
                return Err(format!(
                    "node {} has self time {} above total time {}",
                    node.identity, node.self_ns, node.total_ns
                ));
            }
            if node.call_count == 0 && node.total_ns > 0 {
                return Err(format!("node {} has time but no calls", node.identity));
            }
        }
        for edge in self.edges.values() {
            if !self.nodes.contains_key(&edge.caller) {
                return Err(format!("edge references unknown caller {}", edge.caller));
            }
            let Some(callee) = self.nodes.get(&edge.callee) else {
                return Err(format!("edge references unknown callee {}", edge.callee));
            };
            if edge.cumulative_ns > callee.total_ns {
                return Err(format!(
                    "edge {} -> {} carries {} ns, more than the callee total {}",
                    edge.caller, edge.callee, edge.cumulative_ns, callee.total_ns
                ));
            }
        }
        Ok(())
    }
}
