//! Trace document format
//!
//! The JSON interchange form of a sealed [`TraceSession`]: the contract with
//! external renderers and the input of `compare`.
//!
//! ```json
//! {
//!   "version": 1,
//!   "metadata": { "title": "...", "source": "...", "start": 0, "end": 5000, ... },
//!   "graph": {
//!     "nodes": [ { "name": "main", "module": "app.rs", "line": 3, "call_count": 1, ... } ],
//!     "edges": [ { "caller": { ... }, "callee": { ... }, "count": 1, "cumulative_ns": 2000 } ]
//!   },
//!   "memory_samples": [ { "timestamp": 0, "rss_bytes": 1048576 } ]
//! }
//! ```
//!
//! Loading validates the whole document before building a session, so a
//! malformed document never yields a partial session. Errors name the
//! offending section.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use crate::domain::{DocumentError, FunctionIdentity, Timestamp};
use crate::trace_data::{
    Anomaly, CallEdge, CallNode, MemorySample, SessionMetadata, ThreadSummary, TraceSession,
};

/// Format version written by this crate
pub const DOCUMENT_VERSION: u32 = 1;

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Serialize)]
struct TraceDocument<'a> {
    version: u32,
    metadata: MetadataDto,
    graph: GraphDto,
    memory_samples: &'a [MemorySample],
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataDto {
    #[serde(default)]
    title: String,
    #[serde(default)]
    source: String,
    start: Timestamp,
    end: Option<Timestamp>,
    #[serde(default)]
    threads: Vec<ThreadSummary>,
    #[serde(default)]
    truncated: bool,
    #[serde(default)]
    anomalies: Vec<Anomaly>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GraphDto {
    nodes: Vec<NodeDto>,
    edges: Vec<EdgeDto>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeDto {
    #[serde(flatten)]
    identity: FunctionIdentity,
    call_count: u64,
    total_ns: u64,
    self_ns: u64,
    /// Derived; written for renderers, ignored on load
    #[serde(default)]
    avg_ns: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_arguments: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EdgeDto {
    caller: FunctionIdentity,
    callee: FunctionIdentity,
    count: u64,
    cumulative_ns: u64,
}

impl From<&SessionMetadata> for MetadataDto {
    fn from(m: &SessionMetadata) -> Self {
        Self {
            title: m.title.clone(),
            source: m.source.clone(),
            start: m.start,
            end: m.end,
            threads: m.threads.clone(),
            truncated: m.truncated,
            anomalies: m.anomalies.clone(),
            warnings: m.warnings.clone(),
        }
    }
}

impl From<MetadataDto> for SessionMetadata {
    fn from(dto: MetadataDto) -> Self {
        let mut threads = dto.threads;
        threads.sort_by_key(|t| t.tid);
        Self {
            title: dto.title,
            source: dto.source,
            start: dto.start,
            end: dto.end,
            threads,
            truncated: dto.truncated,
            anomalies: dto.anomalies,
            warnings: dto.warnings,
        }
    }
}

impl From<&CallNode> for NodeDto {
    fn from(n: &CallNode) -> Self {
        Self {
            identity: n.identity.clone(),
            call_count: n.call_count,
            total_ns: n.total_ns,
            self_ns: n.self_ns,
            avg_ns: n.avg_ns(),
            last_arguments: n.last_arguments.clone(),
        }
    }
}

impl From<NodeDto> for CallNode {
    fn from(dto: NodeDto) -> Self {
        Self {
            identity: dto.identity,
            call_count: dto.call_count,
            total_ns: dto.total_ns,
            self_ns: dto.self_ns,
            last_arguments: dto.last_arguments,
        }
    }
}

impl From<&CallEdge> for EdgeDto {
    fn from(e: &CallEdge) -> Self {
        Self {
            caller: e.caller.clone(),
            callee: e.callee.clone(),
            count: e.count,
            cumulative_ns: e.cumulative_ns,
        }
    }
}

impl From<EdgeDto> for CallEdge {
    fn from(dto: EdgeDto) -> Self {
        Self {
            caller: dto.caller,
            callee: dto.callee,
            count: dto.count,
            cumulative_ns: dto.cumulative_ns,
        }
    }
}

// =============================================================================
// WRITING
// =============================================================================

/// Serialize `session` as a pretty-printed document
///
/// # Errors
/// Returns `DocumentError::Json` if writing fails.
pub fn to_writer<W: Write>(session: &TraceSession, writer: W) -> Result<(), DocumentError> {
    let document = TraceDocument {
        version: DOCUMENT_VERSION,
        metadata: session.metadata().into(),
        graph: GraphDto {
            nodes: session.nodes().map(NodeDto::from).collect(),
            edges: session.edges().map(EdgeDto::from).collect(),
        },
        memory_samples: session.memory_samples(),
    };
    serde_json::to_writer_pretty(writer, &document)?;
    Ok(())
}

/// # Errors
/// Returns `DocumentError::Json` if serialization fails.
pub fn to_string(session: &TraceSession) -> Result<String, DocumentError> {
    let mut buf = Vec::new();
    to_writer(session, &mut buf)?;
    String::from_utf8(buf).map_err(|e| DocumentError::parse("document", e.to_string()))
}

/// Write `session` to `path`, replacing any existing file
///
/// # Errors
/// I/O and serialization failures.
pub fn save(session: &TraceSession, path: &Path) -> Result<(), DocumentError> {
    let mut writer = BufWriter::new(File::create(path)?);
    to_writer(session, &mut writer)?;
    writer.flush()?;
    Ok(())
}

// =============================================================================
// READING
// =============================================================================

/// Parse a document into a sealed or unsealed session
///
/// # Errors
/// `DocumentError::Parse` naming the offending section
/// (`document`, `metadata`, `graph` or `memory_samples`).
pub fn from_str(input: &str) -> Result<TraceSession, DocumentError> {
    let value: Value = serde_json::from_str(input)
        .map_err(|e| DocumentError::parse("document", e.to_string()))?;
    let Value::Object(mut root) = value else {
        return Err(DocumentError::parse("document", "expected a JSON object"));
    };

    check_version(&root)?;
    let metadata: MetadataDto = section(&mut root, "metadata")?;
    let graph: GraphDto = section(&mut root, "graph")?;
    let memory_samples: Vec<MemorySample> = match root.remove("memory_samples") {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => serde_json::from_value(value)
            .map_err(|e| DocumentError::parse("memory_samples", e.to_string()))?,
    };

    check_graph_keys(&graph)?;
    if memory_samples.windows(2).any(|w| w[1].timestamp < w[0].timestamp) {
        return Err(DocumentError::parse("memory_samples", "samples are not in chronological order"));
    }

    let session = TraceSession::from_parts(
        metadata.into(),
        graph.nodes.into_iter().map(CallNode::from),
        graph.edges.into_iter().map(CallEdge::from),
        memory_samples,
    );
    session.check_metadata().map_err(|e| DocumentError::parse("metadata", e))?;
    session.check_graph().map_err(|e| DocumentError::parse("graph", e))?;
    Ok(session)
}

/// # Errors
/// I/O failures, then everything [`from_str`] reports.
pub fn from_reader<R: Read>(mut reader: R) -> Result<TraceSession, DocumentError> {
    let mut input = String::new();
    reader.read_to_string(&mut input)?;
    from_str(&input)
}

/// # Errors
/// I/O failures, then everything [`from_str`] reports.
pub fn load(path: &Path) -> Result<TraceSession, DocumentError> {
    from_reader(File::open(path)?)
}

fn check_version(root: &Map<String, Value>) -> Result<(), DocumentError> {
    match root.get("version") {
        None => Ok(()),
        Some(Value::Number(n)) if n.as_u64() == Some(u64::from(DOCUMENT_VERSION)) => Ok(()),
        Some(other) => Err(DocumentError::parse(
            "document",
            format!("unsupported version {other} (expected {DOCUMENT_VERSION})"),
        )),
    }
}

fn section<T: for<'de> Deserialize<'de>>(
    root: &mut Map<String, Value>,
    name: &'static str,
) -> Result<T, DocumentError> {
    let value = root.remove(name).ok_or_else(|| DocumentError::parse(name, "section is missing"))?;
    serde_json::from_value(value).map_err(|e| DocumentError::parse(name, e.to_string()))
}

/// Node identities and edge keys must be unique
fn check_graph_keys(graph: &GraphDto) -> Result<(), DocumentError> {
    let mut nodes = BTreeSet::new();
    for node in &graph.nodes {
        if !nodes.insert(&node.identity) {
            return Err(DocumentError::parse("graph", format!("duplicate node {}", node.identity)));
        }
    }
    let mut edges = BTreeSet::new();
    for edge in &graph.edges {
        if !edges.insert((&edge.caller, &edge.callee)) {
            return Err(DocumentError::parse(
                "graph",
                format!("duplicate edge {} -> {}", edge.caller, edge.callee),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TraceConfig;
    use crate::domain::Tid;
    use crate::profiling::CallGraphBuilder;
    use crate::trace_data::AllocationDelta;

    fn id(name: &str) -> FunctionIdentity {
        FunctionIdentity::new(name, "app.rs", 7)
    }

    fn sample_session() -> TraceSession {
        let config = TraceConfig { capture_args: true, ..TraceConfig::default() };
        let b = CallGraphBuilder::new(config, Timestamp(0)).with_metadata("unit", "app");
        b.on_enter(&id("main"), Timestamp(0), Tid(1), Some("argv=[]"));
        b.on_enter(&id("f"), Timestamp(1), Tid(1), None);
        b.on_exit(&id("f"), Timestamp(3), Tid(1));
        b.on_exit(&id("main"), Timestamp(5), Tid(1));
        let mut session = b.finalize(Timestamp(5));
        session.attach_memory(
            vec![
                MemorySample { timestamp: Timestamp(0), rss_bytes: 100, allocations: vec![] },
                MemorySample {
                    timestamp: Timestamp(4),
                    rss_bytes: 180,
                    allocations: vec![AllocationDelta {
                        site: "vec".to_string(),
                        size_delta: 80,
                        count_delta: 1,
                    }],
                },
            ],
            vec!["sampler warning".to_string()],
        );
        session
    }

    #[test]
    fn test_round_trip_preserves_session() {
        let session = sample_session();
        let text = to_string(&session).unwrap();
        let loaded = from_str(&text).unwrap();
        assert_eq!(loaded, session);
    }

    #[test]
    fn test_document_layout() {
        let text = to_string(&sample_session()).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["version"], 1);
        assert_eq!(value["metadata"]["title"], "unit");
        assert_eq!(value["metadata"]["end"], 5);
        let main = value["graph"]["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .find(|n| n["name"] == "main")
            .unwrap();
        assert_eq!(main["module"], "app.rs");
        assert_eq!(main["avg_ns"], 5);
        assert_eq!(main["last_arguments"], "argv=[]");
        assert_eq!(value["graph"]["edges"][0]["callee"]["name"], "f");
        assert_eq!(value["memory_samples"][1]["allocations"][0]["site"], "vec");
    }

    #[test]
    fn test_parse_errors_name_the_section() {
        let cases = [
            ("not json", "document"),
            ("[]", "document"),
            (r#"{"version": 9, "metadata": {}, "graph": {}}"#, "document"),
            (r#"{"graph": {"nodes": [], "edges": []}}"#, "metadata"),
            (r#"{"metadata": {"start": "x", "end": null}, "graph": {"nodes": [], "edges": []}}"#, "metadata"),
            (r#"{"metadata": {"start": 0, "end": 1}}"#, "graph"),
            (r#"{"metadata": {"start": 0, "end": 1}, "graph": {"nodes": 3, "edges": []}}"#, "graph"),
            (
                r#"{"metadata": {"start": 0, "end": 1}, "graph": {"nodes": [], "edges": []},
                    "memory_samples": [{"timestamp": 0}]}"#,
                "memory_samples",
            ),
        ];
        for (input, expected) in cases {
            let err = from_str(input).unwrap_err();
            assert_eq!(err.section(), Some(expected), "input: {input}");
        }
    }

    #[test]
    fn test_rejects_inconsistent_graph() {
        let node = r#"{"name": "f", "module": "a.rs", "line": 1, "call_count": 1, "total_ns": 2, "self_ns": 3}"#;
        let input = format!(
            r#"{{"metadata": {{"start": 0, "end": 1}}, "graph": {{"nodes": [{node}], "edges": []}}}}"#
        );
        assert_eq!(from_str(&input).unwrap_err().section(), Some("graph"));

        let duplicated = format!(
            r#"{{"metadata": {{"start": 0, "end": 1}}, "graph": {{"nodes": [{node}, {node}], "edges": []}}}}"#
        );
        let err = from_str(&duplicated).unwrap_err();
        assert!(err.to_string().contains("duplicate node"));
    }

    #[test]
    fn test_rejects_reversed_session_bounds() {
        let input = r#"{"metadata": {"start": 9, "end": 1}, "graph": {"nodes": [], "edges": []}}"#;
        assert_eq!(from_str(input).unwrap_err().section(), Some("metadata"));
    }

    #[test]
    fn test_rejects_unordered_samples() {
        let input = r#"{"metadata": {"start": 0, "end": 9}, "graph": {"nodes": [], "edges": []},
            "memory_samples": [{"timestamp": 5, "rss_bytes": 1}, {"timestamp": 2, "rss_bytes": 1}]}"#;
        assert_eq!(from_str(input).unwrap_err().section(), Some("memory_samples"));
    }
}
