//! # calltrace - Call Graph, Flamegraph and Memory Profiling Core
//!
//! calltrace turns a stream of function enter/exit events into an aggregated
//! call graph, per-thread flamegraphs and a memory leak diagnosis, and diffs
//! two captured runs against each other.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Instrumented Program                          │
//! │        (any mechanism that reports call boundaries)             │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ enter/exit events (calltrace-common)
//!             ┌───────────┴────────────┐
//!             ▼                        ▼
//! ┌──────────────────────┐  ┌──────────────────────┐  ┌─────────────┐
//! │  CallGraphBuilder    │  │ Flamegraph           │  │ Memory      │
//! │  (inline, per event) │  │ Reconstructor        │  │ Sampler     │
//! │                      │  │ (replay of the log)  │  │ (own thread)│
//! └──────────┬───────────┘  └──────────┬───────────┘  └──────┬──────┘
//!            │ finalize()              │ FlameForest          │ samples
//!            ▼                         ▼                      │
//! ┌─────────────────────────────────────────────────────────┐ │
//! │                TraceSession (sealed)                    │◀┘
//! │     nodes · edges · memory samples · metadata           │
//! └──────────┬──────────────────────────────┬───────────────┘
//!            ▼                              ▼
//!   ┌──────────────────┐          ┌──────────────────────┐
//!   │  Trace Document  │          │ Analysis             │
//!   │  (JSON export)   │          │ hotspots · compare   │
//!   └──────────────────┘          └──────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Core Pipeline Modules
//!
//! - [`profiling`]: Event intake
//!   - `call_graph`: per-thread stacks aggregated into shared nodes and edges
//!   - `capture`: live capture with RAII scopes and an optional sampler
//!   - `event_feed`: recorded JSON Lines feeds and replay
//!
//! - [`flamegraph`]: Nested interval trees rebuilt from an event log
//!
//! - [`memory`]: Memory sources, the periodic sampler and leak diagnosis
//!
//! - [`analysis`]: Hotspots by self time and the trace comparator
//!
//! - [`export`]: The trace document, the interchange format for renderers
//!
//! ### Supporting Modules
//!
//! - [`trace_data`]: Session data model (nodes, edges, samples, metadata)
//! - [`config`]: Every tunable the core consumes
//! - [`domain`]: Core domain types and errors
//! - [`cli`]: Command-line argument parsing
//!
//! ## Time Attribution
//!
//! For each closed frame:
//!
//! - `elapsed = exit - enter` is added to the node's total time
//! - `elapsed - children` is added to the node's self time
//! - `elapsed` is added to the parent's children time and to the
//!   `parent → callee` edge
//!
//! Summed self time over all nodes equals the time covered by outermost
//! frames, so self times partition the session wall time.
//!
//! ## Protocol Anomalies
//!
//! An exit that does not match the top frame never aborts the capture: the
//! stack is unwound to the matching frame (or the exit is ignored) and the
//! event is recorded as an anomaly in the session metadata.
//!
//! ## Typical Usage
//!
//! ```bash
//! # Aggregate a recorded feed and save the trace document
//! calltrace build events.jsonl -o trace.json
//!
//! # Folded stacks for a flamegraph renderer
//! calltrace flame events.jsonl --min-duration-us 50 > stacks.folded
//!
//! # What changed between two runs?
//! calltrace compare before.json after.json --tolerance 0.05
//! ```

pub mod analysis;
pub mod cli;
pub mod config;
pub mod domain;
pub mod export;
pub mod flamegraph;
pub mod memory;
pub mod profiling;
pub mod trace_data;
