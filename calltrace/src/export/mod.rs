//! Trace export functionality
//!
//! This module reads and writes the trace document, the JSON interchange form
//! of a [`TraceSession`](crate::trace_data::TraceSession) consumed by external
//! renderers and by `compare`.

pub mod document;

pub use document::{from_reader, from_str, load, save, to_string, to_writer, DOCUMENT_VERSION};
