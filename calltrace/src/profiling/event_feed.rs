//! Recorded event feeds
//!
//! A feed is stored as JSON Lines, one [`FeedEvent`] per line:
//!
//! ```text
//! {"kind":"enter","identity":{"name":"main","module":"app.rs","line":3},"timestamp":0,"thread":1}
//! {"kind":"exit","identity":{"name":"main","module":"app.rs","line":3},"timestamp":5000,"thread":1}
//! ```
//!
//! Replaying a recorded feed through a [`CallGraphBuilder`] gives the same
//! session a live capture would have produced.

use log::debug;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use super::call_graph::CallGraphBuilder;
use crate::domain::{FeedError, FeedEvent};

/// Parse a JSON Lines feed; blank lines are skipped
///
/// # Errors
/// `FeedError::Malformed` with the 1-based line number of the first bad line.
pub fn read_event_log<R: BufRead>(reader: R) -> Result<Vec<FeedEvent>, FeedError> {
    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = serde_json::from_str(line)
            .map_err(|e| FeedError::Malformed { line: index + 1, message: e.to_string() })?;
        events.push(event);
    }
    Ok(events)
}

/// # Errors
/// I/O failures and malformed lines.
pub fn load_event_log(path: &Path) -> Result<Vec<FeedEvent>, FeedError> {
    let events = read_event_log(BufReader::new(File::open(path)?))?;
    debug!("Loaded {} events from {}", events.len(), path.display());
    Ok(events)
}

/// Write `events` as JSON Lines
///
/// # Errors
/// I/O failures.
pub fn write_event_log<W: Write>(events: &[FeedEvent], writer: W) -> Result<(), FeedError> {
    let mut writer = BufWriter::new(writer);
    for event in events {
        serde_json::to_writer(&mut writer, event).map_err(std::io::Error::from)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Feed every event to `builder` in order
pub fn replay(events: &[FeedEvent], builder: &CallGraphBuilder) {
    for event in events {
        builder.record(event);
    }
    debug!("Replayed {} events", events.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TraceConfig;
    use crate::domain::{FunctionIdentity, Tid, Timestamp};

    fn id(name: &str) -> FunctionIdentity {
        FunctionIdentity::new(name, "app.rs", 3)
    }

    #[test]
    fn test_read_event_log_skips_blank_lines() {
        let input = concat!(
            r#"{"kind":"enter","identity":{"name":"main","module":"app.rs","line":3},"timestamp":0,"thread":1}"#,
            "\n\n",
            r#"{"kind":"exit","identity":{"name":"main","module":"app.rs","line":3},"timestamp":5,"thread":1}"#,
            "\n",
        );
        let events = read_event_log(input.as_bytes()).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].is_enter());
        assert_eq!(events[1].timestamp, Timestamp(5));
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let input = concat!(
            r#"{"kind":"enter","identity":{"name":"main","module":"app.rs","line":3},"timestamp":0,"thread":1}"#,
            "\n",
            r#"{"kind":"jump","timestamp":1}"#,
            "\n",
        );
        let err = read_event_log(input.as_bytes()).unwrap_err();
        assert!(matches!(err, FeedError::Malformed { line: 2, .. }));
    }

    #[test]
    fn test_write_then_replay() {
        let events = vec![
            FeedEvent::enter(id("main"), Timestamp(0), Tid(1)).with_args("n=1"),
            FeedEvent::enter(id("f"), Timestamp(1), Tid(1)),
            FeedEvent::exit(id("f"), Timestamp(3), Tid(1)),
            FeedEvent::exit(id("main"), Timestamp(5), Tid(1)),
        ];
        let mut buf = Vec::new();
        write_event_log(&events, &mut buf).unwrap();
        assert_eq!(buf.iter().filter(|&&b| b == b'\n').count(), 4);

        let loaded = read_event_log(buf.as_slice()).unwrap();
        assert_eq!(loaded, events);

        let builder = CallGraphBuilder::new(TraceConfig::default(), Timestamp(0));
        replay(&loaded, &builder);
        let session = builder.finalize(Timestamp(5));
        assert_eq!(session.node(&id("main")).unwrap().self_ns, 3);
    }
}
