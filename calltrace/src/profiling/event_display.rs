// Time conversions intentionally lose precision for display purposes
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

use std::io::{self, Write};

use crate::analysis::{ChangeStatus, ComparisonResult, FunctionHotspot};
use crate::domain::{format_nanos, ByteSize};
use crate::flamegraph::{FlameForest, FrameInterval};
use crate::memory::LeakReport;
use crate::trace_data::{AnomalyKind, TraceSession};

/// Display session-level facts: bounds, size, threads, anomalies
pub fn display_session_summary<W: Write>(out: &mut W, session: &TraceSession) -> io::Result<()> {
    let meta = session.metadata();
    let title = if meta.title.is_empty() { "(untitled)" } else { meta.title.as_str() };

    writeln!(out, "Session: {title}")?;
    if !meta.source.is_empty() {
        writeln!(out, "  source:    {}", meta.source)?;
    }
    writeln!(out, "  wall time: {}", format_nanos(session.wall_ns()))?;
    writeln!(
        out,
        "  graph:     {} functions, {} edges",
        session.node_count(),
        session.edge_count()
    )?;
    for thread in &meta.threads {
        writeln!(
            out,
            "  {}: {} events, root time {}, max depth {}",
            thread.tid,
            thread.events,
            format_nanos(thread.root_ns),
            thread.max_depth
        )?;
    }
    if !session.memory_samples().is_empty() {
        writeln!(out, "  memory:    {} samples", session.memory_samples().len())?;
    }

    if meta.truncated {
        writeln!(out, "  [TRUNCATED] frames were force-closed")?;
    }
    for anomaly in &meta.anomalies {
        let what = match &anomaly.kind {
            AnomalyKind::UnmatchedExit => "exit without enter".to_string(),
            AnomalyKind::MismatchedExit { expected } => format!("exit while {} was on top", expected.name),
            AnomalyKind::Unterminated => "still open at end".to_string(),
        };
        writeln!(
            out,
            "  [ANOMALY] {} {} at {}: {what}",
            anomaly.thread,
            anomaly.identity,
            format_nanos(anomaly.timestamp.0)
        )?;
    }
    for warning in &meta.warnings {
        writeln!(out, "  [WARN] {warning}")?;
    }
    Ok(())
}

/// Display the `limit` heaviest hotspots
pub fn display_hotspots<W: Write>(
    out: &mut W,
    hotspots: &[FunctionHotspot],
    limit: usize,
) -> io::Result<()> {
    writeln!(out, "\nHOTSPOTS (by self time)")?;
    writeln!(out, "{}", "─".repeat(72))?;
    if hotspots.is_empty() {
        writeln!(out, "  (no functions recorded)")?;
        return Ok(());
    }
    for hotspot in hotspots.iter().take(limit) {
        writeln!(
            out,
            "  {:<36} {:>6.1}%  self {:>10}  total {:>10}  {:>6} calls",
            hotspot.identity.name,
            hotspot.percentage,
            format_nanos(hotspot.self_ns),
            format_nanos(hotspot.total_ns),
            hotspot.call_count
        )?;
        if let Some((caller, nanos)) = hotspot.callers.first() {
            writeln!(out, "      ← {} ({})", caller.name, format_nanos(*nanos))?;
        }
    }
    if hotspots.len() > limit {
        writeln!(out, "  ... {} more", hotspots.len() - limit)?;
    }
    Ok(())
}

/// Display a comparison, most significant differences first
pub fn display_comparison<W: Write>(
    out: &mut W,
    result: &ComparisonResult,
    limit: usize,
) -> io::Result<()> {
    let s = &result.summary;
    writeln!(
        out,
        "Comparison (tolerance {:.1}%): {} added, {} removed, {} changed, {} unchanged",
        result.tolerance * 100.0,
        s.added,
        s.removed,
        s.changed,
        s.unchanged
    )?;

    let shown = result.functions.iter().filter(|f| f.status != ChangeStatus::Unchanged);
    for diff in shown.take(limit) {
        let marker = match diff.status {
            ChangeStatus::Added => "+",
            ChangeStatus::Removed => "-",
            ChangeStatus::Changed => "~",
            ChangeStatus::Unchanged => " ",
        };
        let pct = diff
            .pct_change
            .map_or_else(|| "new".to_string(), |p| format!("{:+.1}%", p * 100.0));
        let sign = if diff.delta_time < 0 { "-" } else { "+" };
        writeln!(
            out,
            "  {marker} {:<36} {sign}{:>10} ({pct:>8})  calls {:+}",
            diff.identity.name,
            format_nanos(diff.delta_time.unsigned_abs()),
            diff.delta_calls
        )?;
    }

    for (caller, callee) in &result.edges_added {
        writeln!(out, "  + edge {} -> {}", caller.name, callee.name)?;
    }
    for (caller, callee) in &result.edges_removed {
        writeln!(out, "  - edge {} -> {}", caller.name, callee.name)?;
    }
    Ok(())
}

/// Display a leak diagnosis
pub fn display_leak_report<W: Write>(out: &mut W, report: &LeakReport) -> io::Result<()> {
    let verdict = if report.flagged { "POSSIBLE LEAK" } else { "no leak detected" };
    writeln!(out, "\nMEMORY: {verdict}")?;
    writeln!(out, "{}", "─".repeat(72))?;

    let rate = report.growth_rate;
    let magnitude = ByteSize(rate.abs() as u64);
    writeln!(out, "  growth rate:  {}{magnitude}/s", if rate < 0.0 { "-" } else { "" })?;
    writeln!(out, "  growing pairs: {:.0}%", report.growing_pair_ratio * 100.0)?;
    if let Some(index) = report.first_flagged_sample {
        writeln!(out, "  first flagged at sample #{index}")?;
    }
    for breach in report.breaches.iter().take(5) {
        writeln!(
            out,
            "  [BREACH] sample #{} at {}: {} (+{})",
            breach.index,
            format_nanos(breach.timestamp.0),
            ByteSize(breach.rss_bytes),
            ByteSize(breach.growth)
        )?;
    }
    if report.breaches.len() > 5 {
        writeln!(out, "  ... {} more breaches", report.breaches.len() - 5)?;
    }

    if !report.top_consumers.is_empty() {
        writeln!(out, "  top consumers:")?;
        for consumer in &report.top_consumers {
            writeln!(
                out,
                "    {:<40} +{} (net {}{})",
                consumer.site,
                ByteSize(consumer.cumulative_growth),
                if consumer.net_delta < 0 { "-" } else { "+" },
                ByteSize(consumer.net_delta.unsigned_abs())
            )?;
        }
    }
    Ok(())
}

/// Display per-thread flamegraph totals
pub fn display_flame_summary<W: Write>(out: &mut W, forest: &FlameForest) -> io::Result<()> {
    for (tid, flame) in &forest.threads {
        let intervals: usize = flame.roots.iter().map(FrameInterval::len).sum();
        writeln!(
            out,
            "{tid}: {} recorded, {intervals} intervals shown",
            format_nanos(flame.total_ns)
        )?;
    }
    if forest.truncated {
        writeln!(out, "[TRUNCATED] some frames were force-closed")?;
    }
    Ok(())
}

/// Display progress for a time-limited run
pub fn display_progress(elapsed_secs: u64, duration: u64, remaining_secs: u64) {
    eprint!("\r   Progress: {elapsed_secs}s / {duration}s ({remaining_secs}s remaining)   ");
    io::stderr().flush().ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{analyze_hotspots, compare};
    use crate::config::TraceConfig;
    use crate::domain::{FunctionIdentity, Tid, Timestamp};
    use crate::memory::LeakPolicy;
    use crate::profiling::CallGraphBuilder;
    use crate::trace_data::MemorySample;

    fn id(name: &str) -> FunctionIdentity {
        FunctionIdentity::new(name, "app.rs", 1)
    }

    fn session(f_time: u64) -> TraceSession {
        let b = CallGraphBuilder::new(TraceConfig::default(), Timestamp(0)).with_metadata("demo", "app");
        b.on_enter(&id("main"), Timestamp(0), Tid(1), None);
        b.on_enter(&id("f"), Timestamp(1), Tid(1), None);
        b.on_exit(&id("f"), Timestamp(1 + f_time), Tid(1));
        b.on_exit(&id("main"), Timestamp(2 + f_time), Tid(1));
        b.on_exit(&id("ghost"), Timestamp(3 + f_time), Tid(1));
        b.finalize(Timestamp(3 + f_time))
    }

    fn render(f: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_session_summary_lists_anomalies() {
        let s = session(10);
        let text = render(|out| display_session_summary(out, &s));
        assert!(text.contains("Session: demo"));
        assert!(text.contains("2 functions, 1 edges"));
        assert!(text.contains("TID:1"));
        assert!(text.contains("[ANOMALY]"));
        assert!(text.contains("exit without enter"));
    }

    #[test]
    fn test_hotspots_respect_limit() {
        let s = session(10);
        let text = render(|out| display_hotspots(out, &analyze_hotspots(&s), 1));
        assert!(text.contains(" f "));
        assert!(text.contains("... 1 more"));
    }

    #[test]
    fn test_comparison_marks_changes() {
        let text = render(|out| {
            display_comparison(out, &compare(&session(10), &session(100), 0.01).unwrap(), 10)
        });
        assert!(text.contains("0 added, 0 removed, 2 changed"));
        assert!(text.contains("~ f"));
        assert!(text.contains("+900.0%"));
    }

    #[test]
    fn test_leak_report_verdict() {
        let samples: Vec<_> = (0..4u64)
            .map(|i| MemorySample {
                timestamp: Timestamp(i * 1_000_000_000),
                rss_bytes: ByteSize::mib(10 + 3 * i).as_u64(),
                allocations: vec![],
            })
            .collect();
        let report = LeakReport::analyze(&samples, ByteSize::mib(5), &LeakPolicy::default(), 5);
        let text = render(|out| display_leak_report(out, &report));
        assert!(text.contains("POSSIBLE LEAK"));
        assert!(text.contains("3.0 MB/s"));
        assert!(text.contains("[BREACH] sample #2"));
    }
}
