//! # calltrace - Main Entry Point
//!
//! Thin command-line layer over the library:
//! - **build**: replay an event feed into a trace document
//! - **flame**: folded flamegraph stacks of an event feed
//! - **compare**: diff two trace documents
//! - **watch**: sample a live process's memory and diagnose leaks
//! - **summary**: hotspots and leak report of a saved document

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use calltrace::analysis::{analyze_hotspots, compare};
use calltrace::cli::args::{BuildArgs, CompareArgs, FlameArgs, SummaryArgs, WatchArgs};
use calltrace::cli::{Args, Command};
use calltrace::domain::{ConfigError, FeedEvent, Timestamp};
use calltrace::export;
use calltrace::flamegraph;
use calltrace::memory::{LeakReport, MemorySource, ProcStatm};
use calltrace::profiling::{
    display_comparison, display_flame_summary, display_hotspots, display_leak_report,
    display_progress, display_session_summary, load_event_log, replay, CallGraphBuilder, Capture,
};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigError>().is_some() {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    match args.command {
        Command::Build(build) => run_build(&build, quiet),
        Command::Flame(flame) => run_flame(&flame, quiet),
        Command::Compare(cmp) => run_compare(&cmp),
        Command::Watch(watch) => run_watch(&watch, quiet).await,
        Command::Summary(summary) => run_summary(&summary),
    }
}

fn run_build(args: &BuildArgs, quiet: bool) -> Result<()> {
    let events = load_event_log(&args.events)
        .with_context(|| format!("Failed to read event feed {}", args.events.display()))?;
    let (start, end) = session_bounds(&events);

    let title = args.title.clone().unwrap_or_else(|| file_stem(&args.events));
    let builder = CallGraphBuilder::new(args.trace_config(), start)
        .with_metadata(title, args.events.display().to_string());
    replay(&events, &builder);
    let session = builder.finalize(end);

    if !quiet {
        let mut out = io::stdout().lock();
        display_session_summary(&mut out, &session)?;
        display_hotspots(&mut out, &analyze_hotspots(&session), args.top)?;
    }

    if let Some(path) = &args.output {
        export::save(&session, path)
            .with_context(|| format!("Failed to write trace document {}", path.display()))?;
        if !quiet {
            println!("saved: {}", path.display());
        }
    }
    Ok(())
}

fn run_flame(args: &FlameArgs, quiet: bool) -> Result<()> {
    let events = load_event_log(&args.events)
        .with_context(|| format!("Failed to read event feed {}", args.events.display()))?;
    let config = args.trace_config();
    let forest = flamegraph::build(&events, config.min_flame_duration_ns);

    let folded = forest.folded_text();
    match &args.output {
        Some(path) => {
            let mut writer = BufWriter::new(
                File::create(path).context("Failed to create folded stacks file")?,
            );
            writer.write_all(folded.as_bytes())?;
            writer.flush()?;
            if !quiet {
                eprintln!("saved: {}", path.display());
            }
        }
        None => io::stdout().lock().write_all(folded.as_bytes())?,
    }

    if !quiet {
        display_flame_summary(&mut io::stderr().lock(), &forest)?;
    }
    Ok(())
}

fn run_compare(args: &CompareArgs) -> Result<()> {
    let config = args.trace_config()?;
    let before = export::load(&args.before)
        .with_context(|| format!("Failed to load {}", args.before.display()))?;
    let after = export::load(&args.after)
        .with_context(|| format!("Failed to load {}", args.after.display()))?;

    let result = compare(&before, &after, config.tolerance)?;

    let mut out = io::stdout().lock();
    if args.json {
        serde_json::to_writer_pretty(&mut out, &result).context("Failed to write comparison")?;
        writeln!(out)?;
    } else {
        display_comparison(&mut out, &result, config.top_n)?;
    }
    Ok(())
}

async fn run_watch(args: &WatchArgs, quiet: bool) -> Result<()> {
    let config = args.trace_config()?;

    let (source, label): (Box<dyn MemorySource>, String) = match args.pid {
        Some(pid) => {
            check_process_exists(pid)?;
            (Box::new(ProcStatm::for_pid(pid)), format!("pid {pid}"))
        }
        None => (Box::new(ProcStatm::current()), "self".to_string()),
    };

    let capture = Capture::start_named(config.clone(), "memory watch", label, Some(source))
        .context("Failed to start memory sampler")?;
    info!("Watching memory every {:?}", config.sample_interval);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let started = Instant::now();
    let duration_limit = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    let proc_path = args.pid.map(|pid| format!("/proc/{pid}"));
    let mut exit_reason = "interrupted";

    loop {
        if let Some(limit) = duration_limit {
            let elapsed = started.elapsed();
            if elapsed >= limit {
                exit_reason = "duration limit reached";
                break;
            }
            if !quiet {
                let secs = elapsed.as_secs();
                display_progress(secs, args.duration, args.duration.saturating_sub(secs));
            }
        }

        if let Some(path) = &proc_path {
            if !Path::new(path).exists() {
                exit_reason = "process exited";
                break;
            }
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = &mut ctrl_c => break,
        }
    }

    let (session, report) = capture.stop_with_report();
    if !quiet {
        eprintln!(
            "\n{exit_reason}: {:.1}s, {} samples",
            started.elapsed().as_secs_f64(),
            session.memory_samples().len()
        );
    }
    for warning in &session.metadata().warnings {
        warn!("{warning}");
    }

    let report = report.unwrap_or_else(|| LeakReport::for_session(&session, &config));
    display_leak_report(&mut io::stdout().lock(), &report)?;

    if let Some(path) = &args.output {
        export::save(&session, path)
            .with_context(|| format!("Failed to write trace document {}", path.display()))?;
        if !quiet {
            println!("saved: {}", path.display());
        }
    }
    Ok(())
}

fn run_summary(args: &SummaryArgs) -> Result<()> {
    let session = export::load(&args.trace)
        .with_context(|| format!("Failed to load {}", args.trace.display()))?;

    let mut out = io::stdout().lock();
    display_session_summary(&mut out, &session)?;
    display_hotspots(&mut out, &analyze_hotspots(&session), args.top)?;
    if !session.memory_samples().is_empty() {
        let report = LeakReport::for_session(&session, &args.trace_config());
        display_leak_report(&mut out, &report)?;
    }
    Ok(())
}

fn check_process_exists(pid: u32) -> Result<()> {
    if !Path::new(&format!("/proc/{pid}")).exists() {
        anyhow::bail!(
            "Process {pid} not found.\n\n\
             Is the process still running? Check with: ps -p {pid}"
        );
    }
    Ok(())
}

fn file_stem(path: &Path) -> String {
    path.file_stem().map_or_else(String::new, |s| s.to_string_lossy().into_owned())
}

/// Earliest and latest timestamps of a feed
fn session_bounds(events: &[FeedEvent]) -> (Timestamp, Timestamp) {
    let start = events.iter().map(|e| e.timestamp).min().unwrap_or_default();
    let end = events.iter().map(|e| e.timestamp).max().unwrap_or_default();
    (start, end)
}
