//! CLI argument definitions

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{TraceConfig, DEFAULT_TOLERANCE, DEFAULT_TOP_N};
use crate::domain::{ByteSize, ConfigError};
use crate::memory::LeakMode;

#[derive(Parser)]
#[command(
    name = "calltrace",
    about = "Build call graphs, flamegraphs and leak reports from traced programs",
    after_help = "\
EXAMPLES:
    calltrace build events.jsonl -o trace.json     Aggregate a recorded event feed
    calltrace flame events.jsonl --min-duration-us 50
    calltrace compare before.json after.json       Diff two trace documents
    calltrace watch --pid 1234 --threshold 20MB    Watch a process for leaks
    calltrace summary trace.json                   Hotspots of a saved trace"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Replay an event feed (JSON Lines) into a trace document
    Build(BuildArgs),
    /// Reconstruct the flamegraph of an event feed as folded stacks
    Flame(FlameArgs),
    /// Compare two trace documents
    Compare(CompareArgs),
    /// Sample a process's memory and report leaks
    Watch(WatchArgs),
    /// Print hotspots and the leak report of a trace document
    Summary(SummaryArgs),
}

#[derive(ClapArgs)]
pub struct BuildArgs {
    /// Recorded event feed
    #[arg(value_name = "EVENTS")]
    pub events: PathBuf,

    /// Write the trace document here
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Session title stored in the document
    #[arg(long)]
    pub title: Option<String>,

    #[command(flatten)]
    pub filters: FilterArgs,

    /// Hotspots to print
    #[arg(long, default_value_t = DEFAULT_TOP_N)]
    pub top: usize,
}

#[derive(ClapArgs, Default)]
pub struct FilterArgs {
    /// Keep argument snapshots on call nodes
    #[arg(long)]
    pub capture_args: bool,

    /// Only trace functions whose name starts with PREFIX (repeatable)
    #[arg(long, value_name = "PREFIX")]
    pub include: Vec<String>,

    /// Drop functions whose name starts with PREFIX (repeatable)
    #[arg(long, value_name = "PREFIX")]
    pub exclude: Vec<String>,
}

#[derive(ClapArgs)]
pub struct FlameArgs {
    /// Recorded event feed
    #[arg(value_name = "EVENTS")]
    pub events: PathBuf,

    /// Hide intervals shorter than this (microseconds)
    #[arg(long, default_value = "0")]
    pub min_duration_us: u64,

    /// Write folded stacks here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(ClapArgs)]
pub struct CompareArgs {
    #[arg(value_name = "BEFORE")]
    pub before: PathBuf,

    #[arg(value_name = "AFTER")]
    pub after: PathBuf,

    /// Relative change that counts as a difference (0.01 = 1%)
    #[arg(long, default_value_t = DEFAULT_TOLERANCE)]
    pub tolerance: f64,

    /// Differences to print
    #[arg(long, default_value_t = 20)]
    pub top: usize,

    /// Print the comparison as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs)]
pub struct WatchArgs {
    /// Process ID to watch (default: this process)
    #[arg(short, long)]
    pub pid: Option<u32>,

    /// Seconds between samples
    #[arg(long, default_value = "1.0")]
    pub interval: f64,

    /// Growth that flags a leak (e.g. 512KB, 5MB, 1GiB)
    #[arg(long, default_value = "5MB")]
    pub threshold: ByteSize,

    /// Which signal flags a leak
    #[arg(long, value_enum, default_value = "either")]
    pub mode: LeakModeArg,

    /// Stop after N seconds (0 = until Ctrl+C or process exit)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Write the memory series as a trace document
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(ClapArgs)]
pub struct SummaryArgs {
    /// Trace document
    #[arg(value_name = "TRACE")]
    pub trace: PathBuf,

    /// Hotspots to print
    #[arg(long, default_value_t = DEFAULT_TOP_N)]
    pub top: usize,

    /// Growth that flags a leak in the memory series
    #[arg(long, default_value = "5MB")]
    pub threshold: ByteSize,
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum LeakModeArg {
    AnyJump,
    Sustained,
    Either,
}

impl From<LeakModeArg> for LeakMode {
    fn from(arg: LeakModeArg) -> Self {
        match arg {
            LeakModeArg::AnyJump => LeakMode::AnyJump,
            LeakModeArg::Sustained => LeakMode::Sustained,
            LeakModeArg::Either => LeakMode::Either,
        }
    }
}

impl BuildArgs {
    #[must_use]
    pub fn trace_config(&self) -> TraceConfig {
        TraceConfig {
            capture_args: self.filters.capture_args,
            include: self.filters.include.clone(),
            exclude: self.filters.exclude.clone(),
            top_n: self.top,
            ..TraceConfig::default()
        }
    }
}

impl FlameArgs {
    #[must_use]
    pub fn trace_config(&self) -> TraceConfig {
        TraceConfig {
            min_flame_duration_ns: self.min_duration_us.saturating_mul(1_000),
            ..TraceConfig::default()
        }
    }
}

impl CompareArgs {
    /// # Errors
    /// Rejects a negative or non-finite tolerance.
    pub fn trace_config(&self) -> Result<TraceConfig, ConfigError> {
        let config = TraceConfig { tolerance: self.tolerance, top_n: self.top, ..TraceConfig::default() };
        config.validate()?;
        Ok(config)
    }
}

impl WatchArgs {
    /// # Errors
    /// Rejects a non-positive or non-finite interval.
    pub fn trace_config(&self) -> Result<TraceConfig, ConfigError> {
        let sample_interval =
            Duration::try_from_secs_f64(self.interval).map_err(|_| ConfigError::ZeroInterval)?;
        let mut config = TraceConfig {
            sample_interval,
            leak_threshold: self.threshold,
            ..TraceConfig::default()
        };
        config.leak_policy.mode = self.mode.into();
        config.validate()?;
        Ok(config)
    }
}

impl SummaryArgs {
    #[must_use]
    pub fn trace_config(&self) -> TraceConfig {
        TraceConfig { leak_threshold: self.threshold, top_n: self.top, ..TraceConfig::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("calltrace").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_build_flags_map_to_config() {
        let args = parse(&[
            "build",
            "events.jsonl",
            "--capture-args",
            "--exclude",
            "log::",
            "--exclude",
            "tracing::",
        ]);
        let Command::Build(build) = args.command else { panic!("expected build") };
        let config = build.trace_config();
        assert!(config.capture_args);
        assert_eq!(config.exclude, vec!["log::", "tracing::"]);
        assert_eq!(config.top_n, DEFAULT_TOP_N);
    }

    #[test]
    fn test_watch_parses_sizes_and_interval() {
        let args = parse(&["watch", "--pid", "42", "--interval", "0.5", "--threshold", "20MB"]);
        let Command::Watch(watch) = args.command else { panic!("expected watch") };
        let config = watch.trace_config().unwrap();
        assert_eq!(config.sample_interval, Duration::from_millis(500));
        assert_eq!(config.leak_threshold, ByteSize::mib(20));
        assert_eq!(config.leak_policy.mode, LeakMode::Either);
        assert_eq!(watch.pid, Some(42));
    }

    #[test]
    fn test_watch_rejects_zero_interval() {
        let args = parse(&["watch", "--interval", "0"]);
        let Command::Watch(watch) = args.command else { panic!("expected watch") };
        assert_eq!(watch.trace_config().unwrap_err(), ConfigError::ZeroInterval);
    }

    #[test]
    fn test_flame_duration_is_converted_to_nanos() {
        let args = parse(&["flame", "events.jsonl", "--min-duration-us", "50"]);
        let Command::Flame(flame) = args.command else { panic!("expected flame") };
        assert_eq!(flame.trace_config().min_flame_duration_ns, 50_000);
    }

    #[test]
    fn test_compare_rejects_negative_tolerance() {
        let args = parse(&["compare", "a.json", "b.json", "--tolerance=-0.5"]);
        let Command::Compare(cmp) = args.command else { panic!("expected compare") };
        assert_eq!(cmp.trace_config().unwrap_err(), ConfigError::InvalidTolerance(-0.5));
    }

    #[test]
    fn test_compare_requires_two_documents() {
        let result = Args::try_parse_from(["calltrace", "compare", "only-one.json"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_threshold_is_a_usage_error() {
        let result = Args::try_parse_from(["calltrace", "watch", "--threshold", "lots"]);
        assert!(result.is_err());
    }
}
