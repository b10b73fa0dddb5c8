//! Periodic memory sampler
//!
//! Runs on its own thread, reading a [`MemorySource`] once at start, once per
//! interval and once more at stop. The traced program is never paused: the
//! sampler only reads process-wide statistics.
//!
//! ```text
//! start() ──► baseline sample
//!             tick ──► sample ──► tick ──► sample ...
//! stop()  ──► final sample ──► SamplerOutput { samples, warnings, report }
//! ```
//!
//! `stop()` wakes the thread through a channel, so it returns without waiting
//! out the current interval.

use crossbeam_channel::{bounded, select, tick, Sender};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::leak::{ConsumerTally, LeakPolicy, LeakReport};
use super::source::{MemoryReading, MemorySource, SiteTotals};
use crate::config::TraceConfig;
use crate::domain::{ByteSize, Clock, SamplerError, Timestamp};
use crate::trace_data::{AllocationDelta, MemorySample};

/// Consecutive failures that escalate to a session warning
pub const FAILURE_ESCALATION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerConfig {
    pub interval: Duration,
    /// Growth that flags a leak in the final report
    pub threshold: ByteSize,
    pub policy: LeakPolicy,
    /// Allocation deltas kept per sample and consumers kept in the report
    pub top_n: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self::from(&TraceConfig::default())
    }
}

impl From<&TraceConfig> for SamplerConfig {
    fn from(config: &TraceConfig) -> Self {
        Self {
            interval: config.sample_interval,
            threshold: config.leak_threshold,
            policy: config.leak_policy,
            top_n: config.top_n,
        }
    }
}

/// Everything the sampler collected
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerOutput {
    /// Chronological
    pub samples: Vec<MemorySample>,
    pub warnings: Vec<String>,
    pub report: LeakReport,
}

impl SamplerOutput {
    fn new(series: RecordedSeries, config: &SamplerConfig) -> Self {
        let report = LeakReport::analyze_with_tally(
            &series.samples,
            config.threshold,
            &config.policy,
            &series.consumers,
            config.top_n,
        );
        Self { samples: series.samples, warnings: series.warnings, report }
    }
}

/// Samples and warnings gathered by a [`SeriesRecorder`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedSeries {
    pub samples: Vec<MemorySample>,
    pub warnings: Vec<String>,
    /// Every site delta of the session, including those cut from samples
    pub consumers: ConsumerTally,
}

/// Turns raw readings into a sample series
///
/// Owns the failure streak and the previous site snapshot, so the series is
/// independent of how readings are scheduled.
#[derive(Debug, Default)]
pub struct SeriesRecorder {
    top_n: usize,
    samples: Vec<MemorySample>,
    warnings: Vec<String>,
    previous_sites: Option<BTreeMap<String, SiteTotals>>,
    consumers: ConsumerTally,
    consecutive_failures: u32,
}

impl SeriesRecorder {
    #[must_use]
    pub fn new(top_n: usize) -> Self {
        Self { top_n, ..Self::default() }
    }

    /// Record one reading taken at `timestamp`
    ///
    /// A failed reading is skipped. Every failure streak that reaches
    /// [`FAILURE_ESCALATION`] adds exactly one warning.
    pub fn observe(&mut self, timestamp: Timestamp, reading: Result<MemoryReading, SamplerError>) {
        match reading {
            Ok(reading) => {
                self.consecutive_failures = 0;
                let allocations = self.site_deltas(reading.sites);
                self.samples.push(MemorySample {
                    timestamp,
                    rss_bytes: reading.rss_bytes,
                    allocations,
                });
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!("Skipping memory sample at {}ns: {e}", timestamp.0);
                if self.consecutive_failures == FAILURE_ESCALATION {
                    warn!("{FAILURE_ESCALATION} consecutive memory samples failed");
                    self.warnings.push(format!(
                        "memory statistics unavailable for {FAILURE_ESCALATION} consecutive samples \
                         (last error at {}ns: {e})",
                        timestamp.0
                    ));
                }
            }
        }
    }

    #[must_use]
    pub fn samples(&self) -> &[MemorySample] {
        &self.samples
    }

    #[must_use]
    pub fn finish(self) -> RecordedSeries {
        RecordedSeries { samples: self.samples, warnings: self.warnings, consumers: self.consumers }
    }

    /// Per-site change since the previous snapshot, largest |size| first
    ///
    /// Only the first `top_n` deltas are kept on the sample; all of them feed
    /// the session tally.
    fn site_deltas(&mut self, sites: Option<BTreeMap<String, SiteTotals>>) -> Vec<AllocationDelta> {
        let Some(current) = sites else {
            return Vec::new();
        };
        let previous = self.previous_sites.take().unwrap_or_default();

        let mut deltas: Vec<AllocationDelta> = current
            .iter()
            .map(|(site, now)| {
                let before = previous.get(site).copied().unwrap_or_default();
                AllocationDelta {
                    site: site.clone(),
                    size_delta: now.bytes - before.bytes,
                    count_delta: now.count - before.count,
                }
            })
            .chain(
                // sites that vanished from the table
                previous
                    .iter()
                    .filter(|(site, _)| !current.contains_key(*site))
                    .map(|(site, before)| AllocationDelta {
                        site: site.clone(),
                        size_delta: -before.bytes,
                        count_delta: -before.count,
                    }),
            )
            .filter(|d| d.size_delta != 0 || d.count_delta != 0)
            .collect();

        deltas.sort_by(|a, b| {
            b.size_delta
                .unsigned_abs()
                .cmp(&a.size_delta.unsigned_abs())
                .then_with(|| a.site.cmp(&b.site))
        });
        for delta in &deltas {
            self.consumers.record(delta);
        }
        deltas.truncate(self.top_n);

        self.previous_sites = Some(current);
        deltas
    }
}

/// Handle to a running sampler thread
#[derive(Debug)]
pub struct SamplerHandle {
    config: SamplerConfig,
    stop_tx: Sender<()>,
    thread: JoinHandle<RecordedSeries>,
}

pub struct MemorySampler;

impl MemorySampler {
    /// Spawn the sampler thread
    ///
    /// # Errors
    /// Returns `SamplerError::SpawnFailed` if the thread cannot be created.
    pub fn start(
        mut source: Box<dyn MemorySource>,
        config: SamplerConfig,
        clock: Clock,
    ) -> Result<SamplerHandle, SamplerError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let interval = config.interval;

        let thread = thread::Builder::new()
            .name("calltrace-sampler".to_string())
            .spawn(move || {
                let mut recorder = SeriesRecorder::new(config.top_n);
                let ticker = tick(interval);
                recorder.observe(clock.now(), source.read());

                loop {
                    select! {
                        recv(ticker) -> _ => recorder.observe(clock.now(), source.read()),
                        recv(stop_rx) -> _ => break,
                    }
                }

                recorder.observe(clock.now(), source.read());
                debug!("Sampler stopped after {} samples", recorder.samples().len());
                recorder.finish()
            })
            .map_err(SamplerError::SpawnFailed)?;

        debug!("Sampler started (interval {interval:?})");
        Ok(SamplerHandle { config, stop_tx, thread })
    }
}

impl SamplerHandle {
    /// Stop sampling, then diagnose the collected series
    ///
    /// Takes one final sample before returning. Never waits out a full
    /// interval.
    #[must_use]
    pub fn stop(self) -> SamplerOutput {
        // A closed channel also ends the loop, so a failed send is harmless
        let _ = self.stop_tx.send(());
        let series = self.thread.join().unwrap_or_else(|_| {
            warn!("Memory sampler thread panicked");
            RecordedSeries {
                warnings: vec!["memory sampler thread panicked; samples lost".to_string()],
                ..RecordedSeries::default()
            }
        });
        SamplerOutput::new(series, &self.config)
    }
}
