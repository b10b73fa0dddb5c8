//! Memory statistics sources
//!
//! A [`MemorySource`] produces one [`MemoryReading`] per call. The sampler
//! owns its source and calls it from its own thread, so sources never need to
//! synchronize with the traced program.

#![allow(unsafe_code)] // sysconf() requires unsafe

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::SamplerError;

/// Fallback when `sysconf(_SC_PAGESIZE)` is unavailable
const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Cumulative allocation totals for one site
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteTotals {
    /// Live bytes (allocated minus freed)
    pub bytes: i64,
    /// Live allocations
    pub count: i64,
}

/// One raw measurement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryReading {
    pub rss_bytes: u64,
    /// Per-site totals, when the source tracks allocation sites
    pub sites: Option<BTreeMap<String, SiteTotals>>,
}

impl MemoryReading {
    #[must_use]
    pub fn rss(rss_bytes: u64) -> Self {
        Self { rss_bytes, sites: None }
    }
}

pub trait MemorySource: Send {
    /// Take one reading
    ///
    /// # Errors
    /// Returns `SamplerError` when statistics are (transiently) unavailable.
    fn read(&mut self) -> Result<MemoryReading, SamplerError>;
}

impl<F> MemorySource for F
where
    F: FnMut() -> Result<MemoryReading, SamplerError> + Send,
{
    fn read(&mut self) -> Result<MemoryReading, SamplerError> {
        self()
    }
}

// =============================================================================
// /proc/<pid>/statm
// =============================================================================

/// Resident set size from `/proc/<pid>/statm`
///
/// Format: `size resident shared text lib data dt`, all in pages.
#[derive(Debug, Clone)]
pub struct ProcStatm {
    path: PathBuf,
    page_size: u64,
}

impl ProcStatm {
    /// Sample the current process
    #[must_use]
    pub fn current() -> Self {
        Self::at("/proc/self/statm")
    }

    /// Sample another process
    #[must_use]
    pub fn for_pid(pid: u32) -> Self {
        Self::at(format!("/proc/{pid}/statm"))
    }

    fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), page_size: page_size() }
    }
}

impl MemorySource for ProcStatm {
    fn read(&mut self) -> Result<MemoryReading, SamplerError> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            SamplerError::StatsUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        let pages = parse_statm_resident(&content)?;
        Ok(MemoryReading::rss(pages * self.page_size))
    }
}

fn parse_statm_resident(content: &str) -> Result<u64, SamplerError> {
    content
        .split_whitespace()
        .nth(1)
        .and_then(|field| field.parse().ok())
        .ok_or_else(|| SamplerError::StatsUnavailable(format!("unexpected statm format: {content:?}")))
}

fn page_size() -> u64 {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(size).ok().filter(|&s| s > 0).unwrap_or(DEFAULT_PAGE_SIZE)
}

// =============================================================================
// ALLOCATION SITES
// =============================================================================

/// Per-allocation-site counters fed by instrumentation
///
/// Shared between the instrumented program (writers) and the sampler
/// (reader). Each site is its own entry, so writers for different sites do not
/// contend.
#[derive(Debug, Default)]
pub struct SiteCounters {
    sites: DashMap<String, SiteTotals>,
}

impl SiteCounters {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[allow(clippy::cast_possible_wrap)]
    pub fn record_alloc(&self, site: &str, bytes: u64) {
        self.apply(site, bytes as i64, 1);
    }

    #[allow(clippy::cast_possible_wrap)]
    pub fn record_free(&self, site: &str, bytes: u64) {
        self.apply(site, -(bytes as i64), -1);
    }

    fn apply(&self, site: &str, bytes: i64, count: i64) {
        if let Some(mut totals) = self.sites.get_mut(site) {
            totals.bytes += bytes;
            totals.count += count;
            return;
        }
        let mut totals = self.sites.entry(site.to_string()).or_default();
        totals.bytes += bytes;
        totals.count += count;
    }

    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, SiteTotals> {
        self.sites.iter().map(|e| (e.key().clone(), *e.value())).collect()
    }
}

/// Resident size from `inner` plus a [`SiteCounters`] snapshot
pub struct TrackedSource<S> {
    inner: S,
    sites: Arc<SiteCounters>,
}

impl<S: MemorySource> TrackedSource<S> {
    pub fn new(inner: S, sites: Arc<SiteCounters>) -> Self {
        Self { inner, sites }
    }
}

impl<S: MemorySource> MemorySource for TrackedSource<S> {
    fn read(&mut self) -> Result<MemoryReading, SamplerError> {
        let mut reading = self.inner.read()?;
        reading.sites = Some(self.sites.snapshot());
        Ok(reading)
    }
}
