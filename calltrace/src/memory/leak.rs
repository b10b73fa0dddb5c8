//! Leak diagnosis over a memory sample series
//!
//! Two signals, selected by [`LeakMode`]:
//!
//! - **Jump**: some sample exceeds the lowest earlier sample by more than the
//!   threshold.
//! - **Sustained**: at least `majority` of the consecutive sample pairs grow
//!   (requires `min_pairs` pairs).
//!
//! A [`LeakReport`] is a pure view over the samples; nothing is stored.

#![allow(clippy::cast_precision_loss)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::TraceConfig;
use crate::domain::{ByteSize, ConfigError, Timestamp};
use crate::trace_data::{AllocationDelta, MemorySample, TraceSession};

/// Which signals raise the leak flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LeakMode {
    /// Any pairwise growth above the threshold
    AnyJump,
    /// Growth across a majority of consecutive pairs
    Sustained,
    #[default]
    Either,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeakPolicy {
    pub mode: LeakMode,
    /// Fraction of growing pairs that counts as sustained growth
    pub majority: f64,
    /// Pairs needed before the sustained signal may fire
    pub min_pairs: usize,
}

impl Default for LeakPolicy {
    fn default() -> Self {
        Self { mode: LeakMode::Either, majority: 0.6, min_pairs: 2 }
    }
}

impl LeakPolicy {
    /// # Errors
    /// Fails when `majority` is outside `(0, 1]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.majority > 0.0 && self.majority <= 1.0 {
            Ok(())
        } else {
            Err(ConfigError::InvalidMajority(self.majority))
        }
    }
}

/// A sample that grew beyond the threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThresholdBreach {
    pub index: usize,
    pub timestamp: Timestamp,
    pub rss_bytes: u64,
    /// Growth over the lowest earlier sample
    pub growth: u64,
}

/// Allocation site ranked by cumulative positive delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopConsumer {
    pub site: String,
    pub cumulative_growth: u64,
    /// Sum of all deltas, shrinkage included
    pub net_delta: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeakReport {
    /// (last − first) / elapsed, bytes per second
    pub growth_rate: f64,
    pub flagged: bool,
    /// Earliest sample index at which the active signals fired
    pub first_flagged_sample: Option<usize>,
    pub jump_detected: bool,
    pub sustained_growth: bool,
    /// Share of consecutive pairs that grew
    pub growing_pair_ratio: f64,
    pub breaches: Vec<ThresholdBreach>,
    pub top_consumers: Vec<TopConsumer>,
}

impl LeakReport {
    /// Diagnose a session's memory series with the configured policy
    #[must_use]
    pub fn for_session(session: &TraceSession, config: &TraceConfig) -> Self {
        Self::analyze(
            session.memory_samples(),
            config.leak_threshold,
            &config.leak_policy,
            config.top_n,
        )
    }

    /// Diagnose `samples` (chronological order)
    ///
    /// Consumers are ranked from the deltas stored on the samples.
    #[must_use]
    pub fn analyze(
        samples: &[MemorySample],
        threshold: ByteSize,
        policy: &LeakPolicy,
        top_n: usize,
    ) -> Self {
        let tally = ConsumerTally::from_samples(samples);
        Self::analyze_with_tally(samples, threshold, policy, &tally, top_n)
    }

    /// Diagnose `samples`, ranking consumers from a session-wide `tally`
    #[must_use]
    pub fn analyze_with_tally(
        samples: &[MemorySample],
        threshold: ByteSize,
        policy: &LeakPolicy,
        tally: &ConsumerTally,
        top_n: usize,
    ) -> Self {
        let breaches = find_breaches(samples, threshold.as_u64());
        let jump_detected = !breaches.is_empty();

        let growing = samples.windows(2).filter(|w| w[1].rss_bytes > w[0].rss_bytes).count();
        let pairs = samples.len().saturating_sub(1);
        let growing_pair_ratio = if pairs == 0 { 0.0 } else { growing as f64 / pairs as f64 };
        let sustained_growth = pairs >= policy.min_pairs.max(1)
            && growing_pair_ratio >= policy.majority
            && net_growth(samples) > 0;

        let (use_jump, use_sustained) = match policy.mode {
            LeakMode::AnyJump => (true, false),
            LeakMode::Sustained => (false, true),
            LeakMode::Either => (true, true),
        };
        let flagged = (use_jump && jump_detected) || (use_sustained && sustained_growth);

        let first_flagged_sample = if flagged {
            let jump_at = breaches.first().map(|b| b.index).filter(|_| use_jump);
            let sustained_at = use_sustained.then(|| first_sustained_index(samples, policy)).flatten();
            match (jump_at, sustained_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            }
        } else {
            None
        };

        Self {
            growth_rate: growth_rate(samples),
            flagged,
            first_flagged_sample,
            jump_detected,
            sustained_growth,
            growing_pair_ratio,
            breaches,
            top_consumers: tally.top(top_n),
        }
    }
}

#[allow(clippy::cast_possible_wrap)]
fn net_growth(samples: &[MemorySample]) -> i64 {
    match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => last.rss_bytes as i64 - first.rss_bytes as i64,
        _ => 0,
    }
}

fn growth_rate(samples: &[MemorySample]) -> f64 {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return 0.0;
    };
    let elapsed = last.timestamp.nanos_since(first.timestamp);
    if elapsed == 0 {
        return 0.0;
    }
    (last.rss_bytes as f64 - first.rss_bytes as f64) / (elapsed as f64 / 1_000_000_000.0)
}

/// Samples exceeding the lowest earlier sample by more than `threshold`
fn find_breaches(samples: &[MemorySample], threshold: u64) -> Vec<ThresholdBreach> {
    let mut breaches = Vec::new();
    let Some(first) = samples.first() else {
        return breaches;
    };
    let mut lowest = first.rss_bytes;
    for (index, sample) in samples.iter().enumerate().skip(1) {
        let growth = sample.rss_bytes.saturating_sub(lowest);
        if growth > threshold {
            breaches.push(ThresholdBreach {
                index,
                timestamp: sample.timestamp,
                rss_bytes: sample.rss_bytes,
                growth,
            });
        }
        lowest = lowest.min(sample.rss_bytes);
    }
    breaches
}

/// Earliest prefix end at which the sustained signal holds
fn first_sustained_index(samples: &[MemorySample], policy: &LeakPolicy) -> Option<usize> {
    let mut growing = 0usize;
    // samples[..=index] holds `index` consecutive pairs
    for index in 1..samples.len() {
        if samples[index].rss_bytes > samples[index - 1].rss_bytes {
            growing += 1;
        }
        let ratio = growing as f64 / index as f64;
        if index >= policy.min_pairs.max(1)
            && ratio >= policy.majority
            && samples[index].rss_bytes > samples[0].rss_bytes
        {
            return Some(index);
        }
    }
    None
}

/// Running per-site growth over a whole session
///
/// Fed with every delta before any per-sample truncation, so a site that
/// grows a little at each boundary still ranks by its cumulative growth.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerTally {
    /// site -> (cumulative positive delta, net delta)
    sites: BTreeMap<String, (u64, i64)>,
}

impl ConsumerTally {
    #[must_use]
    pub fn from_samples(samples: &[MemorySample]) -> Self {
        let mut tally = Self::default();
        for delta in samples.iter().flat_map(|s| &s.allocations) {
            tally.record(delta);
        }
        tally
    }

    pub fn record(&mut self, delta: &AllocationDelta) {
        let entry = self.sites.entry(delta.site.clone()).or_default();
        entry.0 += delta.size_delta.max(0).unsigned_abs();
        entry.1 += delta.size_delta;
    }

    /// Top `n` sites by cumulative positive delta; ties by site name
    #[must_use]
    pub fn top(&self, n: usize) -> Vec<TopConsumer> {
        let mut consumers: Vec<TopConsumer> = self
            .sites
            .iter()
            .filter(|(_, (growth, _))| *growth > 0)
            .map(|(site, &(cumulative_growth, net_delta))| TopConsumer {
                site: site.clone(),
                cumulative_growth,
                net_delta,
            })
            .collect();
        consumers.sort_by(|a, b| {
            b.cumulative_growth.cmp(&a.cumulative_growth).then_with(|| a.site.cmp(&b.site))
        });
        consumers.truncate(n);
        consumers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    fn series(sizes: &[u64]) -> Vec<MemorySample> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &rss)| MemorySample {
                timestamp: Timestamp(i as u64 * 1_000_000_000),
                rss_bytes: rss,
                allocations: Vec::new(),
            })
            .collect()
    }

    fn analyze(samples: &[MemorySample], policy: LeakPolicy) -> LeakReport {
        LeakReport::analyze(samples, ByteSize::mib(5), &policy, 10)
    }

    #[test]
    fn test_steady_growth_flags_by_third_sample() {
        let sizes: Vec<u64> = (0..10).map(|i| 100 * MB + i * 2 * MB).collect();
        let report = analyze(&series(&sizes), LeakPolicy::default());

        assert!(report.flagged);
        assert!(report.jump_detected);
        assert!(report.sustained_growth);
        assert_eq!(report.first_flagged_sample, Some(2));
        assert!((report.growth_rate - (2 * MB) as f64).abs() < 1.0);
        // 6 MB over the baseline first exceeds 5 MB at index 3
        assert_eq!(report.breaches[0].index, 3);
    }

    #[test]
    fn test_jump_only_mode_waits_for_threshold() {
        let sizes: Vec<u64> = (0..10).map(|i| 100 * MB + i * 2 * MB).collect();
        let policy = LeakPolicy { mode: LeakMode::AnyJump, ..LeakPolicy::default() };
        let report = analyze(&series(&sizes), policy);
        assert_eq!(report.first_flagged_sample, Some(3));
    }

    #[test]
    fn test_flat_series_never_flags() {
        for mode in [LeakMode::AnyJump, LeakMode::Sustained, LeakMode::Either] {
            let policy = LeakPolicy { mode, ..LeakPolicy::default() };
            let report = analyze(&series(&[50 * MB; 10]), policy);
            assert!(!report.flagged, "{mode:?} flagged a flat series");
            assert!(report.breaches.is_empty());
            assert_eq!(report.growth_rate, 0.0);
            assert_eq!(report.first_flagged_sample, None);
        }
    }

    #[test]
    fn test_single_jump_after_dip() {
        // Dip to 90 MB, then jump to 97 MB: 7 MB above the lowest earlier sample
        let report = analyze(&series(&[100 * MB, 90 * MB, 97 * MB]), LeakPolicy::default());
        assert!(report.jump_detected);
        assert_eq!(report.breaches[0].growth, 7 * MB);
    }

    #[test]
    fn test_shrinking_series_is_not_sustained() {
        let report = analyze(&series(&[10 * MB, 9 * MB, 8 * MB, 9 * MB]), LeakPolicy::default());
        assert!(!report.sustained_growth);
        assert!(!report.flagged);
        assert!(report.growth_rate < 0.0);
    }

    #[test]
    fn test_empty_and_single_sample() {
        assert!(!analyze(&[], LeakPolicy::default()).flagged);
        let one = analyze(&series(&[10 * MB]), LeakPolicy::default());
        assert!(!one.flagged);
        assert_eq!(one.growing_pair_ratio, 0.0);
    }

    #[test]
    fn test_top_consumers_ranked_with_tiebreak() {
        let mut samples = series(&[MB, MB, MB]);
        let delta = |site: &str, size: i64| AllocationDelta {
            site: site.to_string(),
            size_delta: size,
            count_delta: 1,
        };
        samples[1].allocations = vec![delta("b::grow", 300), delta("a::grow", 300), delta("c", 50)];
        samples[2].allocations = vec![delta("c", -50), delta("d::free", -10)];

        let report = LeakReport::analyze(&samples, ByteSize(0), &LeakPolicy::default(), 2);
        let sites: Vec<&str> = report.top_consumers.iter().map(|c| c.site.as_str()).collect();
        assert_eq!(sites, vec!["a::grow", "b::grow"]);

        let all = LeakReport::analyze(&samples, ByteSize(0), &LeakPolicy::default(), 10);
        let c = all.top_consumers.iter().find(|c| c.site == "c").unwrap();
        assert_eq!((c.cumulative_growth, c.net_delta), (50, 0));
        assert!(all.top_consumers.iter().all(|c| c.site != "d::free"));
    }

    #[test]
    fn test_policy_validation() {
        assert!(LeakPolicy::default().validate().is_ok());
        assert!(LeakPolicy { majority: 0.0, ..LeakPolicy::default() }.validate().is_err());
        assert!(LeakPolicy { majority: 1.5, ..LeakPolicy::default() }.validate().is_err());
    }
}
