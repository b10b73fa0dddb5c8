use calltrace::domain::{ByteSize, Timestamp};
use calltrace::memory::{LeakMode, LeakPolicy, LeakReport, MemoryReading, SeriesRecorder, SiteTotals};
use std::collections::BTreeMap;
use calltrace::trace_data::{AllocationDelta, MemorySample};

const SECOND: u64 = 1_000_000_000;

fn series(rss_mib: impl IntoIterator<Item = u64>) -> Vec<MemorySample> {
    rss_mib
        .into_iter()
        .enumerate()
        .map(|(i, mib)| MemorySample {
            timestamp: Timestamp(i as u64 * SECOND),
            rss_bytes: ByteSize::mib(mib).as_u64(),
            allocations: vec![],
        })
        .collect()
}

fn policy(mode: LeakMode) -> LeakPolicy {
    LeakPolicy { mode, ..LeakPolicy::default() }
}

#[test]
fn test_steady_growth_is_flagged_early() {
    let samples = series((0..10).map(|i| 50 + 2 * i));
    let report = LeakReport::analyze(&samples, ByteSize::mib(5), &LeakPolicy::default(), 5);

    assert!(report.flagged);
    assert!(report.jump_detected && report.sustained_growth);
    assert!(report.first_flagged_sample.unwrap() <= 3);
    assert_eq!(report.breaches[0].index, 3);
    assert!((report.growth_rate - ByteSize::mib(2).as_u64() as f64).abs() < 1.0);
}

#[test]
fn test_modes_pick_their_own_signal() {
    let samples = series((0..10).map(|i| 50 + 2 * i));
    let threshold = ByteSize::mib(5);

    let jump = LeakReport::analyze(&samples, threshold, &policy(LeakMode::AnyJump), 5);
    assert_eq!(jump.first_flagged_sample, Some(3));

    let sustained = LeakReport::analyze(&samples, threshold, &policy(LeakMode::Sustained), 5);
    assert_eq!(sustained.first_flagged_sample, Some(2));
}

#[test]
fn test_flat_series_never_flags() {
    let samples = series(std::iter::repeat(64).take(20));
    let report = LeakReport::analyze(&samples, ByteSize::mib(5), &LeakPolicy::default(), 5);

    assert!(!report.flagged);
    assert_eq!(report.first_flagged_sample, None);
    assert!(report.breaches.is_empty());
    assert_eq!(report.growth_rate, 0.0);
}

#[test]
fn test_single_spike_is_a_jump_but_not_sustained() {
    let samples = series([64, 64, 64, 80, 64, 64, 64]);
    let threshold = ByteSize::mib(5);

    let sustained = LeakReport::analyze(&samples, threshold, &policy(LeakMode::Sustained), 5);
    assert!(!sustained.flagged);

    let jump = LeakReport::analyze(&samples, threshold, &policy(LeakMode::AnyJump), 5);
    assert!(jump.flagged);
    assert_eq!(jump.breaches.len(), 1);
}

#[test]
fn test_top_consumers_rank_growing_sites() {
    let mut samples = series([10, 12, 14]);
    samples[1].allocations = vec![
        AllocationDelta { site: "cache.rs:10".into(), size_delta: 4096, count_delta: 4 },
        AllocationDelta { site: "io.rs:3".into(), size_delta: 512, count_delta: 1 },
    ];
    samples[2].allocations = vec![
        AllocationDelta { site: "cache.rs:10".into(), size_delta: 8192, count_delta: 8 },
        AllocationDelta { site: "io.rs:3".into(), size_delta: -512, count_delta: -1 },
    ];
    let report = LeakReport::analyze(&samples, ByteSize::mib(5), &LeakPolicy::default(), 1);

    assert_eq!(report.top_consumers.len(), 1);
    assert_eq!(report.top_consumers[0].site, "cache.rs:10");
    assert_eq!(report.top_consumers[0].cumulative_growth, 12_288);
    assert_eq!(report.top_consumers[0].net_delta, 12_288);
}

#[test]
fn test_small_steady_growth_outranks_one_off_spikes() {
    // "b" grows 60 per sample and never leads one; "a", "c" and "d" grow 100 once
    let totals = [
        [0, 0, 0, 0],
        [100, 60, 0, 0],
        [100, 120, 100, 0],
        [100, 180, 100, 100],
    ];
    let mut recorder = SeriesRecorder::new(1);
    for (i, row) in totals.iter().enumerate() {
        let sites: BTreeMap<String, SiteTotals> = ["a", "b", "c", "d"]
            .iter()
            .zip(row)
            .map(|(site, &bytes)| (site.to_string(), SiteTotals { bytes, count: 1 }))
            .collect();
        let reading = MemoryReading { rss_bytes: ByteSize::mib(10).as_u64(), sites: Some(sites) };
        recorder.observe(Timestamp(i as u64 * SECOND), Ok(reading));
    }
    let series = recorder.finish();

    let report = LeakReport::analyze_with_tally(
        &series.samples,
        ByteSize::mib(5),
        &LeakPolicy::default(),
        &series.consumers,
        2,
    );
    let ranked: Vec<(&str, u64)> =
        report.top_consumers.iter().map(|c| (c.site.as_str(), c.cumulative_growth)).collect();
    assert_eq!(ranked, vec![("b", 180), ("a", 100)]);
}

#[test]
fn test_empty_and_single_sample_series() {
    let report = LeakReport::analyze(&[], ByteSize::mib(5), &LeakPolicy::default(), 5);
    assert!(!report.flagged);

    let one = series([100]);
    let report = LeakReport::analyze(&one, ByteSize::mib(5), &LeakPolicy::default(), 5);
    assert!(!report.flagged);
    assert_eq!(report.growing_pair_ratio, 0.0);
}
