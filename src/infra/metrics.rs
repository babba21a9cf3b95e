//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! Counters are monotonic; the sample-age histogram and the per-interval
//! sample count are swapped to zero on every report.
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Sample age bucket boundaries (milliseconds)
/// Buckets: ≤250, ≤500, ≤1000, ≤2000, ≤4000, ≤8000, ≤16000, ≤32000, ≤64000, ≤128000, >128000
const AGE_BUCKET_BOUNDS: [u64; 10] = [250, 500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a sample age using binary search
#[inline]
fn bucket_index(age_ms: u64) -> usize {
    AGE_BUCKET_BOUNDS.partition_point(|&bound| bound < age_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [250, 500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000, 256000];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Why a sample never reached the alert state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Older than the active mode's max sample age
    Stale,
    /// Older than the last emitted sample
    OutOfOrder,
    /// Fallback poll sample within the minimum delta of the last emission
    Duplicate,
    /// Fallback poll sample while the continuous watch is delivering
    WatchPreferred,
    /// Arrived while no journey was tracking
    Inactive,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Stale => "stale",
            DropReason::OutOfOrder => "out_of_order",
            DropReason::Duplicate => "duplicate",
            DropReason::WatchPreferred => "watch_preferred",
            DropReason::Inactive => "inactive",
        }
    }
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Raw samples delivered by the platform (monotonic)
    samples_received: AtomicU64,
    /// Samples forwarded to observers (monotonic)
    samples_emitted: AtomicU64,
    /// Samples emitted since last report (reset on report)
    samples_since_report: AtomicU64,
    dropped_stale: AtomicU64,
    dropped_out_of_order: AtomicU64,
    dropped_duplicate: AtomicU64,
    dropped_watch_preferred: AtomicU64,
    dropped_inactive: AtomicU64,
    /// Sample age histogram at emission time (reset on report)
    age_buckets: [AtomicU64; NUM_BUCKETS],
    /// Max sample age in ms (reset on report)
    age_max_ms: AtomicU64,
    acquisition_errors: AtomicU64,
    alerts_fired: AtomicU64,
    mode_changes: AtomicU64,
    persistence_failures: AtomicU64,
    notifier_failures: AtomicU64,
    journeys_started: AtomicU64,
    journeys_finished: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            samples_received: AtomicU64::new(0),
            samples_emitted: AtomicU64::new(0),
            samples_since_report: AtomicU64::new(0),
            dropped_stale: AtomicU64::new(0),
            dropped_out_of_order: AtomicU64::new(0),
            dropped_duplicate: AtomicU64::new(0),
            dropped_watch_preferred: AtomicU64::new(0),
            dropped_inactive: AtomicU64::new(0),
            age_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            age_max_ms: AtomicU64::new(0),
            acquisition_errors: AtomicU64::new(0),
            alerts_fired: AtomicU64::new(0),
            mode_changes: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            notifier_failures: AtomicU64::new(0),
            journeys_started: AtomicU64::new(0),
            journeys_finished: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_sample_received(&self) {
        self.samples_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a sample forwarded to observers with its age at emission
    #[inline]
    pub fn record_sample_emitted(&self, age_ms: u64) {
        self.samples_emitted.fetch_add(1, Ordering::Relaxed);
        self.samples_since_report.fetch_add(1, Ordering::Relaxed);
        self.age_buckets[bucket_index(age_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.age_max_ms, age_ms);
    }

    #[inline]
    pub fn record_sample_dropped(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Stale => &self.dropped_stale,
            DropReason::OutOfOrder => &self.dropped_out_of_order,
            DropReason::Duplicate => &self.dropped_duplicate,
            DropReason::WatchPreferred => &self.dropped_watch_preferred,
            DropReason::Inactive => &self.dropped_inactive,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_acquisition_error(&self) {
        self.acquisition_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_alert_fired(&self) {
        self.alerts_fired.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_mode_change(&self) {
        self.mode_changes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notifier_failure(&self) {
        self.notifier_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_journey_started(&self) {
        self.journeys_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_journey_finished(&self) {
        self.journeys_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn samples_emitted(&self) -> u64 {
        self.samples_emitted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self, reason: DropReason) -> u64 {
        let counter = match reason {
            DropReason::Stale => &self.dropped_stale,
            DropReason::OutOfOrder => &self.dropped_out_of_order,
            DropReason::Duplicate => &self.dropped_duplicate,
            DropReason::WatchPreferred => &self.dropped_watch_preferred,
            DropReason::Inactive => &self.dropped_inactive,
        };
        counter.load(Ordering::Relaxed)
    }

    pub fn alerts_fired(&self) -> u64 {
        self.alerts_fired.load(Ordering::Relaxed)
    }

    pub fn mode_changes(&self) -> u64 {
        self.mode_changes.load(Ordering::Relaxed)
    }

    pub fn persistence_failures(&self) -> u64 {
        self.persistence_failures.load(Ordering::Relaxed)
    }

    pub fn notifier_failures(&self) -> u64 {
        self.notifier_failures.load(Ordering::Relaxed)
    }

    pub fn acquisition_errors(&self) -> u64 {
        self.acquisition_errors.load(Ordering::Relaxed)
    }

    /// Take a snapshot; resets the per-interval histogram and rate counters
    pub fn report(&self) -> MetricsSummary {
        let now = Instant::now();
        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *last = now;
            elapsed
        };

        let samples_since = self.samples_since_report.swap(0, Ordering::Relaxed);
        let samples_per_min =
            if elapsed_secs > 0.0 { samples_since as f64 * 60.0 / elapsed_secs } else { 0.0 };

        let age_buckets = swap_buckets(&self.age_buckets);
        let age_max_ms = self.age_max_ms.swap(0, Ordering::Relaxed);

        MetricsSummary {
            samples_received: self.samples_received.load(Ordering::Relaxed),
            samples_emitted: self.samples_emitted.load(Ordering::Relaxed),
            samples_per_min,
            dropped_stale: self.dropped_stale.load(Ordering::Relaxed),
            dropped_out_of_order: self.dropped_out_of_order.load(Ordering::Relaxed),
            dropped_duplicate: self.dropped_duplicate.load(Ordering::Relaxed),
            dropped_watch_preferred: self.dropped_watch_preferred.load(Ordering::Relaxed),
            dropped_inactive: self.dropped_inactive.load(Ordering::Relaxed),
            age_buckets,
            age_p50_ms: percentile_from_buckets(&age_buckets, 0.50),
            age_p95_ms: percentile_from_buckets(&age_buckets, 0.95),
            age_max_ms,
            acquisition_errors: self.acquisition_errors.load(Ordering::Relaxed),
            alerts_fired: self.alerts_fired.load(Ordering::Relaxed),
            mode_changes: self.mode_changes.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            notifier_failures: self.notifier_failures.load(Ordering::Relaxed),
            journeys_started: self.journeys_started.load(Ordering::Relaxed),
            journeys_finished: self.journeys_finished.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub samples_received: u64,
    pub samples_emitted: u64,
    pub samples_per_min: f64,
    pub dropped_stale: u64,
    pub dropped_out_of_order: u64,
    pub dropped_duplicate: u64,
    pub dropped_watch_preferred: u64,
    pub dropped_inactive: u64,
    /// Sample age histogram buckets
    /// Bounds: ≤250, ≤500, ≤1000, ≤2000, ≤4000, ≤8000, ≤16000, ≤32000, ≤64000, ≤128000, >128000 ms
    pub age_buckets: [u64; NUM_BUCKETS],
    pub age_p50_ms: u64,
    pub age_p95_ms: u64,
    pub age_max_ms: u64,
    pub acquisition_errors: u64,
    pub alerts_fired: u64,
    pub mode_changes: u64,
    pub persistence_failures: u64,
    pub notifier_failures: u64,
    pub journeys_started: u64,
    pub journeys_finished: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            samples_received = %self.samples_received,
            samples_emitted = %self.samples_emitted,
            samples_per_min = format!("{:.1}", self.samples_per_min),
            dropped_stale = %self.dropped_stale,
            dropped_duplicate = %self.dropped_duplicate,
            dropped_watch_preferred = %self.dropped_watch_preferred,
            age_p50_ms = %self.age_p50_ms,
            age_p95_ms = %self.age_p95_ms,
            acquisition_errors = %self.acquisition_errors,
            alerts_fired = %self.alerts_fired,
            mode_changes = %self.mode_changes,
            persistence_failures = %self.persistence_failures,
            journeys_started = %self.journeys_started,
            journeys_finished = %self.journeys_finished,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(250), 0);
        assert_eq!(bucket_index(251), 1);
        assert_eq!(bucket_index(128000), 9);
        assert_eq!(bucket_index(500000), 10);
    }

    #[test]
    fn test_record_samples() {
        let metrics = Metrics::new();
        metrics.record_sample_received();
        metrics.record_sample_emitted(300);
        metrics.record_sample_emitted(5000);
        metrics.record_sample_dropped(DropReason::Duplicate);

        assert_eq!(metrics.samples_emitted(), 2);
        assert_eq!(metrics.dropped(DropReason::Duplicate), 1);
        assert_eq!(metrics.dropped(DropReason::Stale), 0);

        let summary = metrics.report();
        assert_eq!(summary.samples_received, 1);
        assert_eq!(summary.age_buckets[1], 1);
        // 5000 ms falls in the <=8000 bucket
        assert_eq!(summary.age_buckets[5], 1);
        assert_eq!(summary.age_max_ms, 5000);
    }

    #[test]
    fn test_report_resets_histogram_but_not_totals() {
        let metrics = Metrics::new();
        metrics.record_sample_emitted(100);
        metrics.record_alert_fired();

        let first = metrics.report();
        assert_eq!(first.age_buckets.iter().sum::<u64>(), 1);

        let second = metrics.report();
        assert_eq!(second.age_buckets.iter().sum::<u64>(), 0);
        assert_eq!(second.age_max_ms, 0);
        assert_eq!(second.samples_emitted, 1);
        assert_eq!(second.alerts_fired, 1);
    }

    #[test]
    fn test_percentile_from_buckets() {
        let mut buckets = [0u64; NUM_BUCKETS];
        buckets[0] = 90;
        buckets[5] = 10;
        assert_eq!(percentile_from_buckets(&buckets, 0.50), 250);
        assert_eq!(percentile_from_buckets(&buckets, 0.95), 8000);
        assert_eq!(percentile_from_buckets(&[0; NUM_BUCKETS], 0.5), 0);
    }
}
