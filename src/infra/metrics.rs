//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! Counters are monotonic; `report()` computes per-interval rates by diffing
//! against the previous snapshot.
//!
//! NOTE: All atomics use Relaxed ordering; these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Sentinel stored in `last_distance_bits` before the first evaluated sample
const NO_DISTANCE: u64 = u64::MAX;

/// Lock-free metrics collector
pub struct Metrics {
    /// Fixes forwarded by a location source
    samples_received: AtomicU64,
    /// Fixes run through the evaluator
    samples_evaluated: AtomicU64,
    /// Fixes that arrived after stop and were discarded
    samples_discarded: AtomicU64,
    /// Fixes dropped because the sample channel was full
    samples_dropped: AtomicU64,
    entered_total: AtomicU64,
    exited_total: AtomicU64,
    /// Alarm alerts successfully handed to the notifier
    alerts_sent: AtomicU64,
    notifier_failures: AtomicU64,
    starts_total: AtomicU64,
    stops_total: AtomicU64,
    /// Monitoring loops restarted by the supervisor
    restarts_total: AtomicU64,
    permission_denied_total: AtomicU64,
    /// f64 bits of the most recent distance to target
    last_distance_bits: AtomicU64,
    /// Evaluated count at last report, for rate calculation
    last_report_evaluated: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            samples_received: AtomicU64::new(0),
            samples_evaluated: AtomicU64::new(0),
            samples_discarded: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
            entered_total: AtomicU64::new(0),
            exited_total: AtomicU64::new(0),
            alerts_sent: AtomicU64::new(0),
            notifier_failures: AtomicU64::new(0),
            starts_total: AtomicU64::new(0),
            stops_total: AtomicU64::new(0),
            restarts_total: AtomicU64::new(0),
            permission_denied_total: AtomicU64::new(0),
            last_distance_bits: AtomicU64::new(NO_DISTANCE),
            last_report_evaluated: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_sample_received(&self) {
        self.samples_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sample_evaluated(&self, distance_m: Option<f64>) {
        self.samples_evaluated.fetch_add(1, Ordering::Relaxed);
        if let Some(d) = distance_m {
            self.last_distance_bits.store(d.to_bits(), Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_sample_discarded(&self) {
        self.samples_discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sample_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_entered(&self) {
        self.entered_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_exited(&self) {
        self.exited_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_alert_sent(&self) {
        self.alerts_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notifier_failure(&self) {
        self.notifier_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_start(&self) {
        self.starts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stop(&self) {
        self.stops_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restarts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_permission_denied(&self) {
        self.permission_denied_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Distance to target from the most recent evaluated sample
    pub fn last_distance_m(&self) -> Option<f64> {
        match self.last_distance_bits.load(Ordering::Relaxed) {
            NO_DISTANCE => None,
            bits => Some(f64::from_bits(bits)),
        }
    }

    pub fn entered_total(&self) -> u64 {
        self.entered_total.load(Ordering::Relaxed)
    }

    pub fn alerts_sent(&self) -> u64 {
        self.alerts_sent.load(Ordering::Relaxed)
    }

    pub fn notifier_failures(&self) -> u64 {
        self.notifier_failures.load(Ordering::Relaxed)
    }

    pub fn samples_evaluated(&self) -> u64 {
        self.samples_evaluated.load(Ordering::Relaxed)
    }

    pub fn samples_discarded(&self) -> u64 {
        self.samples_discarded.load(Ordering::Relaxed)
    }

    pub fn restarts_total(&self) -> u64 {
        self.restarts_total.load(Ordering::Relaxed)
    }

    /// Snapshot all counters and compute the evaluation rate since last report
    pub fn report(&self) -> MetricsSummary {
        let now = Instant::now();
        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *last = now;
            elapsed
        };

        let mut summary = self.snapshot();
        let previous =
            self.last_report_evaluated.swap(summary.samples_evaluated, Ordering::Relaxed);
        if elapsed_secs > 0.0 {
            summary.samples_per_min =
                summary.samples_evaluated.saturating_sub(previous) as f64 * 60.0 / elapsed_secs;
        }
        summary
    }

    /// Snapshot all counters without touching the reporter's rate window
    pub fn snapshot(&self) -> MetricsSummary {
        MetricsSummary {
            samples_received: self.samples_received.load(Ordering::Relaxed),
            samples_evaluated: self.samples_evaluated.load(Ordering::Relaxed),
            samples_discarded: self.samples_discarded.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            samples_per_min: 0.0,
            entered_total: self.entered_total.load(Ordering::Relaxed),
            exited_total: self.exited_total.load(Ordering::Relaxed),
            alerts_sent: self.alerts_sent.load(Ordering::Relaxed),
            notifier_failures: self.notifier_failures.load(Ordering::Relaxed),
            starts_total: self.starts_total.load(Ordering::Relaxed),
            stops_total: self.stops_total.load(Ordering::Relaxed),
            restarts_total: self.restarts_total.load(Ordering::Relaxed),
            permission_denied_total: self.permission_denied_total.load(Ordering::Relaxed),
            last_distance_m: self.last_distance_m(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub samples_received: u64,
    pub samples_evaluated: u64,
    pub samples_discarded: u64,
    pub samples_dropped: u64,
    pub samples_per_min: f64,
    pub entered_total: u64,
    pub exited_total: u64,
    pub alerts_sent: u64,
    pub notifier_failures: u64,
    pub starts_total: u64,
    pub stops_total: u64,
    pub restarts_total: u64,
    pub permission_denied_total: u64,
    pub last_distance_m: Option<f64>,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            samples_evaluated = %self.samples_evaluated,
            samples_per_min = format!("{:.1}", self.samples_per_min),
            samples_dropped = %self.samples_dropped,
            entered = %self.entered_total,
            exited = %self.exited_total,
            alerts = %self.alerts_sent,
            notifier_failures = %self.notifier_failures,
            restarts = %self.restarts_total,
            last_distance_m = ?self.last_distance_m.map(|d| d.round()),
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.samples_evaluated(), 0);
        assert_eq!(metrics.last_distance_m(), None);
    }

    #[test]
    fn test_last_distance_roundtrip() {
        let metrics = Metrics::new();
        metrics.record_sample_evaluated(Some(187.25));
        assert_eq!(metrics.last_distance_m(), Some(187.25));

        // A sample without distance keeps the previous value
        metrics.record_sample_evaluated(None);
        assert_eq!(metrics.last_distance_m(), Some(187.25));
        assert_eq!(metrics.samples_evaluated(), 2);
    }

    #[test]
    fn test_report_counts() {
        let metrics = Metrics::new();
        metrics.record_entered();
        metrics.record_exited();
        metrics.record_entered();
        metrics.record_alert_sent();
        metrics.record_notifier_failure();

        let summary = metrics.report();
        assert_eq!(summary.entered_total, 2);
        assert_eq!(summary.exited_total, 1);
        assert_eq!(summary.alerts_sent, 1);
        assert_eq!(summary.notifier_failures, 1);
    }

    #[test]
    fn test_report_rate_resets_between_reports() {
        let metrics = Metrics::new();
        metrics.record_sample_evaluated(Some(1.0));
        let first = metrics.report();
        assert_eq!(first.samples_evaluated, 1);

        let second = metrics.report();
        assert_eq!(second.samples_evaluated, 1);
        assert_eq!(second.samples_per_min, 0.0);
    }
}
