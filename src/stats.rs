//! Run statistics shared between all worker threads.
//!
//! Every field is an independent cache-padded atomic updated with relaxed
//! `fetch_add`, so recording never blocks and workers do not contend on a
//! shared lock or cache line while being measured.

use crossbeam_utils::CachePadded;
use hdrhistogram::Histogram;
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// Produced/consumed counters and cumulative processing time for one run.
pub struct Statistics {
    produced: CachePadded<AtomicU64>,
    consumed: CachePadded<AtomicU64>,
    total_processing_nanos: CachePadded<AtomicU64>,
    started_at: Instant,
    /// Elapsed nanoseconds frozen by [`finish`](Self::finish); 0 while running.
    frozen_nanos: AtomicU64,
}

impl Statistics {
    /// Create zeroed statistics whose clock starts now.
    pub fn new() -> Self {
        Self {
            produced: CachePadded::new(AtomicU64::new(0)),
            consumed: CachePadded::new(AtomicU64::new(0)),
            total_processing_nanos: CachePadded::new(AtomicU64::new(0)),
            started_at: Instant::now(),
            frozen_nanos: AtomicU64::new(0),
        }
    }

    /// Record one item handed to the shared primitive.
    #[inline]
    pub fn record_produced(&self) {
        self.produced.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one consumed item and its processing time.
    ///
    /// A negative `processing_time_nanos` means "unknown": the item is counted
    /// but the running total is left alone.
    #[inline]
    pub fn record_consumed(&self, processing_time_nanos: i64) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
        if let Ok(nanos) = u64::try_from(processing_time_nanos) {
            self.total_processing_nanos.fetch_add(nanos, Ordering::Relaxed);
        }
    }

    /// Items produced so far.
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }

    /// Items consumed so far.
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    /// Time since creation, or the frozen run length after [`finish`](Self::finish).
    pub fn elapsed(&self) -> Duration {
        match self.frozen_nanos.load(Ordering::Acquire) {
            0 => self.started_at.elapsed(),
            nanos => Duration::from_nanos(nanos),
        }
    }

    /// Freeze the elapsed time. Only the first call has an effect.
    pub fn finish(&self) {
        let nanos = u64::try_from(self.started_at.elapsed().as_nanos())
            .unwrap_or(u64::MAX)
            .max(1);
        let _ = self
            .frozen_nanos
            .compare_exchange(0, nanos, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Whether [`finish`](Self::finish) has been called.
    pub fn is_finished(&self) -> bool {
        self.frozen_nanos.load(Ordering::Acquire) != 0
    }

    /// Consistent-enough view of the counters.
    ///
    /// The queue depth is estimated as `produced - consumed`; callers that can
    /// probe the queue directly should use [`StatsView::with_queue_depth`].
    pub fn snapshot(&self) -> StatsView {
        // consumed first: an item is counted as produced before its consumer
        // can finish it, so reading in this order keeps the estimate >= 0.
        let consumed = self.consumed();
        let total_nanos = self.total_processing_nanos.load(Ordering::Relaxed);
        let produced = self.produced();
        let elapsed = self.elapsed();

        let avg_processing_time_nanos = if consumed == 0 {
            0.0
        } else {
            total_nanos as f64 / consumed as f64
        };
        let secs = elapsed.as_secs_f64();
        let throughput_per_second = if secs > 0.0 {
            consumed as f64 / secs
        } else {
            0.0
        };

        StatsView {
            produced,
            consumed,
            queue_depth_estimate: produced.saturating_sub(consumed),
            avg_processing_time_nanos,
            throughput_per_second,
            elapsed,
        }
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.snapshot(), f)
    }
}

/// Point-in-time copy of [`Statistics`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsView {
    /// Items handed to the shared primitive.
    pub produced: u64,
    /// Items taken and processed by consumers.
    pub consumed: u64,
    /// Items believed to be in flight.
    pub queue_depth_estimate: u64,
    /// Mean processing time of consumed items, in nanoseconds.
    pub avg_processing_time_nanos: f64,
    /// Consumed items per second of elapsed time.
    pub throughput_per_second: f64,
    /// Run length at the time of the snapshot.
    pub elapsed: Duration,
}

impl StatsView {
    /// Replace the depth estimate with a direct measurement.
    #[must_use]
    pub const fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth_estimate = depth as u64;
        self
    }
}

impl fmt::Display for StatsView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "produced={} consumed={} queue={} avg_processing={:.2}ms throughput={:.2}/sec elapsed={:?}",
            self.produced,
            self.consumed,
            self.queue_depth_estimate,
            self.avg_processing_time_nanos / 1_000_000.0,
            self.throughput_per_second,
            self.elapsed,
        )
    }
}

/// Latency percentiles extracted from a merged histogram, in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencySummary {
    /// Number of recorded samples.
    pub samples: u64,
    /// Median.
    pub p50: u64,
    /// 99th percentile.
    pub p99: u64,
    /// Largest sample.
    pub max: u64,
}

impl LatencySummary {
    /// Summarize `histogram`; an empty histogram yields all zeros.
    pub fn from_histogram(histogram: &Histogram<u64>) -> Self {
        if histogram.is_empty() {
            return Self::default();
        }
        Self {
            samples: histogram.len(),
            p50: histogram.value_at_quantile(0.50),
            p99: histogram.value_at_quantile(0.99),
            max: histogram.max(),
        }
    }
}

impl fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "samples={} p50={}ns p99={}ns max={}ns",
            self.samples, self.p50, self.p99, self.max
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn empty_snapshot() {
        let stats = Statistics::new();
        let view = stats.snapshot();
        assert_eq!(view.produced, 0);
        assert_eq!(view.consumed, 0);
        assert_eq!(view.queue_depth_estimate, 0);
        assert!(view.avg_processing_time_nanos.abs() < f64::EPSILON);
    }

    #[test]
    fn average_and_depth() {
        let stats = Statistics::new();
        for _ in 0..5 {
            stats.record_produced();
        }
        stats.record_consumed(100);
        stats.record_consumed(300);
        // unknown processing time is counted but not averaged in
        stats.record_consumed(-1);

        let view = stats.snapshot();
        assert_eq!(view.produced, 5);
        assert_eq!(view.consumed, 3);
        assert_eq!(view.queue_depth_estimate, 2);
        assert!((view.avg_processing_time_nanos - 400.0 / 3.0).abs() < 1e-9);
        assert_eq!(view.with_queue_depth(9).queue_depth_estimate, 9);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let stats = Arc::new(Statistics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        stats.record_produced();
                        stats.record_consumed(2);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let view = stats.snapshot();
        assert_eq!(view.produced, 80_000);
        assert_eq!(view.consumed, 80_000);
        assert!((view.avg_processing_time_nanos - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn finish_freezes_elapsed() {
        let stats = Statistics::new();
        thread::sleep(Duration::from_millis(5));
        stats.finish();
        assert!(stats.is_finished());

        let frozen = stats.elapsed();
        thread::sleep(Duration::from_millis(5));
        stats.finish();
        assert_eq!(stats.elapsed(), frozen);
        assert!(frozen >= Duration::from_millis(5));
    }

    #[test]
    fn throughput_uses_elapsed() {
        let stats = Statistics::new();
        for _ in 0..100 {
            stats.record_consumed(0);
        }
        thread::sleep(Duration::from_millis(10));
        stats.finish();

        let view = stats.snapshot();
        let expected = 100.0 / view.elapsed.as_secs_f64();
        assert!((view.throughput_per_second - expected).abs() < 1e-6);
    }

    #[test]
    fn latency_summary() {
        let mut histogram = Histogram::<u64>::new(3).unwrap();
        assert_eq!(LatencySummary::from_histogram(&histogram), LatencySummary::default());

        for value in 1..=100u64 {
            histogram.record(value * 1_000).unwrap();
        }
        let summary = LatencySummary::from_histogram(&histogram);
        assert_eq!(summary.samples, 100);
        assert!(summary.p50 >= 49_000 && summary.p50 <= 51_000);
        assert!(summary.max >= 100_000);
        assert!(summary.p99 <= summary.max);
    }
}
