use crate::{
    counter::CounterStrategy,
    harness::{
        Budget, CounterWorkload, HarnessError, QueueWorkload, StopReport, WorkerHarness, Workload,
    },
    item::WorkItem,
    queue::{QueueStrategy, bounded},
    stats::{LatencySummary, StatsView},
};
use std::{
    fmt,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use tracing::info;

/// Workload shape shared by every strategy in a comparison.
///
/// # Examples
///
/// ```
/// use contention::{Budget, BenchmarkConfig};
/// use std::time::Duration;
///
/// let config = BenchmarkConfig::default()
///     .producers(4)
///     .consumers(4)
///     .capacity(32)
///     .budget(Budget::Duration(Duration::from_millis(250)));
/// assert_eq!(config.capacity, 32);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchmarkConfig {
    /// Producer threads per run.
    pub producers: usize,
    /// Consumer threads per run.
    pub consumers: usize,
    /// When each run winds down.
    pub budget: Budget,
    /// Capacity of every queue under test.
    pub capacity: usize,
    /// Grace period handed to the harness.
    pub grace_period: Duration,
    /// Items per second per producer; 0 means unpaced.
    pub production_rate: u32,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            producers: 2,
            consumers: 3,
            budget: Budget::Operations(100_000),
            capacity: 100,
            grace_period: crate::harness::DEFAULT_GRACE_PERIOD,
            production_rate: 0,
        }
    }
}

impl BenchmarkConfig {
    /// Set the number of producer threads.
    #[must_use]
    pub const fn producers(mut self, producers: usize) -> Self {
        self.producers = producers;
        self
    }

    /// Set the number of consumer threads.
    #[must_use]
    pub const fn consumers(mut self, consumers: usize) -> Self {
        self.consumers = consumers;
        self
    }

    /// Set the run budget.
    #[must_use]
    pub const fn budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    /// Set the queue capacity.
    #[must_use]
    pub const fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the harness grace period.
    #[must_use]
    pub const fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Pace each producer to `per_second` items per second.
    #[must_use]
    pub const fn production_rate(mut self, per_second: u32) -> Self {
        self.production_rate = per_second;
        self
    }
}

/// Result of running one strategy through the harness.
#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    /// Workload label, e.g. `queue/monitor`.
    pub strategy: String,
    /// Final statistics of the run.
    pub stats: StatsView,
    /// Consumer-side latency percentiles.
    pub latency: LatencySummary,
    /// Workers detached at shutdown.
    pub detached: usize,
    /// Counter value after the run, for counter workloads.
    pub final_count: Option<i64>,
}

impl BenchmarkReport {
    fn from_stop(report: StopReport, final_count: Option<i64>) -> Self {
        Self {
            strategy: report.workload,
            stats: report.stats,
            latency: report.latency,
            detached: report.detached,
            final_count,
        }
    }
}

impl fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<20} {} {}", self.strategy, self.stats, self.latency)?;
        if let Some(count) = self.final_count {
            write!(f, " count={count}")?;
        }
        if self.detached > 0 {
            write!(f, " detached={}", self.detached)?;
        }
        Ok(())
    }
}

/// Result of [`Benchmark::run_counter_ops`] for one strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterOpsResult {
    /// Strategy measured.
    pub strategy: CounterStrategy,
    /// Threads hammering the counter.
    pub threads: usize,
    /// Operations performed by each thread.
    pub ops_per_thread: usize,
    /// Wall time from the first spawn to the last join.
    pub duration: Duration,
    /// Counter value once every thread joined.
    pub final_count: i64,
}

impl CounterOpsResult {
    /// Operations performed across all threads.
    pub const fn total_operations(&self) -> usize {
        self.threads * self.ops_per_thread
    }

    /// Operations per second of wall time.
    pub fn operations_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.total_operations() as f64 / secs
        } else {
            0.0
        }
    }

    /// Value the counter must hold if no update was lost.
    ///
    /// Each thread alternates increment and decrement starting with an
    /// increment, so only an odd `ops_per_thread` leaves a residue.
    pub const fn expected_count(&self) -> i64 {
        (self.threads * (self.ops_per_thread % 2)) as i64
    }

    /// Whether no update was lost.
    pub const fn is_consistent(&self) -> bool {
        self.final_count == self.expected_count()
    }
}

impl fmt::Display for CounterOpsResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<12} {:>8}ms {:>14.0} ops/sec final={} (expected {})",
            self.strategy.name(),
            self.duration.as_millis(),
            self.operations_per_second(),
            self.final_count,
            self.expected_count(),
        )
    }
}

/// Runs every strategy through the same workload, one after another.
///
/// The runner only orchestrates; all synchronization happens inside the
/// primitives and the harness.
///
/// # Examples
///
/// ```
/// use contention::{Benchmark, BenchmarkConfig, Budget};
///
/// # fn main() -> Result<(), contention::HarnessError> {
/// let benchmark = Benchmark::new(
///     BenchmarkConfig::default().budget(Budget::Operations(2_000)),
/// );
///
/// for report in benchmark.run_queues(|seq| seq, |_| {})? {
///     assert_eq!(report.stats.produced, report.stats.consumed);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Benchmark {
    config: BenchmarkConfig,
}

impl Benchmark {
    /// Create a runner for `config`.
    pub const fn new(config: BenchmarkConfig) -> Self {
        Self { config }
    }

    /// The workload shape used for every run.
    pub const fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Run every [`QueueStrategy`] with identical payloads and processing.
    pub fn run_queues<P, F, H>(
        &self,
        make_payload: F,
        process: H,
    ) -> Result<Vec<BenchmarkReport>, HarnessError>
    where
        P: Send + 'static,
        F: Fn(u64) -> P + Clone + Send + Sync + 'static,
        H: Fn(&WorkItem<P>) + Clone + Send + Sync + 'static,
    {
        QueueStrategy::ALL
            .into_iter()
            .map(|strategy| self.run_queue(strategy, make_payload.clone(), process.clone()))
            .collect()
    }

    /// Run a single queue strategy.
    pub fn run_queue<P, F, H>(
        &self,
        strategy: QueueStrategy,
        make_payload: F,
        process: H,
    ) -> Result<BenchmarkReport, HarnessError>
    where
        P: Send + 'static,
        F: Fn(u64) -> P + Send + Sync + 'static,
        H: Fn(&WorkItem<P>) + Send + Sync + 'static,
    {
        let queue = bounded::<WorkItem<P>>()
            .capacity(self.config.capacity)
            .strategy(strategy)
            .build()?;
        let workload = QueueWorkload::new(queue, make_payload).with_processor(process);
        let report = self.execute(workload)?;
        Ok(BenchmarkReport::from_stop(report, None))
    }

    /// Run every [`CounterStrategy`]: producers increment, consumers read.
    pub fn run_counters(&self) -> Result<Vec<BenchmarkReport>, HarnessError> {
        CounterStrategy::ALL
            .into_iter()
            .map(|strategy| self.run_counter(strategy))
            .collect()
    }

    /// Run a single counter strategy.
    pub fn run_counter(&self, strategy: CounterStrategy) -> Result<BenchmarkReport, HarnessError> {
        let counter = strategy.build();
        let report = self.execute(CounterWorkload::new(Arc::clone(&counter)))?;
        Ok(BenchmarkReport::from_stop(report, Some(counter.get())))
    }

    fn execute<W: Workload>(&self, workload: W) -> Result<StopReport, HarnessError> {
        let mut harness = WorkerHarness::new(workload)
            .with_grace_period(self.config.grace_period)
            .with_production_rate(self.config.production_rate);
        harness.start(self.config.producers, self.config.consumers, self.config.budget)?;
        let report = harness.wait().ok_or(HarnessError::NotRunning)?;
        info!(
            workload = %report.workload,
            produced = report.stats.produced,
            consumed = report.stats.consumed,
            throughput = report.stats.throughput_per_second,
            p99_ns = report.latency.p99,
            "benchmark run complete"
        );
        Ok(report)
    }

    /// Hammer a fresh counter of every strategy from `threads` threads, each
    /// alternating increment and decrement `ops_per_thread` times.
    ///
    /// # Examples
    ///
    /// ```
    /// use contention::Benchmark;
    ///
    /// for result in Benchmark::run_counter_ops(4, 1_000) {
    ///     assert_eq!(result.final_count, 0);
    ///     assert_eq!(result.total_operations(), 4_000);
    /// }
    /// ```
    pub fn run_counter_ops(threads: usize, ops_per_thread: usize) -> Vec<CounterOpsResult> {
        CounterStrategy::ALL
            .into_iter()
            .map(|strategy| {
                let counter = strategy.build();
                let started = Instant::now();
                thread::scope(|scope| {
                    for _ in 0..threads {
                        scope.spawn(|| {
                            for op in 0..ops_per_thread {
                                if op % 2 == 0 {
                                    counter.increment();
                                } else {
                                    counter.decrement();
                                }
                            }
                        });
                    }
                });
                let result = CounterOpsResult {
                    strategy,
                    threads,
                    ops_per_thread,
                    duration: started.elapsed(),
                    final_count: counter.get(),
                };
                info!(%result, "counter ops complete");
                result
            })
            .collect()
    }
}
