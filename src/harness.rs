//! Producer/consumer worker harness.
//!
//! A [`WorkerHarness`] drives one shared primitive, wrapped in a [`Workload`],
//! with a configurable number of producer and consumer threads:
//!
//! ```text
//! CREATED --start--> RUNNING --stop--> STOPPING --> STOPPED --start--> RUNNING ...
//! ```
//!
//! Producers claim operation slots from the run's [`Budget`] and stop when it
//! is exhausted or `stop` is requested. The last producer to exit tells the
//! consumers to drain: they keep consuming until the primitive has nothing
//! left, then exit. Blocked operations are cancelled only if the workers have
//! not finished within the grace period.

use crate::{
    QueueError,
    cancel::CancellationToken,
    item::WorkItem,
    stats::{LatencySummary, Statistics, StatsView},
    traits::{BoundedQueue, Counter},
};
use hdrhistogram::Histogram;
use parking_lot::{Condvar, Mutex};
use std::{
    fmt, io,
    num::NonZeroU32,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// How long `stop` waits for workers before cancelling, and again before
/// detaching.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Significant figures kept by the per-worker latency histograms.
const HISTOGRAM_SIGFIG: u8 = 3;

/// Errors raised by [`WorkerHarness`] and the benchmark runner.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// `start` was called while a run was in progress.
    #[error("harness is already running")]
    AlreadyRunning,

    /// A run was expected but none is in progress.
    #[error("harness is not running")]
    NotRunning,

    /// `start` was called with zero producers.
    #[error("at least one producer is required")]
    NoProducers,

    /// The latency histogram could not be created.
    #[error("failed to create latency histogram: {0}")]
    Histogram(String),

    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),

    /// The queue under test could not be built.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// How much work producers perform before a run winds down on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// Produce until this much time has passed since `start`.
    Duration(Duration),
    /// Produce exactly this many items in total across all producers.
    Operations(u64),
}

/// Lifecycle of a harness run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No run has been started yet.
    Created,
    /// Workers are active.
    Running,
    /// `stop` is waiting for workers to finish.
    Stopping,
    /// The last run has finished; `start` may be called again.
    Stopped,
}

/// The operations a harness performs against one shared primitive.
///
/// Implemented by [`QueueWorkload`] and [`CounterWorkload`].
pub trait Workload: Send + Sync + 'static {
    /// Label used in logs and reports.
    fn name(&self) -> String;

    /// Perform one producer operation.
    ///
    /// # Arguments
    /// * `seq` - Run-wide unique sequence number of this operation
    /// * `cancel` - Fired when the harness gives up on blocked workers
    fn produce(&self, seq: u64, cancel: &CancellationToken) -> Result<(), QueueError>;

    /// Perform one consumer operation.
    ///
    /// # Returns
    /// The processing time in nanoseconds (negative if unknown), or
    /// [`QueueError::Cancelled`] once `drain` has fired and there is nothing
    /// left to consume.
    fn consume(&self, drain: &CancellationToken) -> Result<i64, QueueError>;

    /// Current number of buffered items, if the primitive buffers any.
    fn depth(&self) -> Option<usize> {
        None
    }
}

/// Workload moving [`WorkItem`]s through a [`BoundedQueue`].
///
/// Producers create items with the payload generator and `put` them;
/// consumers `take` items, run the processor on them and record the time from
/// creation to completion.
pub struct QueueWorkload<P> {
    queue: Arc<dyn BoundedQueue<WorkItem<P>>>,
    make_payload: Box<dyn Fn(u64) -> P + Send + Sync>,
    process: Box<dyn Fn(&WorkItem<P>) + Send + Sync>,
}

impl<P: Send + 'static> QueueWorkload<P> {
    /// Wrap `queue`, generating each payload from its sequence number.
    pub fn new<F>(queue: Arc<dyn BoundedQueue<WorkItem<P>>>, make_payload: F) -> Self
    where
        F: Fn(u64) -> P + Send + Sync + 'static,
    {
        Self {
            queue,
            make_payload: Box::new(make_payload),
            process: Box::new(|_| {}),
        }
    }

    /// Run `process` on every item before it is marked complete.
    #[must_use]
    pub fn with_processor<H>(mut self, process: H) -> Self
    where
        H: Fn(&WorkItem<P>) + Send + Sync + 'static,
    {
        self.process = Box::new(process);
        self
    }

    /// The queue under test.
    pub const fn queue(&self) -> &Arc<dyn BoundedQueue<WorkItem<P>>> {
        &self.queue
    }
}

impl<P: Send + 'static> Workload for QueueWorkload<P> {
    fn name(&self) -> String {
        format!("queue/{}", self.queue.strategy())
    }

    fn produce(&self, seq: u64, cancel: &CancellationToken) -> Result<(), QueueError> {
        let item = WorkItem::new(seq, (self.make_payload)(seq));
        self.queue.put_with(item, cancel).map_err(|(_, err)| err)
    }

    fn consume(&self, drain: &CancellationToken) -> Result<i64, QueueError> {
        let mut item = self.queue.take_with(drain)?;
        (self.process)(&item);
        item.mark_processed();
        Ok(item.processing_nanos())
    }

    fn depth(&self) -> Option<usize> {
        Some(self.queue.try_size())
    }
}

impl<P> fmt::Debug for QueueWorkload<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueWorkload")
            .field("strategy", &self.queue.strategy())
            .field("capacity", &self.queue.capacity())
            .finish_non_exhaustive()
    }
}

/// Workload hammering a [`Counter`].
///
/// Producers `increment`; consumers `get` and record how long the read took.
/// Consumers stop as soon as the producers are done.
#[derive(Clone)]
pub struct CounterWorkload {
    counter: Arc<dyn Counter>,
}

impl CounterWorkload {
    /// Wrap `counter`.
    pub fn new(counter: Arc<dyn Counter>) -> Self {
        Self { counter }
    }

    /// The counter under test.
    pub const fn counter(&self) -> &Arc<dyn Counter> {
        &self.counter
    }
}

impl Workload for CounterWorkload {
    fn name(&self) -> String {
        format!("counter/{}", self.counter.strategy())
    }

    fn produce(&self, _seq: u64, _cancel: &CancellationToken) -> Result<(), QueueError> {
        self.counter.increment();
        Ok(())
    }

    fn consume(&self, drain: &CancellationToken) -> Result<i64, QueueError> {
        if drain.is_cancelled() {
            return Err(QueueError::Cancelled);
        }
        let started = Instant::now();
        let _ = std::hint::black_box(self.counter.get());
        Ok(i64::try_from(started.elapsed().as_nanos()).unwrap_or(i64::MAX))
    }

    // a counter buffers nothing
    fn depth(&self) -> Option<usize> {
        Some(0)
    }
}

impl fmt::Debug for CounterWorkload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterWorkload")
            .field("counter", &self.counter.to_string())
            .finish()
    }
}

/// Outcome of [`WorkerHarness::stop`].
#[derive(Debug, Clone)]
pub struct StopReport {
    /// [`Workload::name`] of the run.
    pub workload: String,
    /// Final, frozen statistics.
    pub stats: StatsView,
    /// Consumer-side latency percentiles.
    pub latency: LatencySummary,
    /// Workers still running after cancellation and left detached.
    pub detached: usize,
    /// Workers that panicked.
    pub panicked: usize,
}

impl StopReport {
    /// Whether every worker exited on its own.
    pub const fn is_clean(&self) -> bool {
        self.detached == 0 && self.panicked == 0
    }
}

impl fmt::Display for StopReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {}", self.workload, self.stats, self.latency)?;
        if !self.is_clean() {
            write!(f, " detached={} panicked={}", self.detached, self.panicked)?;
        }
        Ok(())
    }
}

/// Counts workers down to zero and lets `stop` wait for that.
struct ExitLatch {
    remaining: Mutex<usize>,
    all_exited: Condvar,
}

impl ExitLatch {
    fn new(workers: usize) -> Self {
        Self {
            remaining: Mutex::new(workers),
            all_exited: Condvar::new(),
        }
    }

    fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.all_exited.notify_all();
        }
    }

    /// Returns whether every worker exited before `deadline`.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            if self
                .all_exited
                .wait_until(&mut remaining, deadline)
                .timed_out()
            {
                return *remaining == 0;
            }
        }
        true
    }
}

/// State shared by every worker of one run.
struct RunControl {
    budget: Budget,
    started_at: Instant,
    stop: AtomicBool,
    issued: AtomicU64,
    live_producers: AtomicUsize,
    live_consumers: AtomicUsize,
    /// Fired when no producer is left; consumers drain and exit.
    drain: CancellationToken,
    /// Fired when the grace period runs out; unblocks producers.
    abort: CancellationToken,
    exits: ExitLatch,
}

impl RunControl {
    fn new(budget: Budget, producers: usize, consumers: usize) -> Self {
        Self {
            budget,
            started_at: Instant::now(),
            stop: AtomicBool::new(false),
            issued: AtomicU64::new(0),
            live_producers: AtomicUsize::new(producers),
            live_consumers: AtomicUsize::new(consumers),
            drain: CancellationToken::new(),
            abort: CancellationToken::new(),
            exits: ExitLatch::new(producers + consumers),
        }
    }

    /// Claim the next operation slot, or `None` once the run should wind down.
    #[inline]
    fn claim(&self) -> Option<u64> {
        if self.stop.load(Ordering::Acquire) {
            return None;
        }
        match self.budget {
            Budget::Duration(limit) => (self.started_at.elapsed() < limit)
                .then(|| self.issued.fetch_add(1, Ordering::Relaxed)),
            Budget::Operations(limit) => {
                let seq = self.issued.fetch_add(1, Ordering::Relaxed);
                (seq < limit).then_some(seq)
            },
        }
    }

    fn cancel_everything(&self) {
        self.stop.store(true, Ordering::Release);
        self.abort.cancel();
        self.drain.cancel();
    }
}

/// Signals a worker's exit, including when it unwinds from a panic.
struct ExitGuard<'a> {
    control: &'a RunControl,
    producer: bool,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        if self.producer {
            if self.control.live_producers.fetch_sub(1, Ordering::AcqRel) == 1 {
                debug!("last producer exited, draining consumers");
                self.control.drain.cancel();
            }
        } else {
            self.control.live_consumers.fetch_sub(1, Ordering::AcqRel);
        }
        self.control.exits.count_down();
    }
}

fn run_producer<W: Workload>(
    workload: &W,
    control: &RunControl,
    stats: &Statistics,
    pause: Option<Duration>,
) {
    let _exit = ExitGuard {
        control,
        producer: true,
    };

    while let Some(seq) = control.claim() {
        match workload.produce(seq, &control.abort) {
            Ok(()) => stats.record_produced(),
            Err(QueueError::Cancelled) => break,
            Err(err) => {
                warn!(%err, "producer stopped on queue error");
                break;
            },
        }
        if let Some(pause) = pause {
            thread::sleep(pause);
        }
    }
}

fn run_consumer<W: Workload>(
    workload: &W,
    control: &RunControl,
    stats: &Statistics,
    mut histogram: Histogram<u64>,
) -> Histogram<u64> {
    let _exit = ExitGuard {
        control,
        producer: false,
    };

    loop {
        match workload.consume(&control.drain) {
            Ok(nanos) => {
                stats.record_consumed(nanos);
                if let Ok(nanos) = u64::try_from(nanos) {
                    histogram.saturating_record(nanos);
                }
            },
            Err(QueueError::Cancelled) => break,
            Err(err) => {
                warn!(%err, "consumer stopped on queue error");
                break;
            },
        }
    }
    histogram
}

struct ActiveRun {
    control: Arc<RunControl>,
    workers: Vec<JoinHandle<Option<Histogram<u64>>>>,
    latency: Histogram<u64>,
}

/// Runs producer and consumer threads against a [`Workload`].
///
/// # Examples
///
/// ```
/// use contention::{
///     Budget, QueueStrategy, QueueWorkload, RunState, WorkItem, WorkerHarness, bounded,
/// };
///
/// # fn main() -> Result<(), contention::HarnessError> {
/// let queue = bounded::<WorkItem<u64>>()
///     .capacity(8)
///     .strategy(QueueStrategy::Semaphore)
///     .build()?;
/// let mut harness = WorkerHarness::new(QueueWorkload::new(queue, |seq| seq * 2));
///
/// harness.start(2, 2, Budget::Operations(1_000))?;
/// assert!(harness.is_running());
///
/// let report = harness.wait().expect("run was started");
/// assert_eq!(harness.state(), RunState::Stopped);
/// assert_eq!(report.stats.produced, 1_000);
/// assert_eq!(report.stats.consumed, 1_000);
/// # Ok(())
/// # }
/// ```
pub struct WorkerHarness<W: Workload> {
    workload: Arc<W>,
    grace_period: Duration,
    production_rate: Option<NonZeroU32>,
    state: RunState,
    stats: Arc<Statistics>,
    active: Option<ActiveRun>,
}

impl<W: Workload> WorkerHarness<W> {
    /// Create an idle harness around `workload`.
    pub fn new(workload: W) -> Self {
        Self {
            workload: Arc::new(workload),
            grace_period: DEFAULT_GRACE_PERIOD,
            production_rate: None,
            state: RunState::Created,
            stats: Arc::new(Statistics::new()),
            active: None,
        }
    }

    /// Set how long `stop` waits before cancelling blocked workers.
    #[must_use]
    pub const fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Limit each producer to `per_second` items per second; 0 means unpaced.
    #[must_use]
    pub const fn with_production_rate(mut self, per_second: u32) -> Self {
        self.production_rate = NonZeroU32::new(per_second);
        self
    }

    /// The workload under test.
    pub fn workload(&self) -> &W {
        &self.workload
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Whether workers are active.
    pub const fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running)
    }

    /// Snapshot of the current (or last) run's statistics.
    pub fn statistics(&self) -> StatsView {
        let view = self.stats.snapshot();
        match self.workload.depth() {
            Some(depth) => view.with_queue_depth(depth),
            None => view,
        }
    }

    /// Spawn `producers` producer and `consumers` consumer threads.
    ///
    /// Each run gets fresh [`Statistics`].
    ///
    /// # Errors
    /// [`HarnessError::AlreadyRunning`] if a run is in progress,
    /// [`HarnessError::NoProducers`] if `producers` is 0, and
    /// [`HarnessError::Spawn`] if a thread could not be created (the workers
    /// already spawned are shut down first).
    pub fn start(
        &mut self,
        producers: usize,
        consumers: usize,
        budget: Budget,
    ) -> Result<(), HarnessError> {
        if matches!(self.state, RunState::Running | RunState::Stopping) {
            return Err(HarnessError::AlreadyRunning);
        }
        if producers == 0 {
            return Err(HarnessError::NoProducers);
        }

        let latency = Histogram::<u64>::new(HISTOGRAM_SIGFIG)
            .map_err(|err| HarnessError::Histogram(err.to_string()))?;
        let stats = Arc::new(Statistics::new());
        let control = Arc::new(RunControl::new(budget, producers, consumers));
        let pause = self
            .production_rate
            .map(|rate| Duration::from_secs(1) / rate.get());

        info!(
            workload = %self.workload.name(),
            producers,
            consumers,
            ?budget,
            "starting run"
        );

        let mut workers = Vec::with_capacity(producers + consumers);
        let spawned = self.spawn_workers(
            &mut workers,
            producers,
            consumers,
            &control,
            &stats,
            &latency,
            pause,
        );
        if let Err(err) = spawned {
            warn!(%err, spawned = workers.len(), "failed to spawn worker, shutting down run");
            control.cancel_everything();
            for handle in workers {
                let _ = handle.join();
            }
            return Err(err.into());
        }

        self.stats = stats;
        self.active = Some(ActiveRun {
            control,
            workers,
            latency,
        });
        self.state = RunState::Running;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_workers(
        &self,
        workers: &mut Vec<JoinHandle<Option<Histogram<u64>>>>,
        producers: usize,
        consumers: usize,
        control: &Arc<RunControl>,
        stats: &Arc<Statistics>,
        latency: &Histogram<u64>,
        pause: Option<Duration>,
    ) -> io::Result<()> {
        // consumers first, so early items do not wait for a consumer thread
        for id in 0..consumers {
            let workload = Arc::clone(&self.workload);
            let control = Arc::clone(control);
            let stats = Arc::clone(stats);
            let histogram = latency.clone();
            let handle = thread::Builder::new()
                .name(format!("consumer-{id}"))
                .spawn(move || Some(run_consumer(&*workload, &control, &stats, histogram)))?;
            workers.push(handle);
        }

        for id in 0..producers {
            let workload = Arc::clone(&self.workload);
            let control = Arc::clone(control);
            let stats = Arc::clone(stats);
            let handle = thread::Builder::new()
                .name(format!("producer-{id}"))
                .spawn(move || {
                    run_producer(&*workload, &control, &stats, pause);
                    None
                })?;
            workers.push(handle);
        }

        Ok(())
    }

    /// Stop the current run.
    ///
    /// Producers stop claiming work, consumers drain what is left, and the
    /// call blocks until every worker has exited. Workers still busy after the
    /// grace period have their blocked operations cancelled; any still running
    /// after a second grace period are detached.
    ///
    /// # Returns
    /// The run's final report, or `None` if no run was in progress.
    pub fn stop(&mut self) -> Option<StopReport> {
        let run = self.active.take()?;
        self.state = RunState::Stopping;
        run.control.stop.store(true, Ordering::Release);
        debug!(workload = %self.workload.name(), "stop requested");

        let mut orderly = run
            .control
            .exits
            .wait_until(Instant::now() + self.grace_period);
        if !orderly {
            warn!(
                grace_period = ?self.grace_period,
                "workers still busy after grace period, cancelling blocked operations"
            );
            run.control.cancel_everything();
            orderly = run
                .control
                .exits
                .wait_until(Instant::now() + self.grace_period);
        }

        let mut latency = run.latency;
        let mut detached = 0;
        let mut panicked = 0;
        for handle in run.workers {
            if !orderly && !handle.is_finished() {
                // dropping the handle detaches the thread
                detached += 1;
                continue;
            }
            match handle.join() {
                Ok(Some(histogram)) => {
                    if let Err(err) = latency.add(&histogram) {
                        warn!(%err, "dropping latency samples that could not be merged");
                    }
                },
                Ok(None) => {},
                Err(_) => panicked += 1,
            }
        }
        if detached > 0 {
            warn!(detached, "detached workers that ignored cancellation");
        }
        if panicked > 0 {
            warn!(panicked, "worker threads panicked");
        }

        self.stats.finish();
        self.state = RunState::Stopped;

        let report = StopReport {
            workload: self.workload.name(),
            stats: self.statistics(),
            latency: LatencySummary::from_histogram(&latency),
            detached,
            panicked,
        };
        info!(%report, "run stopped");
        Some(report)
    }

    /// Block until the budget is exhausted and every worker has exited, then
    /// stop the run.
    ///
    /// If no consumer is left (none were started, or all of them panicked)
    /// and producers made no progress for a whole grace period, the run is
    /// handed to [`stop`](Self::stop), which cancels the blocked producers.
    /// A live consumer stuck in its processor still blocks this call.
    ///
    /// # Returns
    /// The run's final report, or `None` if no run was in progress.
    pub fn wait(&mut self) -> Option<StopReport> {
        let control = Arc::clone(&self.active.as_ref()?.control);
        let mut produced = self.stats.produced();

        while !control
            .exits
            .wait_until(Instant::now() + self.grace_period)
        {
            if control.live_consumers.load(Ordering::Acquire) > 0 {
                continue;
            }
            let now = self.stats.produced();
            if now == produced {
                warn!(produced, "no consumer left and producers stalled, stopping run");
                break;
            }
            produced = now;
        }
        self.stop()
    }
}

impl<W: Workload> Drop for WorkerHarness<W> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl<W: Workload> fmt::Debug for WorkerHarness<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHarness")
            .field("workload", &self.workload.name())
            .field("state", &self.state)
            .field("grace_period", &self.grace_period)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
