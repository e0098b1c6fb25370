//! # Contention: Interchangeable Synchronization Strategies
//!
//! Contention is a small library of thread-safe mutable-state primitives and
//! bounded blocking queues, each implemented against several synchronization
//! strategies behind one contract, plus a worker harness and benchmark runner
//! that measure correctness and throughput under contention.
//!
//! ## Features
//!
//! - **One contract, many strategies**: every [`Counter`] and every
//!   [`BoundedQueue`] strategy is usable through the same trait object
//! - **Blocking with backpressure**: `put` blocks while a queue is full, `take`
//!   blocks while it is empty
//! - **Cooperative cancellation**: blocked calls return
//!   [`QueueError::Cancelled`] when their [`CancellationToken`] fires, leaving
//!   the queue untouched
//! - **Contention-free instrumentation**: [`Statistics`] keeps one cache-padded
//!   atomic per field
//! - **Ordered shutdown**: [`WorkerHarness`] drains consumers before stopping
//!   and cancels stragglers after a grace period
//!
//! ## Counters
//!
//! Four strategies share the [`Counter`] contract:
//!
//! ```rust
//! use contention::{Counter, CounterStrategy};
//!
//! for strategy in CounterStrategy::ALL {
//!     let counter = strategy.build();
//!     counter.increment();
//!     counter.add(41);
//!     assert!(counter.compare_and_set(42, 7));
//!     assert_eq!(counter.get(), 7);
//! }
//! ```
//!
//! ## Bounded Queues
//!
//! Three strategies share the [`BoundedQueue`] contract:
//!
//! ```rust
//! use contention::{BoundedQueue, QueueStrategy, bounded};
//!
//! # fn main() -> Result<(), contention::QueueError> {
//! let queue = bounded::<u64>()
//!     .capacity(16)
//!     .strategy(QueueStrategy::Monitor)
//!     .build()?;
//!
//! queue.put(42)?;
//! assert_eq!(queue.try_size(), 1);
//! assert_eq!(queue.take()?, 42);
//! # Ok(())
//! # }
//! ```
//!
//! ### Cancellation
//!
//! ```rust
//! use contention::{BoundedQueue, CancellationToken, QueueError, QueueStrategy, bounded};
//! use std::thread;
//!
//! # fn main() -> Result<(), QueueError> {
//! let queue = bounded::<u32>().capacity(1).strategy(QueueStrategy::Semaphore).build()?;
//! let token = CancellationToken::new();
//!
//! let waiter = {
//!     let queue = queue.clone();
//!     let token = token.clone();
//!     thread::spawn(move || queue.take_with(&token))
//! };
//!
//! token.cancel();
//! assert_eq!(waiter.join().unwrap(), Err(QueueError::Cancelled));
//! assert_eq!(queue.try_size(), 0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Harness
//!
//! ```rust
//! use contention::{Budget, Counter, CounterStrategy, CounterWorkload, WorkerHarness};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), contention::HarnessError> {
//! let counter = CounterStrategy::Atomic.build();
//! let mut harness = WorkerHarness::new(CounterWorkload::new(Arc::clone(&counter)));
//!
//! harness.start(4, 1, Budget::Operations(10_000))?;
//! let report = harness.wait().expect("run was started");
//!
//! assert_eq!(report.stats.produced, 10_000);
//! assert_eq!(counter.get(), 10_000);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Queue operations return `Result` types with descriptive errors:
//! - `QueueError::Cancelled` - A blocked call was cancelled; nothing changed
//! - `QueueError::Full` - Non-blocking put on a full queue
//! - `QueueError::Empty` - Non-blocking take on an empty queue
//! - `QueueError::InvalidCapacity` - Capacity must be at least 1
//!
//! Harness misuse (starting twice) surfaces as [`HarnessError`].
#![deny(missing_docs, unreachable_code, unused_must_use)]
#![warn(
    unused_imports,
    unused_variables,
    dead_code,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::type_complexity
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Benchmark runner comparing strategies under identical workloads.
///
/// See [`Benchmark`] and [`BenchmarkConfig`].
pub mod bench;

/// Cooperative cancellation for blocked queue operations.
pub mod cancel;

/// Shared 64-bit counters in four synchronization strategies.
///
/// This module provides [`MutexCounter`], [`AtomicCounter`],
/// [`RwLockCounter`] and [`OptimisticCounter`], plus [`CounterStrategy`] for
/// selecting one at runtime.
///
/// [`MutexCounter`]: counter::MutexCounter
/// [`AtomicCounter`]: counter::AtomicCounter
/// [`RwLockCounter`]: counter::RwLockCounter
/// [`OptimisticCounter`]: counter::OptimisticCounter
pub mod counter;

/// Producer/consumer worker harness with ordered shutdown.
pub mod harness;

/// Work items passed through the queues by the harness.
pub mod item;

/// Bounded blocking queues in three synchronization strategies.
///
/// This module provides [`ChannelQueue`], [`MonitorQueue`] and
/// [`SemaphoreQueue`], and the [`QueueBuilder`] used to construct any of them
/// behind the [`BoundedQueue`] contract.
///
/// [`ChannelQueue`]: queue::ChannelQueue
/// [`MonitorQueue`]: queue::MonitorQueue
/// [`SemaphoreQueue`]: queue::SemaphoreQueue
/// [`QueueBuilder`]: queue::QueueBuilder
pub mod queue;

mod ring;

/// Counting semaphore with cancellable acquire.
pub mod semaphore;

/// Lock-free run statistics.
pub mod stats;

/// Common contracts for counters and bounded queues.
///
/// This module defines the abstractions every strategy implements:
/// [`Counter`] and [`BoundedQueue`].
pub mod traits;

pub use bench::{Benchmark, BenchmarkConfig, BenchmarkReport, CounterOpsResult};
pub use cancel::CancellationToken;
pub use counter::{
    AtomicCounter, CounterStrategy, MutexCounter, OptimisticCounter, RwLockCounter,
};
pub use harness::{
    Budget, CounterWorkload, HarnessError, QueueWorkload, RunState, StopReport, WorkerHarness,
    Workload,
};
pub use item::WorkItem;
pub use queue::{
    ChannelQueue, MonitorQueue, QueueBuilder, QueueStrategy, SemaphoreQueue, bounded,
};
pub use semaphore::Semaphore;
pub use stats::{LatencySummary, Statistics, StatsView};
pub use traits::{BoundedQueue, Counter};

use thiserror::Error;

/// Errors that can occur during queue operations.
///
/// Blocking operations only ever fail with [`QueueError::Cancelled`] (or
/// [`QueueError::Disconnected`] for the channel strategy); the remaining
/// variants come from non-blocking calls and construction.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue has reached its capacity.
    ///
    /// Returned by `try_put`. Blocking `put` waits for space instead.
    #[error("queue is full")]
    Full,

    /// The queue contains no elements.
    ///
    /// Returned by `try_take`. Blocking `take` waits for an element instead.
    #[error("queue is empty")]
    Empty,

    /// A blocked `put` or `take` observed its cancellation token.
    ///
    /// The queue is left exactly as it was: no element was inserted or
    /// removed by the cancelled call.
    #[error("operation cancelled")]
    Cancelled,

    /// The specified capacity is invalid.
    ///
    /// Queue capacities must be at least 1.
    #[error("invalid capacity: must be >= 1")]
    InvalidCapacity,

    /// The backing channel was closed.
    #[error("queue channel disconnected")]
    Disconnected,
}
