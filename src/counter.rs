use crate::traits::Counter;
use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering, fence},
    },
};

/// Number of optimistic read attempts before [`OptimisticCounter::get`] falls
/// back to the shared lock.
const OPTIMISTIC_ATTEMPTS: usize = 4;

/// The available counter strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterStrategy {
    /// Exclusive lock around every operation, reads included.
    Mutex,
    /// Hardware fetch-add and compare-and-swap.
    Atomic,
    /// Shared lock for reads, exclusive lock for writes.
    RwLock,
    /// Stamp-validated lock-free reads with a shared-lock fallback.
    Optimistic,
}

impl CounterStrategy {
    /// Every strategy, in benchmark order.
    pub const ALL: [Self; 4] = [Self::Mutex, Self::Atomic, Self::RwLock, Self::Optimistic];

    /// Short name used in reports.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mutex => "mutex",
            Self::Atomic => "atomic",
            Self::RwLock => "rwlock",
            Self::Optimistic => "optimistic",
        }
    }

    /// Create a zeroed counter of this strategy.
    pub fn build(self) -> Arc<dyn Counter> {
        match self {
            Self::Mutex => Arc::new(MutexCounter::new()),
            Self::Atomic => Arc::new(AtomicCounter::new()),
            Self::RwLock => Arc::new(RwLockCounter::new()),
            Self::Optimistic => Arc::new(OptimisticCounter::new()),
        }
    }
}

impl fmt::Display for CounterStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Counter guarded by a single exclusive lock.
///
/// Every operation, `get` included, acquires the lock, so each read
/// happens-after the last write regardless of the platform memory model.
/// `parking_lot::Mutex` is eventually fair: a waiter that has been passed over
/// for about 0.5ms is handed the lock directly.
#[derive(Debug, Default)]
pub struct MutexCounter {
    value: Mutex<i64>,
}

impl MutexCounter {
    /// Create a counter starting at 0.
    pub fn new() -> Self {
        Self {
            value: Mutex::new(0),
        }
    }
}

impl Counter for MutexCounter {
    fn add(&self, delta: i64) {
        let mut value = self.value.lock();
        *value = value.wrapping_add(delta);
    }

    fn get_and_add(&self, delta: i64) -> i64 {
        let mut value = self.value.lock();
        let previous = *value;
        *value = previous.wrapping_add(delta);
        previous
    }

    fn compare_and_set(&self, expected: i64, update: i64) -> bool {
        let mut value = self.value.lock();
        if *value == expected {
            *value = update;
            true
        } else {
            false
        }
    }

    fn get(&self) -> i64 {
        *self.value.lock()
    }

    fn reset(&self) {
        *self.value.lock() = 0;
    }

    fn strategy(&self) -> CounterStrategy {
        CounterStrategy::Mutex
    }
}

impl fmt::Display for MutexCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MutexCounter[count={}]", self.get())
    }
}

/// Lock-free counter on a single hardware atomic.
///
/// `add` is one `fetch_add`, never a load followed by a store: two separate
/// atomic operations do not compose into an atomic read-modify-write without a
/// compare-and-swap retry loop. All operations use `SeqCst` so that the single
/// location is linearizable.
#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: CachePadded<AtomicI64>,
}

impl AtomicCounter {
    /// Create a counter starting at 0.
    pub fn new() -> Self {
        Self {
            value: CachePadded::new(AtomicI64::new(0)),
        }
    }
}

impl Counter for AtomicCounter {
    #[inline]
    fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::SeqCst);
    }

    #[inline]
    fn get_and_add(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::SeqCst)
    }

    #[inline]
    fn compare_and_set(&self, expected: i64, update: i64) -> bool {
        self.value
            .compare_exchange(expected, update, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    #[inline]
    fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.value.store(0, Ordering::SeqCst);
    }

    fn strategy(&self) -> CounterStrategy {
        CounterStrategy::Atomic
    }
}

impl fmt::Display for AtomicCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AtomicCounter[count={}]", self.get())
    }
}

/// Counter behind a reader-writer lock.
///
/// Concurrent `get` calls share the lock; mutators take it exclusively.
///
/// # Fairness
///
/// `parking_lot::RwLock` is task-fair: once a writer is queued, new readers
/// block behind it, so a steady stream of readers cannot starve writers, and
/// the lock's eventual fairness hands it over to long-waiting threads of
/// either kind. Writer preference is therefore bounded rather than absolute.
#[derive(Debug, Default)]
pub struct RwLockCounter {
    value: RwLock<i64>,
    readers: AtomicUsize,
}

/// Shared guard that keeps [`RwLockCounter::read_lock_count`] in step.
struct CountedRead<'a> {
    guard: RwLockReadGuard<'a, i64>,
    readers: &'a AtomicUsize,
}

impl Drop for CountedRead<'_> {
    fn drop(&mut self) {
        self.readers.fetch_sub(1, Ordering::Relaxed);
    }
}

impl RwLockCounter {
    /// Create a counter starting at 0.
    pub fn new() -> Self {
        Self {
            value: RwLock::new(0),
            readers: AtomicUsize::new(0),
        }
    }

    fn read(&self) -> CountedRead<'_> {
        let guard = self.value.read();
        self.readers.fetch_add(1, Ordering::Relaxed);
        CountedRead {
            guard,
            readers: &self.readers,
        }
    }

    /// Number of threads currently holding the shared lock.
    ///
    /// Note: For monitoring only, the answer may change immediately.
    pub fn read_lock_count(&self) -> usize {
        self.readers.load(Ordering::Relaxed)
    }

    /// Whether a writer currently holds the lock.
    ///
    /// Note: For monitoring only, the answer may change immediately.
    pub fn is_write_locked(&self) -> bool {
        self.value.is_locked_exclusive()
    }
}

impl Counter for RwLockCounter {
    fn add(&self, delta: i64) {
        let mut value = self.value.write();
        *value = value.wrapping_add(delta);
    }

    fn get_and_add(&self, delta: i64) -> i64 {
        let mut value = self.value.write();
        let previous = *value;
        *value = previous.wrapping_add(delta);
        previous
    }

    fn compare_and_set(&self, expected: i64, update: i64) -> bool {
        let mut value = self.value.write();
        if *value == expected {
            *value = update;
            true
        } else {
            false
        }
    }

    fn get(&self) -> i64 {
        *self.read().guard
    }

    fn reset(&self) {
        *self.value.write() = 0;
    }

    fn strategy(&self) -> CounterStrategy {
        CounterStrategy::RwLock
    }
}

impl fmt::Display for RwLockCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RwLockCounter[count={}]", self.get())
    }
}

/// Counter with optimistic, stamp-validated reads.
///
/// Writers take the exclusive side of a reader-writer lock and bracket their
/// store with two stamp increments, so the stamp is odd exactly while a write
/// is in progress. Readers load the stamp, the value, and the stamp again; if
/// both stamps are equal and even, no writer intervened and the value is
/// returned without touching the lock. After `OPTIMISTIC_ATTEMPTS` failed
/// validations the read falls back to the shared side of the lock, which
/// bounds the spinning.
///
/// The fallback lock follows the same task-fair policy as [`RwLockCounter`].
#[derive(Debug, Default)]
pub struct OptimisticCounter {
    lock: RwLock<()>,
    stamp: CachePadded<AtomicU64>,
    value: AtomicI64,
}

impl OptimisticCounter {
    /// Create a counter starting at 0.
    pub fn new() -> Self {
        Self {
            lock: RwLock::new(()),
            stamp: CachePadded::new(AtomicU64::new(0)),
            value: AtomicI64::new(0),
        }
    }

    /// Run `f` on the current value under the write lock and store the value
    /// it returns, bumping the stamp around the store.
    ///
    /// Returns whatever `f` decided to report. When `f` returns `None` as the
    /// new value nothing is written and the stamp is left alone.
    fn write_with<R>(&self, f: impl FnOnce(i64) -> (Option<i64>, R)) -> R {
        let _guard = self.lock.write();
        let current = self.value.load(Ordering::Relaxed);
        let (next, report) = f(current);

        if let Some(next) = next {
            let stamp = self.stamp.load(Ordering::Relaxed);
            self.stamp.store(stamp.wrapping_add(1), Ordering::Relaxed);
            fence(Ordering::Release);
            self.value.store(next, Ordering::Relaxed);
            self.stamp.store(stamp.wrapping_add(2), Ordering::Release);
        }

        report
    }

    /// One optimistic read attempt.
    #[inline]
    fn try_optimistic_read(&self) -> Option<i64> {
        let before = self.stamp.load(Ordering::Acquire);
        if before & 1 == 1 {
            return None;
        }
        let value = self.value.load(Ordering::Relaxed);
        fence(Ordering::Acquire);
        let after = self.stamp.load(Ordering::Relaxed);
        (before == after).then_some(value)
    }
}

impl Counter for OptimisticCounter {
    fn add(&self, delta: i64) {
        self.write_with(|value| (Some(value.wrapping_add(delta)), ()));
    }

    fn get_and_add(&self, delta: i64) -> i64 {
        self.write_with(|value| (Some(value.wrapping_add(delta)), value))
    }

    fn compare_and_set(&self, expected: i64, update: i64) -> bool {
        self.write_with(|value| {
            if value == expected {
                (Some(update), true)
            } else {
                (None, false)
            }
        })
    }

    fn get(&self) -> i64 {
        for _ in 0..OPTIMISTIC_ATTEMPTS {
            if let Some(value) = self.try_optimistic_read() {
                return value;
            }
            std::hint::spin_loop();
        }

        let _guard = self.lock.read();
        self.value.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.write_with(|_| (Some(0), ()));
    }

    fn strategy(&self) -> CounterStrategy {
        CounterStrategy::Optimistic
    }
}

impl fmt::Display for OptimisticCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OptimisticCounter[count={}]", self.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::{
        sync::{Arc, Barrier},
        thread,
    };

    #[rstest]
    #[case(CounterStrategy::Mutex)]
    #[case(CounterStrategy::Atomic)]
    #[case(CounterStrategy::RwLock)]
    #[case(CounterStrategy::Optimistic)]
    fn basic_operations(#[case] strategy: CounterStrategy) {
        let counter = strategy.build();
        assert_eq!(counter.strategy(), strategy);
        assert_eq!(counter.get(), 0);

        for _ in 0..10 {
            counter.increment();
        }
        assert_eq!(counter.get(), 10);

        counter.decrement();
        counter.add(-4);
        assert_eq!(counter.get(), 5);

        assert_eq!(counter.get_and_increment(), 5);
        assert_eq!(counter.increment_and_get(), 7);
        assert_eq!(counter.get_and_add(3), 7);
        assert_eq!(counter.get(), 10);

        counter.reset();
        assert_eq!(counter.get(), 0);
    }

    #[rstest]
    #[case(CounterStrategy::Mutex)]
    #[case(CounterStrategy::Atomic)]
    #[case(CounterStrategy::RwLock)]
    #[case(CounterStrategy::Optimistic)]
    fn compare_and_set_only_on_match(#[case] strategy: CounterStrategy) {
        let counter = strategy.build();
        counter.add(3);

        assert!(!counter.compare_and_set(2, 100));
        assert_eq!(counter.get(), 3);

        assert!(counter.compare_and_set(3, 100));
        assert_eq!(counter.get(), 100);
    }

    #[rstest]
    #[case(CounterStrategy::Mutex)]
    #[case(CounterStrategy::Atomic)]
    #[case(CounterStrategy::RwLock)]
    #[case(CounterStrategy::Optimistic)]
    fn add_wraps_on_overflow(#[case] strategy: CounterStrategy) {
        let counter = strategy.build();
        assert!(counter.compare_and_set(0, i64::MAX));
        counter.increment();
        assert_eq!(counter.get(), i64::MIN);
    }

    #[rstest]
    #[case(CounterStrategy::Mutex)]
    #[case(CounterStrategy::Atomic)]
    #[case(CounterStrategy::RwLock)]
    #[case(CounterStrategy::Optimistic)]
    fn concurrent_increments_are_not_lost(#[case] strategy: CounterStrategy) {
        let threads = 8;
        let per_thread = 20_000;
        let counter = strategy.build();

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        counter.increment();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.get(), threads * per_thread);
    }

    #[rstest]
    #[case(CounterStrategy::Mutex)]
    #[case(CounterStrategy::Atomic)]
    #[case(CounterStrategy::RwLock)]
    #[case(CounterStrategy::Optimistic)]
    fn single_cas_winner(#[case] strategy: CounterStrategy) {
        let racers = 16;
        let counter = strategy.build();
        let barrier = Arc::new(Barrier::new(racers));

        let handles: Vec<_> = (0..racers)
            .map(|_| {
                let counter = Arc::clone(&counter);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    counter.compare_and_set(0, 1)
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(counter.get(), 1);
    }

    #[rstest]
    #[case(CounterStrategy::Mutex)]
    #[case(CounterStrategy::Atomic)]
    #[case(CounterStrategy::RwLock)]
    #[case(CounterStrategy::Optimistic)]
    fn single_winner_across_distinct_expectations(#[case] strategy: CounterStrategy) {
        // racer i expects i; only the racer expecting the initial 0 can move
        // the counter, and its update matches no other expectation
        let racers: i64 = 16;
        let counter = strategy.build();
        let barrier = Arc::new(Barrier::new(racers as usize));

        let handles: Vec<_> = (0..racers)
            .map(|expected| {
                let counter = Arc::clone(&counter);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    (expected, counter.compare_and_set(expected, racers))
                })
            })
            .collect();

        let winners: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|(_, won)| *won)
            .map(|(expected, _)| expected)
            .collect();
        assert_eq!(winners, [0]);
        assert_eq!(counter.get(), racers);
    }

    #[test]
    fn optimistic_reads_never_observe_torn_values() {
        // Writers only ever move the value between multiples of 1000, readers
        // must never see anything in between.
        let counter = Arc::new(OptimisticCounter::new());
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let writer = {
            let counter = Arc::clone(&counter);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    counter.add(1000);
                    counter.add(-1000);
                }
            })
        };

        for _ in 0..100_000 {
            let value = counter.get();
            assert!(value == 0 || value == 1000, "unexpected value {value}");
        }

        stop.store(true, Ordering::Relaxed);
        writer.join().unwrap();
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn rwlock_counts_shared_holders() {
        let counter = RwLockCounter::new();
        assert_eq!(counter.read_lock_count(), 0);

        let first = counter.read();
        let second = counter.read();
        assert_eq!(counter.read_lock_count(), 2);
        assert_eq!(*first.guard, 0);

        drop(first);
        assert_eq!(counter.read_lock_count(), 1);
        drop(second);
        assert_eq!(counter.read_lock_count(), 0);

        counter.add(3);
        assert_eq!(counter.get(), 3);
        assert_eq!(counter.read_lock_count(), 0);
    }

    #[test]
    fn rwlock_reports_write_lock() {
        let counter = RwLockCounter::new();
        assert!(!counter.is_write_locked());

        let guard = counter.value.write();
        assert!(counter.is_write_locked());
        drop(guard);
        assert!(!counter.is_write_locked());
    }

    #[test]
    fn display_names_the_strategy() {
        let counter = AtomicCounter::new();
        counter.add(42);
        assert_eq!(counter.to_string(), "AtomicCounter[count=42]");

        let counter = OptimisticCounter::new();
        counter.add(-1);
        assert_eq!(counter.to_string(), "OptimisticCounter[count=-1]");
        assert_eq!(CounterStrategy::RwLock.to_string(), "rwlock");
    }
}
