use crate::{
    QueueError,
    cancel::{CANCEL_POLL, CancellationToken},
    ring::Ring,
    semaphore::Semaphore,
    traits::BoundedQueue,
};
use crossbeam_channel::{
    Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, TrySendError,
};
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::{
    fmt,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// The available bounded-queue strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueueStrategy {
    /// Library bounded channel (`crossbeam-channel`), the baseline.
    Channel,
    /// Circular buffer under one mutex with "not full"/"not empty" condition
    /// variables.
    #[default]
    Monitor,
    /// Circular buffer with "empty slots"/"full slots" counting semaphores and
    /// a mutex for the indices.
    Semaphore,
}

impl QueueStrategy {
    /// Every strategy, in benchmark order.
    pub const ALL: [Self; 3] = [Self::Channel, Self::Monitor, Self::Semaphore];

    /// Short name used in reports.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Monitor => "monitor",
            Self::Semaphore => "semaphore",
        }
    }
}

impl fmt::Display for QueueStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Builder for creating bounded queues of any strategy.
///
/// # Examples
///
/// ```
/// use contention::{BoundedQueue, QueueError, QueueStrategy, bounded};
///
/// # fn main() -> Result<(), QueueError> {
/// let queue = bounded::<&str>()
///     .capacity(2)
///     .strategy(QueueStrategy::Channel)
///     .build()?;
///
/// queue.put("a")?;
/// queue.put("b")?;
/// assert_eq!(queue.try_put("c"), Err(("c", QueueError::Full)));
///
/// // a capacity is mandatory and must be non-zero
/// assert!(bounded::<u8>().build().is_err());
/// assert!(bounded::<u8>().capacity(0).build().is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct QueueBuilder<T> {
    capacity: Option<usize>,
    strategy: QueueStrategy,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Default for QueueBuilder<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> QueueBuilder<T>
where
    T: Send + 'static,
{
    /// Create a new queue builder using the monitor strategy
    pub const fn new() -> Self {
        Self {
            capacity: None,
            strategy: QueueStrategy::Monitor,
            _phantom: PhantomData,
        }
    }

    /// Set the queue capacity (must be at least 1)
    #[must_use]
    pub const fn capacity(mut self, cap: usize) -> Self {
        self.capacity = Some(cap);
        self
    }

    /// Select the synchronization strategy
    #[must_use]
    pub const fn strategy(mut self, strategy: QueueStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Build the queue behind the [`BoundedQueue`] contract
    pub fn build(self) -> Result<Arc<dyn BoundedQueue<T>>, QueueError> {
        let capacity = self.capacity.ok_or(QueueError::InvalidCapacity)?;
        let queue: Arc<dyn BoundedQueue<T>> = match self.strategy {
            QueueStrategy::Channel => Arc::new(ChannelQueue::new(capacity)?),
            QueueStrategy::Monitor => Arc::new(MonitorQueue::new(capacity)?),
            QueueStrategy::Semaphore => Arc::new(SemaphoreQueue::new(capacity)?),
        };
        Ok(queue)
    }
}

/// Convenience function for creating bounded queues.
///
/// This is the primary entry point; the returned builder selects capacity and
/// strategy.
pub const fn bounded<T>() -> QueueBuilder<T>
where
    T: Send + 'static,
{
    QueueBuilder::new()
}

const fn check_capacity(capacity: usize) -> Result<usize, QueueError> {
    if capacity == 0 {
        Err(QueueError::InvalidCapacity)
    } else {
        Ok(capacity)
    }
}

/// Bounded queue delegating to a `crossbeam-channel` bounded channel.
///
/// The queue owns both ends of the channel, so it never observes a
/// disconnect. Cancellable waits poll their token between timed send/receive
/// attempts.
pub struct ChannelQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    capacity: usize,
}

impl<T> ChannelQueue<T> {
    /// Create a queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        let capacity = check_capacity(capacity)?;
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Ok(Self {
            sender,
            receiver,
            capacity,
        })
    }
}

impl<T> fmt::Debug for ChannelQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.receiver.len())
            .finish_non_exhaustive()
    }
}

impl<T: Send> BoundedQueue<T> for ChannelQueue<T> {
    fn put_with(&self, mut item: T, cancel: &CancellationToken) -> Result<(), (T, QueueError)> {
        if !cancel.is_cancellable() {
            return self
                .sender
                .send(item)
                .map_err(|err| (err.into_inner(), QueueError::Disconnected));
        }

        loop {
            match self.sender.send_timeout(item, CANCEL_POLL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => {
                    if cancel.is_cancelled() {
                        return Err((back, QueueError::Cancelled));
                    }
                    item = back;
                },
                Err(SendTimeoutError::Disconnected(back)) => {
                    return Err((back, QueueError::Disconnected));
                },
            }
        }
    }

    fn take_with(&self, cancel: &CancellationToken) -> Result<T, QueueError> {
        if !cancel.is_cancellable() {
            return self.receiver.recv().map_err(|_| QueueError::Disconnected);
        }

        loop {
            // Read the token before polling: an item sent before the token
            // fired is then guaranteed to be seen by this `try_recv`.
            let cancelled = cancel.is_cancelled();
            match self.receiver.try_recv() {
                Ok(item) => return Ok(item),
                Err(TryRecvError::Disconnected) => return Err(QueueError::Disconnected),
                Err(TryRecvError::Empty) if cancelled => return Err(QueueError::Cancelled),
                Err(TryRecvError::Empty) => {},
            }

            match self.receiver.recv_timeout(CANCEL_POLL) {
                Ok(item) => return Ok(item),
                Err(RecvTimeoutError::Timeout) => {},
                Err(RecvTimeoutError::Disconnected) => return Err(QueueError::Disconnected),
            }
        }
    }

    fn try_put(&self, item: T) -> Result<(), (T, QueueError)> {
        self.sender.try_send(item).map_err(|err| match err {
            TrySendError::Full(back) => (back, QueueError::Full),
            TrySendError::Disconnected(back) => (back, QueueError::Disconnected),
        })
    }

    fn try_take(&self) -> Result<T, QueueError> {
        self.receiver.try_recv().map_err(|err| match err {
            TryRecvError::Empty => QueueError::Empty,
            TryRecvError::Disconnected => QueueError::Disconnected,
        })
    }

    fn try_size(&self) -> usize {
        self.receiver.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn strategy(&self) -> QueueStrategy {
        QueueStrategy::Channel
    }
}

/// Bounded queue implemented as a monitor.
///
/// One mutex protects a circular buffer; `put` waits on `not_full` while the
/// buffer is full and `take` waits on `not_empty` while it is empty. Every
/// wait sits in a predicate loop, so spurious wakeups are harmless.
///
/// Each successful operation signals the complementary condition after the
/// buffer has been mutated, with `notify_one` rather than a broadcast: only
/// one waiter can use the slot or item just produced. The signal is sent on
/// every success, not only on the empty/full transitions, because waking only
/// on transitions loses wakeups when several waiters are parked.
pub struct MonitorQueue<T> {
    ring: Mutex<Ring<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    depth: CachePadded<AtomicUsize>,
    capacity: usize,
}

impl<T> MonitorQueue<T> {
    /// Create a queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        let capacity = check_capacity(capacity)?;
        Ok(Self {
            ring: Mutex::new(Ring::with_capacity(capacity)),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            depth: CachePadded::new(AtomicUsize::new(0)),
            capacity,
        })
    }
}

impl<T> fmt::Debug for MonitorQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.depth.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T: Send> BoundedQueue<T> for MonitorQueue<T> {
    fn put_with(&self, item: T, cancel: &CancellationToken) -> Result<(), (T, QueueError)> {
        let mut ring = self.ring.lock();
        while ring.is_full() {
            if cancel.is_cancelled() {
                return Err((item, QueueError::Cancelled));
            }
            if cancel.is_cancellable() {
                self.not_full.wait_for(&mut ring, CANCEL_POLL);
            } else {
                self.not_full.wait(&mut ring);
            }
        }

        if let Err(back) = ring.push_back(item) {
            return Err((back, QueueError::Full));
        }
        self.depth.store(ring.len(), Ordering::Relaxed);
        drop(ring);

        self.not_empty.notify_one();
        Ok(())
    }

    fn take_with(&self, cancel: &CancellationToken) -> Result<T, QueueError> {
        let mut ring = self.ring.lock();
        loop {
            if let Some(item) = ring.pop_front() {
                self.depth.store(ring.len(), Ordering::Relaxed);
                drop(ring);

                self.not_full.notify_one();
                return Ok(item);
            }
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }
            if cancel.is_cancellable() {
                self.not_empty.wait_for(&mut ring, CANCEL_POLL);
            } else {
                self.not_empty.wait(&mut ring);
            }
        }
    }

    fn try_put(&self, item: T) -> Result<(), (T, QueueError)> {
        let mut ring = self.ring.lock();
        ring.push_back(item).map_err(|back| (back, QueueError::Full))?;
        self.depth.store(ring.len(), Ordering::Relaxed);
        drop(ring);

        self.not_empty.notify_one();
        Ok(())
    }

    fn try_take(&self) -> Result<T, QueueError> {
        let mut ring = self.ring.lock();
        let item = ring.pop_front().ok_or(QueueError::Empty)?;
        self.depth.store(ring.len(), Ordering::Relaxed);
        drop(ring);

        self.not_full.notify_one();
        Ok(item)
    }

    fn try_size(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn strategy(&self) -> QueueStrategy {
        QueueStrategy::Monitor
    }
}

/// Bounded queue coordinated by counting semaphores.
///
/// `empty_slots` starts at `capacity` and `full_slots` at 0. `put` acquires an
/// empty slot, then locks the ring to write, then releases a full slot;
/// `take` mirrors it. The ring mutex is only ever held for the index
/// bookkeeping and never while blocking on a semaphore, so a thread holding
/// the mutex never waits on a thread that needs it, which rules out deadlock.
pub struct SemaphoreQueue<T> {
    ring: Mutex<Ring<T>>,
    empty_slots: Semaphore,
    full_slots: Semaphore,
    depth: CachePadded<AtomicUsize>,
    capacity: usize,
}

impl<T> SemaphoreQueue<T> {
    /// Create a queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        let capacity = check_capacity(capacity)?;
        Ok(Self {
            ring: Mutex::new(Ring::with_capacity(capacity)),
            empty_slots: Semaphore::new(capacity),
            full_slots: Semaphore::new(0),
            depth: CachePadded::new(AtomicUsize::new(0)),
            capacity,
        })
    }

    /// Write `item` into a slot the caller already holds a permit for.
    fn insert_reserved(&self, item: T) -> Result<(), (T, QueueError)> {
        let pushed = {
            let mut ring = self.ring.lock();
            let pushed = ring.push_back(item);
            self.depth.store(ring.len(), Ordering::Relaxed);
            pushed
        };

        match pushed {
            Ok(()) => {
                self.full_slots.release();
                Ok(())
            },
            Err(back) => {
                self.empty_slots.release();
                Err((back, QueueError::Full))
            },
        }
    }

    /// Remove the head item the caller already holds a permit for.
    fn remove_reserved(&self) -> Result<T, QueueError> {
        let item = {
            let mut ring = self.ring.lock();
            let item = ring.pop_front();
            self.depth.store(ring.len(), Ordering::Relaxed);
            item
        };

        match item {
            Some(item) => {
                self.empty_slots.release();
                Ok(item)
            },
            None => {
                self.full_slots.release();
                Err(QueueError::Empty)
            },
        }
    }
}

impl<T> fmt::Debug for SemaphoreQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemaphoreQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.depth.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T: Send> BoundedQueue<T> for SemaphoreQueue<T> {
    fn put_with(&self, item: T, cancel: &CancellationToken) -> Result<(), (T, QueueError)> {
        if let Err(err) = self.empty_slots.acquire_with(cancel) {
            return Err((item, err));
        }
        self.insert_reserved(item)
    }

    fn take_with(&self, cancel: &CancellationToken) -> Result<T, QueueError> {
        self.full_slots.acquire_with(cancel)?;
        self.remove_reserved()
    }

    fn try_put(&self, item: T) -> Result<(), (T, QueueError)> {
        if !self.empty_slots.try_acquire() {
            return Err((item, QueueError::Full));
        }
        self.insert_reserved(item)
    }

    fn try_take(&self) -> Result<T, QueueError> {
        if !self.full_slots.try_acquire() {
            return Err(QueueError::Empty);
        }
        self.remove_reserved()
    }

    fn try_size(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn strategy(&self) -> QueueStrategy {
        QueueStrategy::Semaphore
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::{
        collections::HashSet,
        sync::atomic::AtomicBool,
        thread,
        time::{Duration, Instant},
    };

    fn build<T: Send + 'static>(
        strategy: QueueStrategy,
        capacity: usize,
    ) -> Arc<dyn BoundedQueue<T>> {
        bounded::<T>()
            .capacity(capacity)
            .strategy(strategy)
            .build()
            .unwrap()
    }

    #[rstest]
    #[case(QueueStrategy::Channel)]
    #[case(QueueStrategy::Monitor)]
    #[case(QueueStrategy::Semaphore)]
    fn zero_capacity_is_rejected(#[case] strategy: QueueStrategy) {
        let result = bounded::<u32>().capacity(0).strategy(strategy).build();
        assert!(matches!(result, Err(QueueError::InvalidCapacity)));
    }

    #[rstest]
    #[case(QueueStrategy::Channel)]
    #[case(QueueStrategy::Monitor)]
    #[case(QueueStrategy::Semaphore)]
    fn put_take_wrap(#[case] strategy: QueueStrategy) {
        let queue = build::<u32>(strategy, 4);
        assert_eq!(queue.capacity(), 4);
        assert_eq!(queue.strategy(), strategy);

        for round in 0..3 {
            for i in 0..4 {
                queue.put(round * 10 + i).unwrap();
            }
            assert_eq!(queue.try_size(), 4);
            assert_eq!(queue.try_put(99), Err((99, QueueError::Full)));

            for i in 0..4 {
                assert_eq!(queue.take().unwrap(), round * 10 + i);
            }
            assert!(queue.is_empty());
            assert_eq!(queue.try_take(), Err(QueueError::Empty));
        }
    }

    #[rstest]
    #[case(QueueStrategy::Channel)]
    #[case(QueueStrategy::Monitor)]
    #[case(QueueStrategy::Semaphore)]
    fn put_blocks_until_take_makes_room(#[case] strategy: QueueStrategy) {
        let queue = build::<u32>(strategy, 1);
        queue.put(1).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = Arc::clone(&queue);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                queue.put(2).unwrap();
                done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!done.load(Ordering::SeqCst), "put returned on a full queue");
        assert_eq!(queue.try_size(), 1);

        assert_eq!(queue.take().unwrap(), 1);
        producer.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(queue.take().unwrap(), 2);
    }

    #[rstest]
    #[case(QueueStrategy::Channel)]
    #[case(QueueStrategy::Monitor)]
    #[case(QueueStrategy::Semaphore)]
    fn cancelled_take_leaves_queue_intact(#[case] strategy: QueueStrategy) {
        let queue = build::<u32>(strategy, 2);
        let token = CancellationToken::new();

        let waiter = {
            let queue = Arc::clone(&queue);
            let token = token.clone();
            thread::spawn(move || queue.take_with(&token))
        };

        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert_eq!(waiter.join().unwrap(), Err(QueueError::Cancelled));
        assert_eq!(queue.try_size(), 0);

        queue.put(7).unwrap();
        assert_eq!(queue.take().unwrap(), 7);
        assert_eq!(queue.try_size(), 0);
    }

    #[rstest]
    #[case(QueueStrategy::Channel)]
    #[case(QueueStrategy::Monitor)]
    #[case(QueueStrategy::Semaphore)]
    fn cancelled_put_returns_item(#[case] strategy: QueueStrategy) {
        let queue = build::<String>(strategy, 1);
        queue.put("first".to_owned()).unwrap();
        let token = CancellationToken::new();

        let waiter = {
            let queue = Arc::clone(&queue);
            let token = token.clone();
            thread::spawn(move || queue.put_with("second".to_owned(), &token))
        };

        thread::sleep(Duration::from_millis(20));
        token.cancel();
        let (item, err) = waiter.join().unwrap().unwrap_err();
        assert_eq!(item, "second");
        assert_eq!(err, QueueError::Cancelled);

        assert_eq!(queue.try_size(), 1);
        assert_eq!(queue.take().unwrap(), "first");
        assert!(queue.is_empty());
    }

    #[rstest]
    #[case(QueueStrategy::Channel)]
    #[case(QueueStrategy::Monitor)]
    #[case(QueueStrategy::Semaphore)]
    fn available_item_wins_over_cancellation(#[case] strategy: QueueStrategy) {
        let queue = build::<u32>(strategy, 2);
        queue.put(5).unwrap();

        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(queue.take_with(&token), Ok(5));
        assert_eq!(queue.take_with(&token), Err(QueueError::Cancelled));
    }

    #[rstest]
    #[case(QueueStrategy::Channel)]
    #[case(QueueStrategy::Monitor)]
    #[case(QueueStrategy::Semaphore)]
    fn item_put_before_cancel_is_never_stranded(#[case] strategy: QueueStrategy) {
        let queue = build::<u32>(strategy, 1);

        for round in 0..500 {
            let token = CancellationToken::new();
            let producer = {
                let queue = Arc::clone(&queue);
                let token = token.clone();
                thread::spawn(move || {
                    queue.put(round).unwrap();
                    token.cancel();
                })
            };

            let mut taken = Vec::new();
            while let Ok(item) = queue.take_with(&token) {
                taken.push(item);
            }
            producer.join().unwrap();

            assert_eq!(taken, [round], "round {round} lost its item");
            assert!(queue.is_empty());
        }
    }

    #[rstest]
    #[case(QueueStrategy::Channel)]
    #[case(QueueStrategy::Monitor)]
    #[case(QueueStrategy::Semaphore)]
    fn single_slot_rendezvous(#[case] strategy: QueueStrategy) {
        let items = 10_000u32;
        let queue = build::<u32>(strategy, 1);
        let start = Instant::now();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..items {
                    queue.put(i).unwrap();
                }
            })
        };

        for expected in 0..items {
            assert_eq!(queue.take().unwrap(), expected);
        }
        producer.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(queue.is_empty());
    }

    #[rstest]
    #[case(QueueStrategy::Channel)]
    #[case(QueueStrategy::Monitor)]
    #[case(QueueStrategy::Semaphore)]
    fn mpmc_no_loss_no_duplicates(#[case] strategy: QueueStrategy) {
        let producers = 4u64;
        let consumers = 4;
        let per_producer = 5_000u64;
        let total = (producers * per_producer) as usize;
        let queue = build::<u64>(strategy, 16);

        let producer_handles: Vec<_> = (0..producers)
            .map(|pid| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..per_producer {
                        queue.put((pid << 32) | i).unwrap();
                    }
                })
            })
            .collect();

        let token = CancellationToken::new();
        let consumer_handles: Vec<_> = (0..consumers)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let token = token.clone();
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Ok(value) = queue.take_with(&token) {
                        seen.push(value);
                    }
                    seen
                })
            })
            .collect();

        for handle in producer_handles {
            handle.join().unwrap();
        }
        token.cancel();

        let mut all = HashSet::with_capacity(total);
        for handle in consumer_handles {
            let seen = handle.join().unwrap();

            // per-producer order survives within each consumer's stream
            let mut last = vec![None; producers as usize];
            for value in &seen {
                let pid = (value >> 32) as usize;
                let seq = value & 0xFFFF_FFFF;
                if let Some(prev) = last[pid] {
                    assert!(seq > prev, "producer {pid} reordered: {prev} then {seq}");
                }
                last[pid] = Some(seq);
            }

            for value in seen {
                assert!(all.insert(value), "duplicate value observed: {value}");
            }
        }
        assert_eq!(all.len(), total, "expected all items consumed once");
        assert!(queue.is_empty());
    }
}
