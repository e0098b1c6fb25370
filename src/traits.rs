use std::fmt;

use crate::{CancellationToken, CounterStrategy, QueueError, QueueStrategy};

/// Trait for shared 64-bit signed counters.
///
/// Every strategy provides the same linearizable contract on a single memory
/// location: each operation appears to take effect at one instant between its
/// invocation and return. No ordering is promised with respect to unrelated
/// state.
///
/// Arithmetic wraps on overflow in every strategy.
pub trait Counter: Send + Sync + fmt::Display {
    /// Add `delta` atomically.
    fn add(&self, delta: i64);

    /// Add `delta` atomically and return the value held before the addition.
    fn get_and_add(&self, delta: i64) -> i64;

    /// Set the value to `update` iff it currently equals `expected`.
    ///
    /// # Returns
    /// `true` if the swap happened. Of several callers racing on the same
    /// `expected` value, at most one observes `true`. A `false` return is a
    /// normal outcome, not an error.
    fn compare_and_set(&self, expected: i64, update: i64) -> bool;

    /// Read the current value.
    ///
    /// The returned value was held by the counter at some instant during the
    /// call.
    fn get(&self) -> i64;

    /// Set the value to 0.
    ///
    /// Meant for setup between runs; calling it concurrently with in-flight
    /// operations is allowed but makes the outcome of those operations
    /// meaningless to a benchmark.
    fn reset(&self);

    /// The synchronization strategy backing this counter.
    fn strategy(&self) -> CounterStrategy;

    /// Add 1 atomically.
    fn increment(&self) {
        self.add(1);
    }

    /// Subtract 1 atomically.
    fn decrement(&self) {
        self.add(-1);
    }

    /// Add 1 atomically and return the previous value.
    fn get_and_increment(&self) -> i64 {
        self.get_and_add(1)
    }

    /// Add 1 atomically and return the new value.
    fn increment_and_get(&self) -> i64 {
        self.get_and_add(1).wrapping_add(1)
    }
}

/// Trait for fixed-capacity FIFO queues with blocking `put`/`take`.
///
/// All strategies keep `0 <= size <= capacity` at every observable instant and
/// preserve FIFO order for the items of any single producer. Blocking calls
/// take a [`CancellationToken`]; when it fires while the call is waiting, the
/// call returns [`QueueError::Cancelled`] without touching the queue.
pub trait BoundedQueue<T>: Send + Sync {
    /// Insert `item` at the tail, blocking while the queue is full.
    ///
    /// # Arguments
    /// * `item` - The item to insert
    /// * `cancel` - Signal that abandons the wait
    ///
    /// # Returns
    /// `Ok(())` once the item is enqueued. On cancellation the item is handed
    /// back together with [`QueueError::Cancelled`].
    fn put_with(&self, item: T, cancel: &CancellationToken) -> Result<(), (T, QueueError)>;

    /// Remove the head item, blocking while the queue is empty.
    ///
    /// An available item is always preferred over an already-fired token, so
    /// a consumer can drain the queue after cancellation.
    ///
    /// # Returns
    /// The head item, or [`QueueError::Cancelled`] if the token fired while the
    /// queue was empty.
    fn take_with(&self, cancel: &CancellationToken) -> Result<T, QueueError>;

    /// Insert `item` only if there is room right now.
    ///
    /// # Returns
    /// `Ok(())` on success, or the item with [`QueueError::Full`]
    fn try_put(&self, item: T) -> Result<(), (T, QueueError)>;

    /// Remove the head item only if one is available right now.
    ///
    /// # Returns
    /// The head item, or [`QueueError::Empty`]
    fn try_take(&self) -> Result<T, QueueError>;

    /// Best-effort snapshot of the number of buffered items.
    ///
    /// Note: For monitoring only. The value may be stale by the time it is
    /// returned.
    fn try_size(&self) -> usize;

    /// Maximum number of buffered items.
    fn capacity(&self) -> usize;

    /// The synchronization strategy backing this queue.
    fn strategy(&self) -> QueueStrategy;

    /// Insert `item`, blocking until there is room.
    fn put(&self, item: T) -> Result<(), QueueError> {
        self.put_with(item, &CancellationToken::never())
            .map_err(|(_, err)| err)
    }

    /// Remove the head item, blocking until one is available.
    fn take(&self) -> Result<T, QueueError> {
        self.take_with(&CancellationToken::never())
    }

    /// Check if the queue appears empty.
    /// Note: In concurrent scenarios, this may race with other operations.
    fn is_empty(&self) -> bool {
        self.try_size() == 0
    }
}
