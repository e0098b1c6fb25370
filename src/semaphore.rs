use crate::{
    QueueError,
    cancel::{CANCEL_POLL, CancellationToken},
};
use parking_lot::{Condvar, Mutex};
use std::fmt;

/// Counting semaphore built on a monitor.
///
/// `acquire_with` blocks while no permit is available and can be abandoned
/// through a [`CancellationToken`]. `release` wakes one waiter.
///
/// # Examples
///
/// ```
/// use contention::{CancellationToken, Semaphore};
///
/// let slots = Semaphore::new(1);
/// slots.acquire_with(&CancellationToken::never()).unwrap();
/// assert!(!slots.try_acquire());
///
/// slots.release();
/// assert_eq!(slots.available_permits(), 1);
/// ```
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Create a semaphore holding `permits` permits.
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Take one permit, blocking while none are available.
    ///
    /// An available permit is taken even if `cancel` has already fired.
    ///
    /// # Returns
    /// `Ok(())` once a permit is held, or [`QueueError::Cancelled`] if the
    /// token fired while waiting. A cancelled call holds no permit.
    pub fn acquire_with(&self, cancel: &CancellationToken) -> Result<(), QueueError> {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }
            if cancel.is_cancellable() {
                self.available.wait_for(&mut permits, CANCEL_POLL);
            } else {
                self.available.wait(&mut permits);
            }
        }
        *permits -= 1;
        Ok(())
    }

    /// Take one permit if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            false
        } else {
            *permits -= 1;
            true
        }
    }

    /// Return one permit and wake one waiter.
    pub fn release(&self) {
        *self.permits.lock() += 1;
        self.available.notify_one();
    }

    /// Number of permits currently available.
    ///
    /// Note: For monitoring only.
    pub fn available_permits(&self) -> usize {
        *self.permits.lock()
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("available_permits", &self.available_permits())
            .finish()
    }
}
