use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

/// Upper bound on how long a cancellable wait sleeps before re-checking its
/// token.
///
/// Waits on a token that can never fire ([`CancellationToken::never`]) block
/// without a timeout.
pub(crate) const CANCEL_POLL: Duration = Duration::from_millis(2);

/// Cooperative cancellation signal for blocked `put`/`take` calls.
///
/// Cloning a token yields a handle to the same signal; cancelling any clone
/// cancels all of them. Cancellation is permanent.
///
/// # Examples
///
/// ```
/// use contention::CancellationToken;
///
/// let token = CancellationToken::new();
/// let observer = token.clone();
///
/// assert!(!observer.is_cancelled());
/// token.cancel();
/// assert!(observer.is_cancelled());
/// ```
#[derive(Clone)]
pub struct CancellationToken {
    flag: Option<Arc<AtomicBool>>,
}

impl CancellationToken {
    /// Create a token that has not been cancelled yet.
    pub fn new() -> Self {
        Self {
            flag: Some(Arc::new(AtomicBool::new(false))),
        }
    }

    /// A token that can never be cancelled.
    ///
    /// Blocking calls made with it wait without a poll timeout. This is what
    /// the plain `put`/`take` methods use.
    pub const fn never() -> Self {
        Self { flag: None }
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        if let Some(flag) = &self.flag {
            flag.store(true, Ordering::Release);
        }
    }

    /// Whether [`cancel`](Self::cancel) has been called on any clone.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Whether this token is able to fire at all.
    #[inline]
    pub(crate) const fn is_cancellable(&self) -> bool {
        self.flag.is_some()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancellable", &self.is_cancellable())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_signal() {
        let token = CancellationToken::new();
        let clone = token.clone();

        clone.cancel();
        assert!(token.is_cancelled());

        // idempotent
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn never_token_ignores_cancel() {
        let token = CancellationToken::never();
        token.cancel();
        assert!(!token.is_cancelled());
        assert!(!token.is_cancellable());
    }

    #[test]
    fn default_is_cancellable() {
        let token = CancellationToken::default();
        assert!(token.is_cancellable());
        token.cancel();
        assert!(token.is_cancelled());
    }
}
