use std::{
    fmt,
    time::{Duration, Instant},
};

/// A unit of work moved from a producer to a consumer.
///
/// The producer that creates an item owns it until `put`, the queue owns it
/// while it is buffered, and the consumer that takes it owns it afterwards and
/// stamps its completion time exactly once.
///
/// # Examples
///
/// ```
/// use contention::WorkItem;
///
/// let mut item = WorkItem::new(7, "payload");
/// assert!(item.processing_time().is_none());
///
/// assert!(item.mark_processed());
/// assert!(!item.mark_processed()); // completion is recorded once
/// assert!(item.processing_time().is_some());
/// ```
pub struct WorkItem<P> {
    id: u64,
    payload: P,
    created_at: Instant,
    completed_at: Option<Instant>,
}

impl<P> WorkItem<P> {
    /// Create an item stamped with the current time.
    pub fn new(id: u64, payload: P) -> Self {
        Self {
            id,
            payload,
            created_at: Instant::now(),
            completed_at: None,
        }
    }

    /// Identifier assigned by the producer.
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Borrow the payload.
    pub const fn payload(&self) -> &P {
        &self.payload
    }

    /// Consume the item, returning its payload.
    pub fn into_payload(self) -> P {
        self.payload
    }

    /// When the producer created the item.
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When a consumer finished the item, if it has.
    pub const fn completed_at(&self) -> Option<Instant> {
        self.completed_at
    }

    /// Record completion now.
    ///
    /// # Returns
    /// `true` the first time; later calls leave the original timestamp and
    /// return `false`.
    pub fn mark_processed(&mut self) -> bool {
        if self.completed_at.is_some() {
            return false;
        }
        self.completed_at = Some(Instant::now());
        true
    }

    /// Time from creation to completion, once completed.
    pub fn processing_time(&self) -> Option<Duration> {
        self.completed_at
            .map(|done| done.saturating_duration_since(self.created_at))
    }

    /// Processing time in nanoseconds, or -1 while unknown.
    pub fn processing_nanos(&self) -> i64 {
        self.processing_time()
            .map_or(-1, |elapsed| i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX))
    }
}

impl<P: fmt::Debug> fmt::Debug for WorkItem<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("payload", &self.payload)
            .field("processing_time", &self.processing_time())
            .finish_non_exhaustive()
    }
}
