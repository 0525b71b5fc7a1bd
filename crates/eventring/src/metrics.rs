use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe queue metrics.
///
/// All operations use `Ordering::Relaxed`: these are purely statistical
/// counters with no control-flow dependencies, so stale reads are fine and
/// memory barriers on the publish hot path would be wasted.
#[derive(Debug, Default)]
pub(crate) struct Metrics {
    events_published: AtomicU64,
    events_consumed: AtomicU64,
    batches_consumed: AtomicU64,
    full_rejections: AtomicU64,
}

impl Metrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn add_published(&self, n: u64) {
        self.events_published.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_consumed(&self, n: u64) {
        self.events_consumed.fetch_add(n, Ordering::Relaxed);
        self.batches_consumed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_full_rejection(&self) {
        self.full_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_consumed: self.events_consumed.load(Ordering::Relaxed),
            batches_consumed: self.batches_consumed.load(Ordering::Relaxed),
            full_rejections: self.full_rejections.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of queue metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Events successfully published across all rings.
    pub events_published: u64,
    /// Events handed to the consumer.
    pub events_consumed: u64,
    /// Consume calls that drained at least one event.
    pub batches_consumed: u64,
    /// Publish attempts rejected because a ring was full.
    pub full_rejections: u64,
}

impl MetricsSnapshot {
    /// Events currently sitting in the queue (published but not consumed).
    pub fn backlog(&self) -> u64 {
        self.events_published.saturating_sub(self.events_consumed)
    }
}
