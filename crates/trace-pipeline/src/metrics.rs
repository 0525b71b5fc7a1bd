//! Pipeline observability hooks.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters the batching processor reports into.
///
/// Implementations must be cheap and non-blocking; hooks are called from
/// the hot path (producers and the consumer task).
pub trait PipelineMetrics: Send + Sync {
    /// Spans accepted into an export batch.
    fn spans_processed(&self, count: u64);
    /// Spans dropped before export (queue full, or discarded at shutdown).
    fn spans_dropped(&self, count: u64);
    /// An export batch was delivered.
    fn export_succeeded(&self, batch_size: usize);
    /// An export batch was abandoned after the transport gave up.
    fn export_failed(&self, batch_size: usize);
    /// Consumer-side observation of total queued events across producers.
    fn queue_depth(&self, depth: usize);
}

/// Metrics sink that discards everything.
#[derive(Debug, Default, Clone)]
pub struct NoopMetrics;

impl PipelineMetrics for NoopMetrics {
    fn spans_processed(&self, _count: u64) {}
    fn spans_dropped(&self, _count: u64) {}
    fn export_succeeded(&self, _batch_size: usize) {}
    fn export_failed(&self, _batch_size: usize) {}
    fn queue_depth(&self, _depth: usize) {}
}

/// Atomic-counter metrics for tests and demos.
///
/// Uses Relaxed ordering: counters are monotonic and independently read,
/// no ordering relationship with other memory is needed.
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    spans_processed: AtomicU64,
    spans_dropped: AtomicU64,
    exports_succeeded: AtomicU64,
    exports_failed: AtomicU64,
    max_queue_depth: AtomicU64,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans_processed_total(&self) -> u64 {
        self.spans_processed.load(Ordering::Relaxed)
    }

    pub fn spans_dropped_total(&self) -> u64 {
        self.spans_dropped.load(Ordering::Relaxed)
    }

    pub fn exports_succeeded_total(&self) -> u64 {
        self.exports_succeeded.load(Ordering::Relaxed)
    }

    pub fn exports_failed_total(&self) -> u64 {
        self.exports_failed.load(Ordering::Relaxed)
    }

    pub fn max_queue_depth_seen(&self) -> u64 {
        self.max_queue_depth.load(Ordering::Relaxed)
    }
}

impl PipelineMetrics for AtomicMetrics {
    fn spans_processed(&self, count: u64) {
        self.spans_processed.fetch_add(count, Ordering::Relaxed);
    }

    fn spans_dropped(&self, count: u64) {
        self.spans_dropped.fetch_add(count, Ordering::Relaxed);
    }

    fn export_succeeded(&self, _batch_size: usize) {
        self.exports_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    fn export_failed(&self, _batch_size: usize) {
        self.exports_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn queue_depth(&self, depth: usize) {
        self.max_queue_depth.fetch_max(depth as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_metrics_accumulate() {
        let metrics = AtomicMetrics::new();
        metrics.spans_processed(10);
        metrics.spans_processed(5);
        metrics.spans_dropped(2);
        metrics.export_succeeded(512);
        metrics.export_failed(512);
        metrics.queue_depth(7);
        metrics.queue_depth(3);

        assert_eq!(metrics.spans_processed_total(), 15);
        assert_eq!(metrics.spans_dropped_total(), 2);
        assert_eq!(metrics.exports_succeeded_total(), 1);
        assert_eq!(metrics.exports_failed_total(), 1);
        assert_eq!(metrics.max_queue_depth_seen(), 7);
    }
}
