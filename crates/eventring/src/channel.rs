#[cfg(debug_assertions)]
use crate::invariants::debug_assert_fifo_count;
use crate::{Config, MetricsSnapshot, Ring};
#[cfg(debug_assertions)]
use std::sync::atomic::AtomicU64;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Error returned when producer registration fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegisterError {
    /// Too many producers registered (exceeds `max_producers`).
    #[error("too many producers registered (max: {max})")]
    TooManyProducers {
        /// The configured maximum number of producers.
        max: usize,
    },
    /// Channel is closed.
    #[error("channel is closed")]
    Closed,
}

/// Multi-producer single-consumer channel using ring decomposition.
///
/// Each producer gets a dedicated SPSC ring, eliminating producer-producer
/// contention entirely; the consumer drains rings in registration order.
/// Ordering guarantee: per-producer FIFO. Events published by the same
/// thread are consumed in publish order.
pub struct Channel<T> {
    inner: Arc<ChannelInner<T>>,
}

struct ChannelInner<T> {
    rings: Vec<Ring<T>>,
    producer_count: AtomicUsize,
    closed: AtomicBool,
    config: Config,
    /// Per-producer consumption count for FIFO verification (debug only).
    #[cfg(debug_assertions)]
    consumed_counts: Vec<AtomicU64>,
}

impl<T> Channel<T> {
    /// Creates a new channel with the given configuration.
    pub fn new(config: Config) -> Self {
        let mut rings = Vec::with_capacity(config.max_producers);
        for _ in 0..config.max_producers {
            rings.push(Ring::new(config));
        }

        #[cfg(debug_assertions)]
        let consumed_counts = (0..config.max_producers)
            .map(|_| AtomicU64::new(0))
            .collect();

        Self {
            inner: Arc::new(ChannelInner {
                rings,
                producer_count: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                config,
                #[cfg(debug_assertions)]
                consumed_counts,
            }),
        }
    }

    /// Registers a new producer. Fails if too many producers or closed.
    pub fn register(&self) -> Result<Producer<T>, RegisterError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(RegisterError::Closed);
        }

        let id = self.inner.producer_count.fetch_add(1, Ordering::SeqCst);
        if id >= self.inner.config.max_producers {
            self.inner.producer_count.fetch_sub(1, Ordering::SeqCst);
            return Err(RegisterError::TooManyProducers {
                max: self.inner.config.max_producers,
            });
        }

        Ok(Producer {
            channel: Arc::clone(&self.inner),
            id,
        })
    }

    /// Drains all available items from every ring, in registration order.
    ///
    /// The handler receives ownership of each item; within one producer,
    /// items arrive in publish order.
    pub fn consume_all<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(T),
    {
        let mut total = 0;
        let count = self.inner.producer_count.load(Ordering::Acquire);

        for (producer_id, ring) in self.inner.rings[..count].iter().enumerate() {
            let consumed = ring.consume_batch(&mut handler);
            self.track_fifo(producer_id, consumed);
            total += consumed;
        }

        total
    }

    /// Drains up to `max_total` items across all rings.
    ///
    /// Bounds consumer pause time under heavy backlog; earlier rings are
    /// preferred, which is fine because the consumer runs continuously.
    pub fn consume_all_up_to<F>(&self, max_total: usize, mut handler: F) -> usize
    where
        F: FnMut(T),
    {
        let mut total = 0;
        let count = self.inner.producer_count.load(Ordering::Acquire);

        for (producer_id, ring) in self.inner.rings[..count].iter().enumerate() {
            if total >= max_total {
                break;
            }
            let consumed = ring.consume_up_to(max_total - total, &mut handler);
            self.track_fifo(producer_id, consumed);
            total += consumed;
        }

        total
    }

    #[cfg(debug_assertions)]
    fn track_fifo(&self, producer_id: usize, consumed: usize) {
        let old_count = self.inner.consumed_counts[producer_id].load(Ordering::Relaxed);
        let new_count = old_count + consumed as u64;
        debug_assert_fifo_count!(producer_id, old_count, new_count);
        self.inner.consumed_counts[producer_id].store(new_count, Ordering::Relaxed);
    }

    #[cfg(not(debug_assertions))]
    #[inline]
    fn track_fifo(&self, _producer_id: usize, _consumed: usize) {}

    /// Closes the channel: no new registrations, publishes fail, drains
    /// still work so the consumer can empty the queue.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let count = self.inner.producer_count.load(Ordering::Acquire);
        for ring in &self.inner.rings[..count] {
            ring.close();
        }
    }

    /// Returns true if the channel is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Returns the number of registered producers.
    pub fn producer_count(&self) -> usize {
        self.inner.producer_count.load(Ordering::Acquire)
    }

    /// Total items currently queued across all rings.
    pub fn len(&self) -> usize {
        let count = self.inner.producer_count.load(Ordering::Acquire);
        self.inner.rings[..count].iter().map(Ring::len).sum()
    }

    /// Returns true if no ring holds queued items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregated metrics snapshot across all rings, if enabled.
    pub fn metrics(&self) -> MetricsSnapshot {
        let mut m = MetricsSnapshot::default();
        let count = self.inner.producer_count.load(Ordering::Acquire);

        for ring in &self.inner.rings[..count] {
            let rm = ring.metrics();
            m.events_published += rm.events_published;
            m.events_consumed += rm.events_consumed;
            m.batches_consumed += rm.batches_consumed;
            m.full_rejections += rm.full_rejections;
        }

        m
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Producer handle for publishing into the channel.
///
/// Each producer owns a dedicated ring. `Producer` is intentionally not
/// `Clone`: two handles on the same ring would break the single-writer
/// invariant the lock-free protocol depends on.
pub struct Producer<T> {
    channel: Arc<ChannelInner<T>>,
    id: usize,
}

impl<T> Producer<T> {
    /// Get the producer's ID.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Publishes one item without blocking; gives it back when full/closed.
    #[inline]
    pub fn try_push(&self, item: T) -> Result<(), T> {
        self.channel.rings[self.id].try_push(item)
    }

    /// Publishes one item with adaptive backoff while the ring is full.
    #[inline]
    pub fn push_with_backoff(&self, item: T) -> Result<(), T> {
        self.channel.rings[self.id].push_with_backoff(item)
    }

    /// Returns true if the producer's ring is closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.channel.rings[self.id].is_closed()
    }
}

// Safety: handing the producer to another thread is fine as long as T is
// Send; the ring protocol handles the synchronization.
unsafe impl<T: Send> Send for Producer<T> {}
unsafe impl<T: Send> Sync for Producer<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_producer_consume_all() {
        let ch = Channel::<u64>::new(Config::default());

        let p1 = ch.register().unwrap();
        let p2 = ch.register().unwrap();

        for i in 0..3 {
            p1.try_push(i).unwrap();
            p2.try_push(100 + i).unwrap();
        }

        let mut sum = 0u64;
        let consumed = ch.consume_all(|item| sum += item);

        assert_eq!(consumed, 6);
        assert_eq!(sum, 306);
    }

    #[test]
    fn test_consume_up_to_prefers_earlier_rings() {
        let ch = Channel::<u64>::new(Config::default());

        let p1 = ch.register().unwrap();
        let p2 = ch.register().unwrap();

        for i in 0..3 {
            p1.try_push(i).unwrap();
            p2.try_push(10 + i).unwrap();
        }

        let mut seen = Vec::new();
        let consumed = ch.consume_all_up_to(4, |item| seen.push(item));

        assert_eq!(consumed, 4);
        assert_eq!(seen, vec![0, 1, 2, 10]);
        assert_eq!(ch.len(), 2);
    }

    #[test]
    fn test_per_producer_fifo() {
        let ch = Channel::<u64>::new(Config::default());
        let p = ch.register().unwrap();

        for i in 0..100 {
            p.try_push(i).unwrap();
        }

        let mut seen = Vec::new();
        ch.consume_all(|item| seen.push(item));
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_too_many_producers() {
        let config = Config::new(4, 2, false); // max 2 producers
        let ch = Channel::<u64>::new(config);

        let _p1 = ch.register().unwrap();
        let _p2 = ch.register().unwrap();

        assert!(matches!(
            ch.register(),
            Err(RegisterError::TooManyProducers { max: 2 })
        ));
    }

    #[test]
    fn test_closed_channel() {
        let ch = Channel::<u64>::new(Config::default());
        let p = ch.register().unwrap();
        p.try_push(7).unwrap();

        ch.close();
        assert!(matches!(ch.register(), Err(RegisterError::Closed)));
        assert_eq!(p.try_push(8), Err(8));

        // Pre-close items survive for the final drain.
        let mut seen = Vec::new();
        ch.consume_all(|item| seen.push(item));
        assert_eq!(seen, vec![7]);
    }

    #[test]
    fn test_concurrent_producers_no_loss() {
        use std::thread;

        let ch = Channel::<(usize, u64)>::new(Config::new(10, 4, false));
        let done = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::new();
        for producer_id in 0..4 {
            let p = ch.register().unwrap();
            handles.push(thread::spawn(move || {
                for seq in 0..10_000u64 {
                    let mut item = (producer_id, seq);
                    loop {
                        match p.push_with_backoff(item) {
                            Ok(()) => break,
                            Err(back) => item = back, // full: keep trying
                        }
                    }
                }
            }));
        }

        let consumer_ch = ch.clone();
        let consumer_done = Arc::clone(&done);
        let consumer = thread::spawn(move || {
            let mut last_seq = [None::<u64>; 4];
            let mut total = 0usize;
            loop {
                total += consumer_ch.consume_all(|(id, seq)| {
                    if let Some(prev) = last_seq[id] {
                        assert!(seq > prev, "producer {id} out of order: {seq} after {prev}");
                    }
                    last_seq[id] = Some(seq);
                });
                if consumer_done.load(Ordering::Acquire) && consumer_ch.is_empty() {
                    // One final sweep after producers finished.
                    total += consumer_ch.consume_all(|_| {});
                    break;
                }
                thread::yield_now();
            }
            total
        });

        for h in handles {
            h.join().unwrap();
        }
        done.store(true, Ordering::Release);

        let total = consumer.join().unwrap();
        assert_eq!(total, 40_000);
    }
}
