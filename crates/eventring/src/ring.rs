use crate::invariants::{
    debug_assert_bounded_count, debug_assert_initialized_read, debug_assert_monotonic,
};
use crate::metrics::Metrics;
use crate::{Backoff, Config, MetricsSnapshot};
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

// Synchronization protocol
// ------------------------
//
// This is a classic SPSC ring with unbounded u64 sequence numbers for
// `head` and `tail` (slot index = sequence & mask). Unbounded sequences
// sidestep the ABA problem outright: at telemetry rates a u64 takes
// decades to wrap.
//
// Producer publish: load own `tail` Relaxed, check space against a cached
// copy of `head` (refreshed with an Acquire load only when the cache says
// full), write the slot, then store `tail` Release to publish the write.
//
// Consumer drain: load own `head` Relaxed, load `tail` Acquire (pairs with
// the producer's Release), move items out of `[head, tail)`, then store
// `head` Release so the producer can reuse the slots.
//
// The cached counterparts (`cached_head`, `cached_tail`) live in
// UnsafeCell without atomics because each has exactly one writer: the
// producer owns `cached_head`, the consumer owns `cached_tail`. Slots are
// written only by the producer between claim and publish, and read only by
// the consumer between the Acquire on `tail` and the Release on `head` —
// single writer per slot, single reader, no per-event locks.

/// SPSC ring buffer - the building block behind [`Channel`](crate::Channel).
///
/// Fixed capacity (power of two), pre-allocated slots, no allocation per
/// event. Consumption moves the payload out of its slot, so a handled
/// event is never retained by the queue.
#[repr(C)]
pub struct Ring<T> {
    // Producer hot fields
    /// Tail sequence (written by producer, read by consumer).
    tail: CachePadded<AtomicU64>,
    /// Producer's cached view of head (avoids cross-core reads).
    cached_head: CachePadded<UnsafeCell<u64>>,

    // Consumer hot fields
    /// Head sequence (written by consumer, read by producer).
    head: CachePadded<AtomicU64>,
    /// Consumer's cached view of tail.
    cached_tail: CachePadded<UnsafeCell<u64>>,

    // Cold state
    closed: AtomicBool,
    metrics: Metrics,
    config: Config,

    /// Fixed-size slot storage. `Box<[T]>` rather than `Vec<T>`: the size
    /// never changes after construction.
    buffer: UnsafeCell<Box<[MaybeUninit<T>]>>,
}

// Safety: the atomic head/tail protocol above synchronizes all slot access.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    /// Creates a new ring buffer with the given configuration.
    pub fn new(config: Config) -> Self {
        let capacity = config.capacity();
        let mut buffer = Vec::with_capacity(capacity);
        buffer.resize_with(capacity, MaybeUninit::uninit);

        Self {
            tail: CachePadded::new(AtomicU64::new(0)),
            cached_head: CachePadded::new(UnsafeCell::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
            cached_tail: CachePadded::new(UnsafeCell::new(0)),
            closed: AtomicBool::new(false),
            metrics: Metrics::new(),
            config,
            buffer: UnsafeCell::new(buffer.into_boxed_slice()),
        }
    }

    /// Returns the ring buffer capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    #[inline]
    fn mask(&self) -> usize {
        self.config.mask()
    }

    /// Returns the current number of items in the ring.
    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head) as usize
    }

    /// Returns true if the ring is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Relaxed) == self.head.load(Ordering::Relaxed)
    }

    /// Returns true if the ring is full.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Returns true if the ring is closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Publishes one item without blocking.
    ///
    /// Returns the item back if the ring is full or closed, so the caller
    /// decides whether to drop it (best-effort policy) or retry with
    /// backoff (blocking policy).
    ///
    /// Fast path checks the cached head to avoid cross-core reads; the
    /// cache is refreshed only when it claims the ring is full.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        if self.is_closed() {
            return Err(item);
        }

        let tail = self.tail.load(Ordering::Relaxed);

        // SAFETY: cached_head is only ever written by the producer (this
        // code path); the unsynchronized read is single-writer.
        let cached_head = unsafe { *self.cached_head.get() };
        let mut space = self
            .capacity()
            .saturating_sub(tail.wrapping_sub(cached_head) as usize);

        if space == 0 {
            // Slow path: refresh the cache from the consumer's head.
            let head = self.head.load(Ordering::Acquire);
            // SAFETY: single-writer as above; the Acquire load pairs with
            // the consumer's Release store.
            unsafe {
                *self.cached_head.get() = head;
            }
            space = self
                .capacity()
                .saturating_sub(tail.wrapping_sub(head) as usize);
            if space == 0 {
                if self.config.enable_metrics {
                    self.metrics.add_full_rejection();
                }
                return Err(item);
            }
        }

        let idx = (tail as usize) & self.mask();
        // SAFETY: idx is masked into bounds; the slot at `tail` is outside
        // the consumer's `[head, tail)` window, so only this producer
        // touches it until the Release store below publishes it.
        unsafe {
            let buffer = &mut *self.buffer.get();
            buffer[idx].write(item);
        }

        let new_tail = tail.wrapping_add(1);
        debug_assert_monotonic!("tail", tail, new_tail);
        debug_assert_bounded_count!(
            new_tail.wrapping_sub(self.head.load(Ordering::Relaxed)) as usize,
            self.capacity()
        );
        self.tail.store(new_tail, Ordering::Release);

        if self.config.enable_metrics {
            self.metrics.add_published(1);
        }
        Ok(())
    }

    /// Publishes one item, spinning then yielding while the ring is full.
    ///
    /// Gives the item back once the backoff budget is exhausted or the
    /// ring closes; callers wanting a hard no-loss guarantee loop around
    /// this with their own wait (see the pipeline's blocking publish).
    pub fn push_with_backoff(&self, item: T) -> Result<(), T> {
        let backoff = Backoff::new();
        let mut item = item;
        loop {
            match self.try_push(item) {
                Ok(()) => return Ok(()),
                Err(back) => {
                    if self.is_closed() || backoff.is_completed() {
                        return Err(back);
                    }
                    item = back;
                    backoff.snooze();
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // CONSUMER API
    // ---------------------------------------------------------------------

    /// Drains all available items, transferring ownership to the handler.
    ///
    /// The whole batch is processed with a single head update at the end —
    /// one atomic store amortized over N items. Items are moved out of
    /// their slots (`assume_init_read`), which both runs their `Drop` via
    /// the handler and leaves the slot payload-free for reuse.
    pub fn consume_batch<F>(&self, handler: F) -> usize
    where
        F: FnMut(T),
    {
        self.consume_up_to(usize::MAX, handler)
    }

    /// Drains up to `max_items`, transferring ownership to the handler.
    ///
    /// Bounding the batch keeps the consumer loop from stalling on a
    /// deeply backlogged ring.
    pub fn consume_up_to<F>(&self, max_items: usize, mut handler: F) -> usize
    where
        F: FnMut(T),
    {
        if max_items == 0 {
            return 0;
        }

        let head = self.head.load(Ordering::Relaxed);

        // Fast path checks the cached tail to avoid cross-core reads; the
        // cache is refreshed only when it claims the ring is empty.
        // SAFETY: cached_tail is only ever written by the consumer (this
        // code path); the unsynchronized read is single-writer.
        let mut tail = unsafe { *self.cached_tail.get() };
        let mut avail = tail.wrapping_sub(head) as usize;

        if avail == 0 {
            // Slow path: refresh the cache from the producer's tail.
            tail = self.tail.load(Ordering::Acquire);
            // SAFETY: single-writer as above; the Acquire load pairs with
            // the producer's Release store.
            unsafe {
                *self.cached_tail.get() = tail;
            }
            avail = tail.wrapping_sub(head) as usize;
            if avail == 0 {
                return 0;
            }
        }

        let to_consume = avail.min(max_items);
        let mask = self.mask();
        let mut pos = head;
        let mut count = 0;

        // No atomics inside the loop.
        while count < to_consume {
            debug_assert_initialized_read!(pos, head, tail);

            let idx = (pos as usize) & mask;
            // SAFETY: slots in [head, tail) were fully written by the
            // producer and published by its Release store on `tail`, which
            // the Acquire load above synchronizes with. Ownership moves to
            // the handler; the slot is logically empty afterwards and the
            // producer may reuse it once `head` advances.
            let item = unsafe {
                let buffer = &*self.buffer.get();
                buffer[idx].assume_init_read()
            };
            handler(item);
            pos = pos.wrapping_add(1);
            count += 1;
        }

        let new_head = head.wrapping_add(count as u64);
        debug_assert_monotonic!("head", head, new_head);
        self.head.store(new_head, Ordering::Release);

        if self.config.enable_metrics {
            self.metrics.add_consumed(count as u64);
        }

        count
    }

    // ---------------------------------------------------------------------
    // LIFECYCLE
    // ---------------------------------------------------------------------

    /// Closes the ring: publishes fail from here on, drains still work.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Get a snapshot of metrics if enabled.
    pub fn metrics(&self) -> MetricsSnapshot {
        if self.config.enable_metrics {
            self.metrics.snapshot()
        } else {
            MetricsSnapshot::default()
        }
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        // Drop any items that were published but never consumed.
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        let count = tail.wrapping_sub(head) as usize;

        if count > 0 {
            let mask = self.mask();
            let buffer = self.buffer.get_mut();
            for i in 0..count {
                let idx = ((head as usize).wrapping_add(i)) & mask;
                unsafe {
                    ptr::drop_in_place(buffer[idx].as_mut_ptr());
                }
            }
        }
    }
}
