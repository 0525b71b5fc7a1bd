//! Debug assertion macros for ring buffer invariants.
//!
//! Active only in debug builds, so there is zero overhead in release.

/// Assert that the item count never exceeds capacity.
///
/// Holds because a producer only advances `tail` after confirming space
/// against the consumer's `head`.
macro_rules! debug_assert_bounded_count {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity,
            "ring overfull: count {} exceeds capacity {}",
            $count,
            $capacity
        )
    };
}

/// Assert that a sequence number only increases.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "sequence regression: {} decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

/// Assert that a slot being read lies in the initialized `[head, tail)` range.
///
/// Reading outside that window would hand `assume_init_read` an
/// uninitialized or already-consumed slot.
macro_rules! debug_assert_initialized_read {
    ($pos:expr, $head:expr, $tail:expr) => {
        debug_assert!(
            $pos >= $head && $pos < $tail,
            "reading slot at seq {} outside initialized range [{}, {})",
            $pos,
            $head,
            $tail
        )
    };
}

/// Assert monotonic per-producer consumption counts (FIFO verification).
macro_rules! debug_assert_fifo_count {
    ($producer_id:expr, $old_count:expr, $new_count:expr) => {
        debug_assert!(
            $new_count >= $old_count,
            "producer {} consumption count went from {} to {}",
            $producer_id,
            $old_count,
            $new_count
        )
    };
}

pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_fifo_count;
pub(crate) use debug_assert_initialized_read;
pub(crate) use debug_assert_monotonic;
