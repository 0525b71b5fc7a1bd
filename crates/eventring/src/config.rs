/// Configuration for [`Ring`](crate::Ring) and [`Channel`](crate::Channel).
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Ring buffer size as a power of two (default: 11 = 2048 slots).
    pub ring_bits: u8,
    /// Maximum number of producers.
    pub max_producers: usize,
    /// Enable metrics collection (slight overhead).
    pub enable_metrics: bool,
}

impl Config {
    /// Creates a new configuration with custom settings.
    pub const fn new(ring_bits: u8, max_producers: usize, enable_metrics: bool) -> Self {
        Self {
            ring_bits,
            max_producers,
            enable_metrics,
        }
    }

    /// Creates a configuration whose capacity is the next power of two
    /// at or above `min_capacity`.
    pub fn with_capacity(min_capacity: usize, max_producers: usize) -> Self {
        let capacity = min_capacity.max(2).next_power_of_two();
        Self {
            ring_bits: capacity.trailing_zeros() as u8,
            max_producers,
            enable_metrics: false,
        }
    }

    /// Returns the capacity of each ring.
    #[inline]
    pub const fn capacity(&self) -> usize {
        1 << self.ring_bits
    }

    /// Returns the mask for index wrapping.
    #[inline]
    pub const fn mask(&self) -> usize {
        self.capacity() - 1
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ring_bits: 11, // 2048 slots
            max_producers: 16,
            enable_metrics: false,
        }
    }
}

/// Low latency configuration (4K slots per ring, fits in L1 cache).
pub const LOW_LATENCY_CONFIG: Config = Config::new(12, 16, false);

/// Small queue configuration for tests and bounded-memory deployments.
pub const SMALL_QUEUE_CONFIG: Config = Config::new(8, 8, true);
