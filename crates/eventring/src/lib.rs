//! EventRing - a lock-free multi-producer single-consumer event queue.
//!
//! A ring-decomposed MPSC queue where every registered producer owns a
//! dedicated SPSC ring buffer, eliminating producer-producer contention.
//! A single consumer drains all rings in registration order, which keeps
//! per-producer FIFO while amortizing atomic operations across batches.
//!
//! Built as the queue substrate for an in-process telemetry pipeline:
//! payloads are moved out of their slot as they are consumed, so the queue
//! never retains a handled event.
//!
//! # Example
//!
//! ```
//! use eventring::{Channel, Config};
//!
//! let channel = Channel::<u64>::new(Config::default());
//! let producer = channel.register().unwrap();
//!
//! // Non-blocking publish; the item comes back on a full ring.
//! producer.try_push(42).unwrap();
//!
//! // Batch consume with a single head update.
//! let consumed = channel.consume_all(|item| {
//!     println!("received {item}");
//! });
//! assert_eq!(consumed, 1);
//! ```

mod channel;
mod config;
mod invariants;
mod metrics;
mod ring;

pub use channel::{Channel, Producer, RegisterError};
pub use crossbeam_utils::Backoff;
pub use config::{Config, LOW_LATENCY_CONFIG, SMALL_QUEUE_CONFIG};
pub use metrics::MetricsSnapshot;
pub use ring::Ring;
