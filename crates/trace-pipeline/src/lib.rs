//! In-process telemetry data plane: sampling, batching, and resilient
//! export of trace spans.
//!
//! # Architecture
//!
//! ```text
//! app threads                 consumer task               backend
//! ┌───────────┐   ring per   ┌──────────────┐   retry   ┌─────────┐
//! │ SpanSender│─ producer ──►│ Batching     │─ backoff ─►│ Batch   │
//! │ + Sampler │   (MPSC)     │ Processor    │  + jitter │ Sender  │
//! └───────────┘              └──────────────┘           └─────────┘
//! ```
//!
//! - [`sampler`]: head-sampling decisions (constant, trace-id ratio,
//!   rate-limited, per-operation, parent-based).
//! - [`processor`]: the asynchronous batching pipeline over a
//!   ring-per-producer channel; flush and shutdown ride the event stream
//!   and settle [`CompletionToken`]s.
//! - [`transport`]: retry with jittered exponential backoff around any
//!   [`BatchSender`].
//! - [`exporter`]: the send seam plus stdout / JSON-file / null senders.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use trace_pipeline::{BatchingProcessor, PipelineConfig, RetryingTransport, StdoutSender};
//!
//! let transport = RetryingTransport::with_defaults(StdoutSender::new(true));
//! let processor = BatchingProcessor::new(transport, PipelineConfig::default());
//! let sender = processor.register()?;
//!
//! sender.on_end(span);                       // hot path, never blocks on I/O
//! processor.force_flush().wait().await?;     // settles after export
//! processor.shutdown().wait().await?;
//! ```

pub mod completion;
pub mod exporter;
pub mod metrics;
pub mod processor;
pub mod sampler;
pub mod span;
pub mod transport;

pub use completion::{CompletionError, CompletionToken, TokenState};
pub use exporter::{
    BatchSender, BatchSenderBoxed, GrpcCode, JsonFileSender, NullSender, SendError, StdoutSender,
};
pub use metrics::{AtomicMetrics, NoopMetrics, PipelineMetrics};
pub use processor::{
    BatchingProcessor, NoopStartHook, PipelineBuilder, PipelineConfig, PipelineState,
    RegisterError, SpanSender, StartHook, TelemetryEvent,
};
pub use sampler::{
    AlwaysOffSampler, AlwaysOnSampler, CreditBucket, ParentBasedSampler, ParentContext,
    PerOperationSampler, RateLimitingSampler, Sampler, SamplingDecision, SamplingParams,
    SamplingResult, TraceIdRatioSampler,
};
pub use span::{AttributeValue, SpanBatch, SpanId, SpanKind, SpanRecord, SpanStatus, TraceId};
pub use transport::{RetryPolicy, RetryingTransport, Sleeper, TokioSleeper};
