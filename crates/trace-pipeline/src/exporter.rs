use crate::span::SpanBatch;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// gRPC status codes, as carried by export backends speaking OTLP/gRPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrpcCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

/// Error types for batch send operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// HTTP-level failure with a status code
    #[error("http error: status {status}")]
    Http { status: u16 },
    /// gRPC-level failure with a status code
    #[error("grpc error: {code:?}")]
    Grpc { code: GrpcCode },
    /// The send timed out; the message distinguishes connection timeouts
    /// from server-side processing timeouts
    #[error("timeout: {message}")]
    Timeout { message: String },
    /// Transport-layer error (network, TLS, DNS)
    #[error("transport error: {0}")]
    Transport(String),
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
    /// All retry attempts exhausted; carries the final attempt's error
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<SendError> },
}

impl SendError {
    /// Whether a retry of the same send could plausibly succeed.
    ///
    /// HTTP: only throttling and gateway-transient statuses. gRPC: the
    /// transient subset of the status code space. Timeouts: only when the
    /// message indicates the connection itself timed out; a server that
    /// accepted the request and then timed out may have partially applied
    /// it, so retrying risks duplication.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status } => matches!(status, 429 | 502 | 503 | 504),
            Self::Grpc { code } => matches!(
                code,
                GrpcCode::Cancelled
                    | GrpcCode::DeadlineExceeded
                    | GrpcCode::ResourceExhausted
                    | GrpcCode::Aborted
                    | GrpcCode::OutOfRange
                    | GrpcCode::Unavailable
                    | GrpcCode::DataLoss
            ),
            Self::Timeout { message } => message.contains("connect"),
            Self::Transport(_) | Self::Serialization(_) | Self::RetriesExhausted { .. } => false,
        }
    }
}

/// Trait for sending span batches to a backend.
///
/// Uses native async fn in traits instead of `#[async_trait]`.
///
/// # Note on Object Safety
///
/// The `impl Future` return type is not object-safe. For dynamic dispatch,
/// use `Box<dyn BatchSenderBoxed>`; the blanket impl below bridges any
/// `BatchSender` into it.
pub trait BatchSender: Send + Sync {
    /// Sends a batch of spans.
    fn send(&self, batch: SpanBatch) -> impl Future<Output = Result<(), SendError>> + Send;

    /// Returns the sender name for debugging.
    fn name(&self) -> &str;
}

/// Object-safe version of BatchSender for dynamic dispatch.
pub trait BatchSenderBoxed: Send + Sync {
    /// Sends a batch of spans (boxed future for object safety).
    fn send_boxed(
        &self,
        batch: SpanBatch,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), SendError>> + Send + '_>>;

    /// Returns the sender name for debugging.
    fn name(&self) -> &str;
}

/// Blanket implementation: any BatchSender can be used as BatchSenderBoxed
impl<T: BatchSender> BatchSenderBoxed for T {
    fn send_boxed(
        &self,
        batch: SpanBatch,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), SendError>> + Send + '_>> {
        Box::pin(self.send(batch))
    }

    fn name(&self) -> &str {
        BatchSender::name(self)
    }
}

/// Shared senders delegate to the inner value, so callers can keep an
/// `Arc` handle on a sender while the pipeline owns another.
impl<T: BatchSender> BatchSender for Arc<T> {
    fn send(&self, batch: SpanBatch) -> impl Future<Output = Result<(), SendError>> + Send {
        T::send(self, batch)
    }

    fn name(&self) -> &str {
        T::name(self)
    }
}

/// Stdout sender for testing and debugging
pub struct StdoutSender {
    verbose: bool,
}

impl StdoutSender {
    /// Creates a new stdout sender
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl BatchSender for StdoutSender {
    async fn send(&self, batch: SpanBatch) -> Result<(), SendError> {
        if self.verbose {
            println!("=== Sending {} spans ===", batch.spans.len());
            for span in &batch.spans {
                println!(
                    "Span: trace_id={} span_id={} name={} duration={}ns status={:?}",
                    span.trace_id,
                    span.span_id,
                    span.name,
                    span.duration_nanos(),
                    span.status
                );
            }
            println!("=== Send complete ===\n");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// JSON file sender for local development
pub struct JsonFileSender {
    file_path: String,
}

impl JsonFileSender {
    /// Creates a new JSON file sender
    pub fn new(file_path: String) -> Self {
        Self { file_path }
    }
}

impl BatchSender for JsonFileSender {
    async fn send(&self, batch: SpanBatch) -> Result<(), SendError> {
        let json = serde_json::to_string_pretty(&batch.spans)
            .map_err(|e| SendError::Serialization(e.to_string()))?;

        tokio::fs::write(&self.file_path, json)
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        Ok(())
    }

    fn name(&self) -> &str {
        "json_file"
    }
}

/// Null sender that discards all spans (for benchmarking)
pub struct NullSender;

impl NullSender {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullSender {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchSender for NullSender {
    async fn send(&self, _batch: SpanBatch) -> Result<(), SendError> {
        // Discard all spans
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{SpanId, SpanKind, SpanRecord, TraceId};

    fn record(name: &str) -> SpanRecord {
        SpanRecord::new(
            TraceId::random(),
            SpanId::random(),
            None,
            name.to_string(),
            SpanKind::Internal,
        )
    }

    #[test]
    fn test_http_retryability() {
        for status in [429u16, 502, 503, 504] {
            assert!(SendError::Http { status }.is_retryable(), "{status}");
        }
        for status in [400u16, 401, 403, 404, 500, 501] {
            assert!(!SendError::Http { status }.is_retryable(), "{status}");
        }
    }

    #[test]
    fn test_grpc_retryability() {
        assert!(SendError::Grpc {
            code: GrpcCode::Unavailable
        }
        .is_retryable());
        assert!(SendError::Grpc {
            code: GrpcCode::ResourceExhausted
        }
        .is_retryable());
        assert!(!SendError::Grpc {
            code: GrpcCode::InvalidArgument
        }
        .is_retryable());
        assert!(!SendError::Grpc {
            code: GrpcCode::Unauthenticated
        }
        .is_retryable());
    }

    #[test]
    fn test_timeout_retryability_depends_on_message() {
        assert!(SendError::Timeout {
            message: "connect timed out after 5s".to_string()
        }
        .is_retryable());
        assert!(!SendError::Timeout {
            message: "server processing deadline exceeded".to_string()
        }
        .is_retryable());
    }

    #[tokio::test]
    async fn test_stdout_sender() {
        let sender = StdoutSender::new(false);
        let mut batch = SpanBatch::new();
        batch.add(record("test"));

        assert!(sender.send(batch).await.is_ok());
    }

    #[tokio::test]
    async fn test_shared_sender_delegates_to_inner() {
        let sender = Arc::new(NullSender::new());
        let handle = Arc::clone(&sender);

        let mut batch = SpanBatch::new();
        batch.add(record("shared"));
        assert!(handle.send(batch).await.is_ok());
        assert_eq!(BatchSender::name(&handle), "null");
    }

    #[tokio::test]
    async fn test_null_sender() {
        let sender = NullSender::new();
        let mut batch = SpanBatch::new();
        for _ in 0..1000 {
            batch.add(record("test"));
        }

        assert!(sender.send(batch).await.is_ok());
    }
}
