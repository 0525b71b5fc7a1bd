use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

/// 128-bit trace identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(pub [u8; 16]);

impl TraceId {
    /// The invalid (all-zero) trace id.
    pub const INVALID: TraceId = TraceId([0; 16]);

    /// Generates a random, non-zero trace id.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        let mut rng = rand::thread_rng();
        while bytes == [0u8; 16] {
            rng.fill(&mut bytes);
        }
        Self(bytes)
    }

    /// Returns true if this is not the all-zero id.
    pub fn is_valid(&self) -> bool {
        self.0 != [0; 16]
    }

    /// Integer used for ratio-based sampling comparisons.
    ///
    /// The first 8 bytes interpreted big-endian as u64 with the sign bit
    /// masked off, i.e. a value in `[0, 2^63)` that is uniformly
    /// distributed for well-formed random trace ids and identical in
    /// every process observing the same trace.
    pub fn ratio_order_value(&self) -> i64 {
        let mut first8 = [0u8; 8];
        first8.copy_from_slice(&self.0[..8]);
        (u64::from_be_bytes(first8) & (i64::MAX as u64)) as i64
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// 64-bit span identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanId(pub [u8; 8]);

impl SpanId {
    /// Generates a random, non-zero span id.
    pub fn random() -> Self {
        let mut bytes = [0u8; 8];
        let mut rng = rand::thread_rng();
        while bytes == [0u8; 8] {
            rng.fill(&mut bytes);
        }
        Self(bytes)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Attribute value types for span metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<String>),
}

/// Span execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanStatus {
    /// Span completed successfully.
    Ok,
    /// Span completed with error.
    Error,
    /// Span status unknown.
    Unset,
}

/// Span kind, following the OpenTelemetry convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanKind {
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

/// A single ended (or in-flight) traced operation.
///
/// The pipeline treats the record as opaque beyond its identity and the
/// `sampled` flag; once ended it is immutable and handed over exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    /// Parent span, absent for root spans.
    pub parent_span_id: Option<SpanId>,
    /// Operation name.
    pub name: String,
    pub kind: SpanKind,
    /// Span start time (Unix nanoseconds).
    pub start_time: u64,
    /// Span end time (Unix nanoseconds).
    pub end_time: u64,
    /// Span attributes (boxed to keep the record size manageable).
    pub attributes: Box<HashMap<String, AttributeValue>>,
    pub status: SpanStatus,
    /// Sampling flag inherited from the span's `SamplingResult`.
    pub sampled: bool,
}

impl SpanRecord {
    /// Creates a new span record starting now.
    pub fn new(
        trace_id: TraceId,
        span_id: SpanId,
        parent_span_id: Option<SpanId>,
        name: String,
        kind: SpanKind,
    ) -> Self {
        let now = unix_nanos();
        Self {
            trace_id,
            span_id,
            parent_span_id,
            name,
            kind,
            start_time: now,
            end_time: now,
            attributes: Box::new(HashMap::new()),
            status: SpanStatus::Unset,
            sampled: true,
        }
    }

    /// Marks the span as completed with the given status.
    pub fn finish(&mut self, status: SpanStatus) {
        self.end_time = unix_nanos();
        self.status = status;
    }

    /// Adds an attribute to the span.
    pub fn set_attribute(&mut self, key: String, value: AttributeValue) {
        self.attributes.insert(key, value);
    }

    /// Duration of the span in nanoseconds.
    pub fn duration_nanos(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }
}

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as u64)
}

/// An ordered, bounded batch of ended spans.
///
/// Formed by the consumer task; immutable once handed to the transport
/// (it is moved, never shared).
#[derive(Debug, Clone)]
pub struct SpanBatch {
    /// All spans in this batch, in consumption order.
    pub spans: Vec<SpanRecord>,
    /// Batch creation timestamp.
    pub timestamp: SystemTime,
}

impl SpanBatch {
    /// Creates a new empty batch.
    pub fn new() -> Self {
        Self {
            spans: Vec::new(),
            timestamp: SystemTime::now(),
        }
    }

    /// Creates a batch with the given spans.
    pub fn with_spans(spans: Vec<SpanRecord>) -> Self {
        Self {
            spans,
            timestamp: SystemTime::now(),
        }
    }

    /// Adds a span to the batch.
    pub fn add(&mut self, span: SpanRecord) {
        self.spans.push(span);
    }

    /// Returns the number of spans in the batch.
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Returns true if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

impl Default for SpanBatch {
    fn default() -> Self {
        Self::new()
    }
}
