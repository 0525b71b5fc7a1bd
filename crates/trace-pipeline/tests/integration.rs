//! End-to-end pipeline tests: concurrent producers, flush/shutdown
//! acknowledgement, ordering, and transport resilience.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use trace_pipeline::{
    BatchSender, BatchingProcessor, CompletionError, CompletionToken, PipelineConfig, RetryPolicy,
    RetryingTransport, SendError, SpanBatch, SpanId, SpanKind, SpanRecord, TraceId,
};

/// Records every exported span, in arrival order.
struct RecordingSender {
    spans: Mutex<Vec<SpanRecord>>,
}

impl RecordingSender {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            spans: Mutex::new(Vec::new()),
        })
    }

    fn exported(&self) -> Vec<SpanRecord> {
        self.spans.lock().unwrap().clone()
    }

    fn exported_count(&self) -> usize {
        self.spans.lock().unwrap().len()
    }
}

impl BatchSender for RecordingSender {
    async fn send(&self, batch: SpanBatch) -> Result<(), SendError> {
        self.spans.lock().unwrap().extend(batch.spans);
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Fails the first `fail_count` sends, then delivers.
struct FlakySender {
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
    delivered: Mutex<Vec<SpanRecord>>,
}

impl FlakySender {
    fn new(fail_count: u32) -> Arc<Self> {
        Arc::new(Self {
            failures_remaining: AtomicU32::new(fail_count),
            attempts: AtomicU32::new(0),
            delivered: Mutex::new(Vec::new()),
        })
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl BatchSender for FlakySender {
    async fn send(&self, batch: SpanBatch) -> Result<(), SendError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let remaining = self.failures_remaining.fetch_sub(1, Ordering::Relaxed);
        if remaining > 0 {
            return Err(SendError::Http { status: 503 });
        }
        self.delivered.lock().unwrap().extend(batch.spans);
        Ok(())
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// Sleeps before delivering, to simulate a slow backend.
struct SlowSender {
    delay: Duration,
    spans: Mutex<Vec<SpanRecord>>,
}

impl SlowSender {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            spans: Mutex::new(Vec::new()),
        })
    }
}

impl BatchSender for SlowSender {
    async fn send(&self, batch: SpanBatch) -> Result<(), SendError> {
        tokio::time::sleep(self.delay).await;
        self.spans.lock().unwrap().extend(batch.spans);
        Ok(())
    }

    fn name(&self) -> &str {
        "slow"
    }
}

fn span_named(name: String) -> SpanRecord {
    let mut span = SpanRecord::new(
        TraceId::random(),
        SpanId::random(),
        None,
        name,
        SpanKind::Internal,
    );
    span.sampled = true;
    span
}

fn config(block_on_full: bool) -> PipelineConfig {
    PipelineConfig {
        max_queue_size: 256,
        max_export_batch_size: 64,
        schedule_delay: Duration::from_millis(10),
        export_timeout: Duration::from_secs(5),
        block_on_full,
        max_producers: 8,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_exports_everything_published_before_it() {
    let recorder = RecordingSender::new();
    let processor = BatchingProcessor::new(Arc::clone(&recorder), config(true));

    let producers = 4;
    let per_producer = 2_000;
    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let sender = processor.register().unwrap();
            std::thread::spawn(move || {
                for i in 0..per_producer {
                    assert!(sender.on_end(span_named(format!("p{p}-{i}"))));
                }
            })
        })
        .collect();

    tokio::task::block_in_place(|| {
        for handle in handles {
            handle.join().unwrap();
        }
    });

    processor.shutdown().wait().await.unwrap();
    assert_eq!(recorder.exported_count(), producers * per_producer);
    assert_eq!(processor.dropped_spans(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_producer_order_is_preserved() {
    let recorder = RecordingSender::new();
    let processor = BatchingProcessor::new(Arc::clone(&recorder), config(true));

    let producers = 3;
    let per_producer = 1_000;
    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let sender = processor.register().unwrap();
            std::thread::spawn(move || {
                for i in 0..per_producer {
                    assert!(sender.on_end(span_named(format!("{p}:{i}"))));
                }
            })
        })
        .collect();

    tokio::task::block_in_place(|| {
        for handle in handles {
            handle.join().unwrap();
        }
    });

    processor.shutdown().wait().await.unwrap();

    // The export stream interleaves producers, but within one producer
    // the original publish order must survive batching.
    let mut next_expected = vec![0usize; producers];
    for span in recorder.exported() {
        let (p, i) = span.name.split_once(':').unwrap();
        let p: usize = p.parse().unwrap();
        let i: usize = i.parse().unwrap();
        assert_eq!(i, next_expected[p], "producer {p} reordered");
        next_expected[p] = i + 1;
    }
    assert!(next_expected.iter().all(|&n| n == per_producer));
}

#[tokio::test]
async fn flush_token_settles_with_export_outcome() {
    let flaky = FlakySender::new(2);
    let transport = RetryingTransport::new(
        Arc::clone(&flaky),
        RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            max_attempts: 4,
        },
    );
    let processor = BatchingProcessor::new(transport, config(false));
    let sender = processor.register().unwrap();

    for i in 0..10 {
        assert!(sender.on_end(span_named(format!("op-{i}"))));
    }

    // Two transient failures, then delivery: the flush still succeeds.
    processor.force_flush().wait().await.unwrap();
    assert_eq!(flaky.attempts(), 3);
    assert_eq!(flaky.delivered.lock().unwrap().len(), 10);

    processor.shutdown().wait().await.unwrap();
}

#[tokio::test]
async fn flush_token_fails_when_retries_are_exhausted() {
    let flaky = FlakySender::new(u32::MAX);
    let transport = RetryingTransport::new(
        Arc::clone(&flaky),
        RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            max_attempts: 3,
        },
    );
    let processor = BatchingProcessor::new(transport, config(false));
    let sender = processor.register().unwrap();
    assert!(sender.on_end(span_named("doomed".to_string())));

    let err = processor.force_flush().wait().await.unwrap_err();
    assert!(
        err.message.contains("retries exhausted"),
        "unexpected error: {err}"
    );
    assert_eq!(flaky.attempts(), 3);

    let _ = processor.shutdown().wait().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wait_timeout_leaves_pending_token_intact() {
    let slow = SlowSender::new(Duration::from_millis(200));
    let processor = BatchingProcessor::new(Arc::clone(&slow), config(false));
    let sender = processor.register().unwrap();
    assert!(sender.on_end(span_named("slow-road".to_string())));

    let token = processor.force_flush();
    // The backend needs 200ms; a 10ms wait must report "unknown", not failure.
    assert!(token.wait_timeout(Duration::from_millis(10)).await.is_none());
    assert!(!token.is_settled());

    token.wait().await.unwrap();
    assert_eq!(slow.spans.lock().unwrap().len(), 1);

    processor.shutdown().wait().await.unwrap();
}

#[test]
fn completion_token_settles_exactly_once_under_races() {
    for _ in 0..100 {
        let token = CompletionToken::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let token = token.clone();
                std::thread::spawn(move || {
                    if i % 2 == 0 {
                        token.succeed()
                    } else {
                        token.fail(CompletionError::new(format!("loser-{i}")))
                    }
                })
            })
            .collect();
        let winners: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(winners.iter().filter(|&&won| won).count(), 1);
        assert!(token.is_settled());
    }
}

#[tokio::test]
async fn join_all_aggregates_flush_and_shutdown() {
    let recorder = RecordingSender::new();
    let processor = BatchingProcessor::new(Arc::clone(&recorder), config(false));
    let sender = processor.register().unwrap();
    for i in 0..5 {
        assert!(sender.on_end(span_named(format!("op-{i}"))));
    }

    let joined = CompletionToken::join_all([processor.force_flush(), processor.shutdown()]);
    joined.wait().await.unwrap();
    assert_eq!(recorder.exported_count(), 5);
}
