//! End-to-end pipeline demo.
//!
//! Spawns a handful of worker threads that generate sampled spans, runs
//! them through the batching processor and a retrying stdout transport,
//! then flushes, shuts down, and prints the counters.
//!
//! Run with: `cargo run --bin demo -p trace-pipeline`

use std::sync::Arc;
use std::time::Duration;
use trace_pipeline::{
    AtomicMetrics, ParentBasedSampler, PipelineBuilder, PipelineConfig, PipelineMetrics,
    RetryPolicy, RetryingTransport, Sampler, SamplingParams, SpanId, SpanKind, SpanRecord,
    SpanStatus, StdoutSender, TraceId, TraceIdRatioSampler,
};

const WORKERS: usize = 4;
const SPANS_PER_WORKER: usize = 1000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let sampler: Arc<dyn Sampler> =
        Arc::new(ParentBasedSampler::new(Arc::new(TraceIdRatioSampler::new(
            0.25,
        ))));

    let transport = RetryingTransport::new(
        StdoutSender::new(false),
        RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            max_attempts: 4,
        },
    );

    let metrics = Arc::new(AtomicMetrics::new());
    let processor = PipelineBuilder::new()
        .config(PipelineConfig {
            max_queue_size: 2048,
            max_export_batch_size: 256,
            schedule_delay: Duration::from_millis(500),
            export_timeout: Duration::from_secs(10),
            block_on_full: true,
            max_producers: WORKERS,
        })
        .metrics(Arc::clone(&metrics) as Arc<dyn PipelineMetrics>)
        .build(transport);

    let workers: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let sender = processor.register()?;
            let sampler = Arc::clone(&sampler);
            Ok(std::thread::spawn(move || {
                for i in 0..SPANS_PER_WORKER {
                    let trace_id = TraceId::random();
                    let name = format!("worker-{worker}/request-{i}");
                    let params = SamplingParams {
                        parent: None,
                        trace_id,
                        name: &name,
                        kind: SpanKind::Server,
                        attributes: &[],
                        links: &[],
                    };
                    let decision = sampler.should_sample(&params).decision;

                    let mut span = SpanRecord::new(
                        trace_id,
                        SpanId::random(),
                        None,
                        name,
                        SpanKind::Server,
                    );
                    span.sampled = decision.is_sampled();
                    span.finish(SpanStatus::Ok);
                    sender.on_end(span);
                }
            }))
        })
        .collect::<Result<_, trace_pipeline::RegisterError>>()?;

    for worker in workers {
        worker.join().map_err(|_| "worker panicked")?;
    }

    processor.force_flush().wait().await?;
    processor.shutdown().wait().await?;

    println!("--- pipeline summary ---");
    println!("spans exported:   {}", metrics.spans_processed_total());
    println!("spans dropped:    {}", metrics.spans_dropped_total());
    println!("batches sent:     {}", metrics.exports_succeeded_total());
    println!("batches failed:   {}", metrics.exports_failed_total());
    println!("max queue depth:  {}", metrics.max_queue_depth_seen());
    Ok(())
}
