//! Asynchronous batching processor.
//!
//! Producers publish [`TelemetryEvent`]s into a ring-per-producer channel;
//! a single consumer task drains the rings, forms export batches, and
//! drives the sender. Flush and shutdown ride the same event stream as
//! span events, so a control token settles only after every event
//! published before it has been handled.
//!
//! Exactly one batch is in flight at a time: exports are awaited inline on
//! the consumer task, so batches reach the backend in formation order and
//! a slow backend applies backpressure through queue occupancy instead of
//! unbounded task fan-out.

use crate::completion::{CompletionError, CompletionToken};
use crate::exporter::{BatchSender, BatchSenderBoxed, SendError};
use crate::metrics::{NoopMetrics, PipelineMetrics};
use crate::sampler::ParentContext;
use crate::span::{SpanBatch, SpanRecord};
use eventring::{Backoff, Channel, Config as RingConfig, Producer};
pub use eventring::RegisterError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Events flowing through the pipeline.
///
/// Control events (`Flush`, `Shutdown`) share the queue with span events
/// rather than a side channel, which gives them a defined position in the
/// stream: everything published before them is handled first.
pub enum TelemetryEvent {
    /// A span began; carries a snapshot of its parent's identity.
    Start {
        span: SpanRecord,
        parent: Option<ParentContext>,
    },
    /// A span ended and is ready for export.
    End(SpanRecord),
    /// Drain and export everything published so far, then settle the token.
    Flush(CompletionToken),
    /// Like `Flush`, then stop the consumer permanently.
    Shutdown(CompletionToken),
}

/// Configuration for the batching pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Queue capacity per producer, rounded up to the next power of two.
    pub max_queue_size: usize,
    /// Maximum spans per export batch.
    pub max_export_batch_size: usize,
    /// How often the consumer flushes a partial batch.
    pub schedule_delay: Duration,
    /// Upper bound on a single export call, including transport retries.
    pub export_timeout: Duration,
    /// When the queue is full: `true` = producers spin until space frees
    /// up, `false` = drop the span and count it.
    pub block_on_full: bool,
    /// Maximum registered producers (the pipeline reserves one extra slot
    /// internally for control events).
    pub max_producers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_export_batch_size: 512,
            schedule_delay: Duration::from_secs(5),
            export_timeout: Duration::from_secs(30),
            block_on_full: false,
            max_producers: 16,
        }
    }
}

/// Pipeline lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    ShuttingDown,
    ShutDown,
}

const STATE_RUNNING: u8 = 0;
const STATE_SHUTTING_DOWN: u8 = 1;
const STATE_SHUT_DOWN: u8 = 2;

/// Hook invoked on the consumer task when a span-start event is drained.
pub trait StartHook: Send + Sync {
    fn on_start(&self, span: &SpanRecord, parent: Option<&ParentContext>);
}

/// Default hook that ignores start events.
#[derive(Debug, Default)]
pub struct NoopStartHook;

impl StartHook for NoopStartHook {
    fn on_start(&self, _span: &SpanRecord, _parent: Option<&ParentContext>) {}
}

struct Shared {
    channel: Channel<TelemetryEvent>,
    state: AtomicU8,
    /// Wakes the consumer ahead of its next scheduled tick.
    wake: Notify,
    config: PipelineConfig,
    metrics: Arc<dyn PipelineMetrics>,
    dropped_spans: AtomicU64,
}

impl Shared {
    fn state(&self) -> PipelineState {
        match self.state.load(Ordering::Acquire) {
            STATE_RUNNING => PipelineState::Running,
            STATE_SHUTTING_DOWN => PipelineState::ShuttingDown,
            _ => PipelineState::ShutDown,
        }
    }

    /// Running -> ShuttingDown. Fails if already past Running.
    fn begin_shutdown(&self) -> bool {
        self.state
            .compare_exchange(
                STATE_RUNNING,
                STATE_SHUTTING_DOWN,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn record_dropped(&self, count: u64) {
        self.dropped_spans.fetch_add(count, Ordering::Relaxed);
        self.metrics.spans_dropped(count);
    }
}

// =============================================================================
// PRODUCER HANDLE
// =============================================================================

/// Producer-side handle for publishing span events.
///
/// Each handle owns one ring; like the underlying producer it assumes a
/// single logical writer at a time. Create one handle per worker thread.
pub struct SpanSender {
    producer: Producer<TelemetryEvent>,
    shared: Arc<Shared>,
}

impl SpanSender {
    /// Publish a span-start event. Best-effort: start events feed the
    /// optional [`StartHook`] and are silently dropped when the queue is
    /// full or the pipeline has stopped.
    pub fn on_start(&self, span: &SpanRecord, parent: Option<ParentContext>) {
        let _ = self.publish(TelemetryEvent::Start {
            span: span.clone(),
            parent,
        });
    }

    /// Publish a span-end event for export.
    ///
    /// Unsampled spans are discarded here, before touching the queue.
    /// Returns `false` if the span was dropped (queue full with the
    /// dropping policy, or pipeline stopped).
    pub fn on_end(&self, span: SpanRecord) -> bool {
        if !span.sampled {
            return true;
        }
        let accepted = self.publish(TelemetryEvent::End(span));
        if !accepted {
            self.shared.record_dropped(1);
        }
        accepted
    }

    fn publish(&self, event: TelemetryEvent) -> bool {
        // Benign race: a publish that slips past this check during shutdown
        // lands in a ring that the final drain still empties.
        if self.shared.state() != PipelineState::Running {
            return false;
        }

        let mut event = event;
        if self.shared.config.block_on_full {
            let backoff = Backoff::new();
            loop {
                match self.producer.try_push(event) {
                    Ok(()) => break,
                    Err(returned) => {
                        if self.producer.is_closed()
                            || self.shared.state() != PipelineState::Running
                        {
                            return false;
                        }
                        event = returned;
                        // Kick the consumer so space frees up sooner.
                        self.shared.wake.notify_one();
                        backoff.snooze();
                    }
                }
            }
        } else if self.producer.try_push(event).is_err() {
            return false;
        }

        if self.shared.channel.len() >= self.shared.config.max_export_batch_size {
            self.shared.wake.notify_one();
        }
        true
    }

    /// Ring index backing this handle.
    pub fn id(&self) -> usize {
        self.producer.id()
    }
}

// =============================================================================
// PROCESSOR
// =============================================================================

/// Builder for [`BatchingProcessor`].
pub struct PipelineBuilder {
    config: PipelineConfig,
    metrics: Arc<dyn PipelineMetrics>,
    hook: Arc<dyn StartHook>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            metrics: Arc::new(NoopMetrics),
            hook: Arc::new(NoopStartHook),
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn start_hook(mut self, hook: Arc<dyn StartHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Build the processor and spawn its consumer task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build<S>(self, sender: S) -> BatchingProcessor
    where
        S: BatchSender + 'static,
    {
        let ring_config = RingConfig::with_capacity(
            self.config.max_queue_size,
            // One extra ring for flush/shutdown control events.
            self.config.max_producers + 1,
        );
        let channel = Channel::new(ring_config);
        let control = channel
            .register()
            .unwrap_or_else(|_| unreachable!("fresh channel always has the control slot"));

        let shared = Arc::new(Shared {
            channel,
            state: AtomicU8::new(STATE_RUNNING),
            wake: Notify::new(),
            config: self.config,
            metrics: self.metrics,
            dropped_spans: AtomicU64::new(0),
        });

        let sender: Arc<dyn BatchSenderBoxed> = Arc::new(sender);
        let task = tokio::spawn(run_consumer(
            Arc::clone(&shared),
            Arc::clone(&sender),
            self.hook,
        ));

        BatchingProcessor {
            shared,
            control: Mutex::new(control),
            task,
        }
    }
}

/// The batching span processor.
///
/// Owns the consumer task for its lifetime; dropping the processor without
/// calling [`shutdown`](Self::shutdown) triggers a best-effort shutdown.
pub struct BatchingProcessor {
    shared: Arc<Shared>,
    control: Mutex<Producer<TelemetryEvent>>,
    task: JoinHandle<()>,
}

impl BatchingProcessor {
    /// Create a processor with the given sender and config.
    pub fn new<S>(sender: S, config: PipelineConfig) -> Self
    where
        S: BatchSender + 'static,
    {
        PipelineBuilder::new().config(config).build(sender)
    }

    /// Create a processor with default configuration.
    pub fn with_defaults<S>(sender: S) -> Self
    where
        S: BatchSender + 'static,
    {
        PipelineBuilder::new().build(sender)
    }

    /// Register a producer handle.
    pub fn register(&self) -> Result<SpanSender, RegisterError> {
        let producer = self.shared.channel.register()?;
        Ok(SpanSender {
            producer,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    /// Spans dropped so far (queue full or pipeline stopped).
    pub fn dropped_spans(&self) -> u64 {
        self.shared.dropped_spans.load(Ordering::Relaxed)
    }

    /// Request a flush of everything published so far.
    ///
    /// The returned token settles once the drained spans have been
    /// exported: succeeded on delivery, failed with the export error
    /// otherwise. A flush on a stopped pipeline fails immediately.
    pub fn force_flush(&self) -> CompletionToken {
        if self.shared.state() != PipelineState::Running {
            return CompletionToken::failed(CompletionError::new(
                "cannot flush: pipeline is shut down",
            ));
        }
        let token = CompletionToken::new();
        if !self.publish_control(TelemetryEvent::Flush(token.clone()), true) {
            token.fail(CompletionError::new("cannot flush: pipeline is shut down"));
        }
        token
    }

    /// Request shutdown: drain, export the remainder, stop the consumer.
    ///
    /// Idempotent; calls after the first return an already-succeeded
    /// token. After shutdown all publishes are rejected.
    pub fn shutdown(&self) -> CompletionToken {
        if !self.shared.begin_shutdown() {
            return CompletionToken::succeeded();
        }
        let token = CompletionToken::new();
        if !self.publish_control(TelemetryEvent::Shutdown(token.clone()), true) {
            token.fail(CompletionError::new("consumer already stopped"));
        }
        token
    }

    fn publish_control(&self, event: TelemetryEvent, block: bool) -> bool {
        let control = match self.control.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut event = event;
        let backoff = Backoff::new();
        loop {
            match control.try_push(event) {
                Ok(()) => {
                    self.shared.wake.notify_one();
                    return true;
                }
                Err(returned) => {
                    if control.is_closed() || !block {
                        return false;
                    }
                    event = returned;
                    self.shared.wake.notify_one();
                    backoff.snooze();
                }
            }
        }
    }
}

impl Drop for BatchingProcessor {
    fn drop(&mut self) {
        if self.shared.begin_shutdown() {
            // Non-blocking: the runtime may already be gone.
            let pushed =
                self.publish_control(TelemetryEvent::Shutdown(CompletionToken::new()), false);
            if !pushed {
                self.task.abort();
            }
        }
    }
}

// =============================================================================
// CONSUMER
// =============================================================================

enum ControlEvent {
    Flush(CompletionToken),
    Shutdown(CompletionToken),
}

async fn run_consumer(
    shared: Arc<Shared>,
    sender: Arc<dyn BatchSenderBoxed>,
    hook: Arc<dyn StartHook>,
) {
    let mut interval = tokio::time::interval(shared.config.schedule_delay);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut batch: Vec<SpanRecord> = Vec::with_capacity(shared.config.max_export_batch_size);
    let mut controls: VecDeque<ControlEvent> = VecDeque::new();

    loop {
        let timer_fired = tokio::select! {
            _ = interval.tick() => true,
            () = shared.wake.notified() => false,
        };

        shared.metrics.queue_depth(shared.channel.len());
        drain(&shared, &sender, &hook, &mut batch, &mut controls).await;

        while let Some(control) = controls.pop_front() {
            // Everything published before this control event may still sit
            // in other producers' rings; pick it up before exporting.
            drain(&shared, &sender, &hook, &mut batch, &mut controls).await;
            let outcome = export_batch(&shared, &sender, &mut batch).await;

            match control {
                ControlEvent::Flush(token) => settle(&token, outcome),
                ControlEvent::Shutdown(token) => {
                    settle(&token, outcome);
                    finish_shutdown(&shared, &mut controls);
                    return;
                }
            }
        }

        if timer_fired && !batch.is_empty() {
            // Scheduled flush; failures are logged and counted in
            // export_batch, the loop carries on.
            let _ = export_batch(&shared, &sender, &mut batch).await;
        }
    }
}

/// Drain all rings once, routing events. Size-triggered exports happen
/// inline so the batch never exceeds its configured bound.
async fn drain(
    shared: &Arc<Shared>,
    sender: &Arc<dyn BatchSenderBoxed>,
    hook: &Arc<dyn StartHook>,
    batch: &mut Vec<SpanRecord>,
    controls: &mut VecDeque<ControlEvent>,
) {
    let mut events = Vec::new();
    shared.channel.consume_all(|event| events.push(event));

    for event in events {
        match event {
            TelemetryEvent::Start { span, parent } => hook.on_start(&span, parent.as_ref()),
            TelemetryEvent::End(span) => {
                batch.push(span);
                if batch.len() >= shared.config.max_export_batch_size {
                    let _ = export_batch(shared, sender, batch).await;
                }
            }
            TelemetryEvent::Flush(token) => controls.push_back(ControlEvent::Flush(token)),
            TelemetryEvent::Shutdown(token) => controls.push_back(ControlEvent::Shutdown(token)),
        }
    }
}

/// Export the current batch, if any. Runs under the configured export
/// timeout; the timeout is also the bound on transport-level retries
/// since cancelling the send future stops its retry loop.
async fn export_batch(
    shared: &Shared,
    sender: &Arc<dyn BatchSenderBoxed>,
    batch: &mut Vec<SpanRecord>,
) -> Result<(), SendError> {
    if batch.is_empty() {
        return Ok(());
    }

    let spans = std::mem::replace(
        batch,
        Vec::with_capacity(shared.config.max_export_batch_size),
    );
    let size = spans.len();
    shared.metrics.spans_processed(size as u64);

    let send = sender.send_boxed(SpanBatch::with_spans(spans));
    let result = match tokio::time::timeout(shared.config.export_timeout, send).await {
        Ok(result) => result,
        Err(_) => Err(SendError::Timeout {
            message: format!(
                "export did not complete within {:?}",
                shared.config.export_timeout
            ),
        }),
    };

    match &result {
        Ok(()) => {
            shared.metrics.export_succeeded(size);
            tracing::debug!(sender = sender.name(), spans = size, "batch exported");
        }
        Err(e) => {
            shared.metrics.export_failed(size);
            tracing::warn!(
                sender = sender.name(),
                spans = size,
                error = %e,
                "batch export failed"
            );
        }
    }
    result
}

fn settle(token: &CompletionToken, outcome: Result<(), SendError>) {
    match outcome {
        Ok(()) => {
            token.succeed();
        }
        Err(e) => {
            token.fail(CompletionError::new(e.to_string()));
        }
    }
}

/// Final teardown: mark the pipeline stopped, close the channel, and
/// account for anything that raced in after the last drain.
fn finish_shutdown(shared: &Shared, controls: &mut VecDeque<ControlEvent>) {
    shared.state.store(STATE_SHUT_DOWN, Ordering::Release);
    shared.channel.close();

    let mut leftover_spans = 0u64;
    shared.channel.consume_all(|event| match event {
        TelemetryEvent::End(_) => leftover_spans += 1,
        TelemetryEvent::Flush(token) | TelemetryEvent::Shutdown(token) => {
            controls.push_back(ControlEvent::Flush(token));
        }
        TelemetryEvent::Start { .. } => {}
    });
    if leftover_spans > 0 {
        shared.record_dropped(leftover_spans);
    }

    // Control events that arrived behind the winning shutdown can no
    // longer be served.
    for control in controls.drain(..) {
        let (ControlEvent::Flush(token) | ControlEvent::Shutdown(token)) = control;
        token.fail(CompletionError::new("pipeline shut down"));
    }
}
