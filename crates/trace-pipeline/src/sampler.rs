//! Sampling decision engine.
//!
//! Samplers are pure decision functions callable from unboundedly many
//! threads; the only shared mutable state in the family is the rate
//! limiter's credit balance, which is CAS-managed and lock-free.

use crate::span::{AttributeValue, SpanId, SpanKind, TraceId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Sampling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingDecision {
    /// Do not record or export.
    Drop,
    /// Record locally but do not export.
    RecordOnly,
    /// Record and export.
    RecordAndSample,
}

impl SamplingDecision {
    /// Check if this decision means the span should be recorded.
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::RecordOnly | Self::RecordAndSample)
    }

    /// Check if this decision means the span should be exported.
    pub fn is_sampled(&self) -> bool {
        matches!(self, Self::RecordAndSample)
    }
}

/// Sampling result: decision plus attributes to attach to the span.
///
/// Produced once at span creation and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct SamplingResult {
    pub decision: SamplingDecision,
    pub attributes: Vec<(String, AttributeValue)>,
}

impl SamplingResult {
    /// Create a drop result.
    pub fn drop_span() -> Self {
        Self {
            decision: SamplingDecision::Drop,
            attributes: Vec::new(),
        }
    }

    /// Create a record-only result.
    pub fn record_only() -> Self {
        Self {
            decision: SamplingDecision::RecordOnly,
            attributes: Vec::new(),
        }
    }

    /// Create a record-and-sample result.
    pub fn record_and_sample() -> Self {
        Self {
            decision: SamplingDecision::RecordAndSample,
            attributes: Vec::new(),
        }
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.push((key.into(), value));
        self
    }
}

/// Snapshot of a parent span's identity and sampling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub sampled: bool,
    pub is_remote: bool,
}

/// Inputs to a sampling decision.
#[derive(Debug, Clone)]
pub struct SamplingParams<'a> {
    /// Parent context, absent for root spans.
    pub parent: Option<ParentContext>,
    /// Trace id of the span being created.
    pub trace_id: TraceId,
    /// Span name.
    pub name: &'a str,
    /// Span kind.
    pub kind: SpanKind,
    /// Initial attributes.
    pub attributes: &'a [(String, AttributeValue)],
    /// Parent links (e.g. batch consumers linking to producer spans).
    pub links: &'a [ParentContext],
}

impl<'a> SamplingParams<'a> {
    /// True if the parent or any link carries a sampled flag.
    pub fn any_parent_sampled(&self) -> bool {
        self.parent.is_some_and(|p| p.sampled) || self.links.iter().any(|l| l.sampled)
    }
}

/// Trait for samplers.
///
/// Implementations must be safe to call concurrently and must not panic
/// for well-formed input.
pub trait Sampler: Send + Sync {
    /// Make a sampling decision.
    fn should_sample(&self, params: &SamplingParams) -> SamplingResult;

    /// Get a description of this sampler.
    fn description(&self) -> &str;
}

// =============================================================================
// CONSTANT SAMPLERS
// =============================================================================

/// Always-on sampler (sample everything).
#[derive(Debug, Default)]
pub struct AlwaysOnSampler;

impl AlwaysOnSampler {
    pub fn new() -> Self {
        Self
    }
}

impl Sampler for AlwaysOnSampler {
    fn should_sample(&self, _params: &SamplingParams) -> SamplingResult {
        SamplingResult::record_and_sample()
    }

    fn description(&self) -> &str {
        "AlwaysOnSampler"
    }
}

/// Always-off sampler (sample nothing).
#[derive(Debug, Default)]
pub struct AlwaysOffSampler;

impl AlwaysOffSampler {
    pub fn new() -> Self {
        Self
    }
}

impl Sampler for AlwaysOffSampler {
    fn should_sample(&self, _params: &SamplingParams) -> SamplingResult {
        SamplingResult::drop_span()
    }

    fn description(&self) -> &str {
        "AlwaysOffSampler"
    }
}

// =============================================================================
// TRACE-ID RATIO SAMPLER
// =============================================================================

/// Deterministic ratio sampler keyed off the trace id.
///
/// The decision depends only on the trace id and the configured
/// probability, so independent services observing the same trace reach the
/// same verdict without coordination.
#[derive(Debug)]
pub struct TraceIdRatioSampler {
    probability: f64,
    /// Comparison bound, computed once at construction. `i64::MAX` for
    /// probability 1.0 and `i64::MIN` for 0.0 are exact short-circuits,
    /// immune to float rounding near the edges.
    upper_bound: i64,
    description: String,
}

impl TraceIdRatioSampler {
    /// Create a new ratio sampler.
    ///
    /// # Panics
    ///
    /// Panics if `probability` is outside `[0.0, 1.0]` (a programming
    /// error, caught at construction rather than per call).
    pub fn new(probability: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&probability),
            "sampling probability must be in [0.0, 1.0], got {probability}"
        );

        let upper_bound = if probability >= 1.0 {
            i64::MAX
        } else if probability <= 0.0 {
            i64::MIN
        } else {
            (probability * i64::MAX as f64) as i64
        };

        Self {
            probability,
            upper_bound,
            description: format!("TraceIdRatioSampler{{probability={probability}}}"),
        }
    }

    /// Get the configured probability.
    pub fn probability(&self) -> f64 {
        self.probability
    }
}

impl Sampler for TraceIdRatioSampler {
    fn should_sample(&self, params: &SamplingParams) -> SamplingResult {
        if params.trace_id.ratio_order_value() < self.upper_bound {
            SamplingResult::record_and_sample()
        } else {
            SamplingResult::drop_span()
        }
    }

    fn description(&self) -> &str {
        &self.description
    }
}

// =============================================================================
// RATE-LIMITING SAMPLER (leaky bucket)
// =============================================================================

/// Lock-free leaky-bucket credit balance.
///
/// Credits replenish continuously at `rate / 1e9` per nanosecond, capped at
/// `max(rate, 1.0)` so even sub-1/s rates can afford one trace. The whole
/// balance is encoded as a single atomic "debit timestamp": the balance at
/// time `now` is `(now - debit) * credits_per_nano`, capped. Spending
/// commits a later debit timestamp via compare-and-swap; a failed CAS means
/// another thread spent first, so we recompute and retry. A lost race never
/// over-spends and a failed check never mutates state.
///
/// A fresh bucket starts with a full balance (the debit timestamp is seeded
/// in the past): a process may burst up to `max_balance` traces right after
/// startup, which beats silently dropping the first seconds of telemetry.
#[derive(Debug)]
pub struct CreditBucket {
    credits_per_nano: f64,
    max_balance: f64,
    /// Last debit time in nanoseconds relative to `base`. May be negative
    /// (seeded in the past for the initial full balance).
    debit_nanos: AtomicI64,
    base: Instant,
}

impl CreditBucket {
    /// Create a bucket replenishing `credits_per_second`, capped at
    /// `max_balance` credits.
    pub fn new(credits_per_second: f64, max_balance: f64) -> Self {
        assert!(
            credits_per_second > 0.0,
            "credit rate must be positive, got {credits_per_second}"
        );
        let credits_per_nano = credits_per_second / 1e9;
        // Seed the debit far enough back that the balance starts full.
        let initial_debit = -((max_balance / credits_per_nano) as i64);
        Self {
            credits_per_nano,
            max_balance,
            debit_nanos: AtomicI64::new(initial_debit),
            base: Instant::now(),
        }
    }

    /// Try to spend `cost` credits now.
    pub fn check_credit(&self, cost: f64) -> bool {
        self.check_credit_at(self.base.elapsed().as_nanos() as i64, cost)
    }

    /// Try to spend `cost` credits at the given clock reading (nanoseconds
    /// on the bucket's own timeline). Split out so tests can drive a
    /// synthetic clock.
    pub fn check_credit_at(&self, now_nanos: i64, cost: f64) -> bool {
        loop {
            let debit = self.debit_nanos.load(Ordering::Relaxed);
            let available =
                ((now_nanos - debit) as f64 * self.credits_per_nano).min(self.max_balance);
            if available < cost {
                return false;
            }

            // Commit the spend: a new debit timestamp leaving
            // `available - cost` credits on the balance.
            let new_debit = now_nanos - ((available - cost) / self.credits_per_nano) as i64;
            if self
                .debit_nanos
                .compare_exchange_weak(debit, new_debit, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
            // Contention: another thread spent first, retry with fresh state.
        }
    }
}

/// Rate-limiting sampler: at most `max_traces_per_second` locally
/// initiated traces are sampled.
///
/// A span whose parent (or any link) is already sampled is always sampled
/// regardless of local credit — sampling never un-samples a lineage that
/// an upstream service committed to.
pub struct RateLimitingSampler {
    bucket: CreditBucket,
    description: String,
}

impl RateLimitingSampler {
    /// Create a new rate-limiting sampler.
    ///
    /// # Panics
    ///
    /// Panics if `max_traces_per_second` is not positive.
    pub fn new(max_traces_per_second: f64) -> Self {
        let max_balance = max_traces_per_second.max(1.0);
        Self {
            bucket: CreditBucket::new(max_traces_per_second, max_balance),
            description: format!("RateLimitingSampler{{rate={max_traces_per_second}/s}}"),
        }
    }

    /// Access to the underlying bucket (shared with tests).
    pub fn bucket(&self) -> &CreditBucket {
        &self.bucket
    }
}

impl Sampler for RateLimitingSampler {
    fn should_sample(&self, params: &SamplingParams) -> SamplingResult {
        if params.any_parent_sampled() {
            return SamplingResult::record_and_sample();
        }
        if self.bucket.check_credit(1.0) {
            SamplingResult::record_and_sample()
        } else {
            SamplingResult::drop_span()
        }
    }

    fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for RateLimitingSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitingSampler")
            .field("description", &self.description)
            .finish()
    }
}

// =============================================================================
// PER-OPERATION SAMPLER
// =============================================================================

/// Dispatches to a per-span-name override sampler, falling back to a
/// default when no override exists. Lookup is exact and case-sensitive.
pub struct PerOperationSampler {
    default: Arc<dyn Sampler>,
    overrides: HashMap<String, Arc<dyn Sampler>>,
    description: String,
}

impl PerOperationSampler {
    /// Create a per-operation sampler.
    pub fn new(default: Arc<dyn Sampler>, overrides: HashMap<String, Arc<dyn Sampler>>) -> Self {
        let description = format!(
            "PerOperationSampler{{default={}, overrides={}}}",
            default.description(),
            overrides.len()
        );
        Self {
            default,
            overrides,
            description,
        }
    }

    /// Add or replace the override for one operation name.
    pub fn with_override(mut self, name: impl Into<String>, sampler: Arc<dyn Sampler>) -> Self {
        self.overrides.insert(name.into(), sampler);
        self.description = format!(
            "PerOperationSampler{{default={}, overrides={}}}",
            self.default.description(),
            self.overrides.len()
        );
        self
    }
}

impl Sampler for PerOperationSampler {
    fn should_sample(&self, params: &SamplingParams) -> SamplingResult {
        match self.overrides.get(params.name) {
            Some(sampler) => sampler.should_sample(params),
            None => self.default.should_sample(params),
        }
    }

    fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for PerOperationSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerOperationSampler")
            .field("default", &self.default.description())
            .field("overrides", &self.overrides.len())
            .finish()
    }
}

// =============================================================================
// PARENT-BASED SAMPLER
// =============================================================================

/// Delegates based on parent presence, locality and sampled flag; root
/// spans go to the `root` sampler.
pub struct ParentBasedSampler {
    root: Arc<dyn Sampler>,
    remote_parent_sampled: Arc<dyn Sampler>,
    remote_parent_not_sampled: Arc<dyn Sampler>,
    local_parent_sampled: Arc<dyn Sampler>,
    local_parent_not_sampled: Arc<dyn Sampler>,
}

impl ParentBasedSampler {
    /// Create a parent-based sampler with the conventional defaults:
    /// sampled parents are followed, unsampled parents are followed.
    pub fn new(root: Arc<dyn Sampler>) -> Self {
        Self {
            root,
            remote_parent_sampled: Arc::new(AlwaysOnSampler::new()),
            remote_parent_not_sampled: Arc::new(AlwaysOffSampler::new()),
            local_parent_sampled: Arc::new(AlwaysOnSampler::new()),
            local_parent_not_sampled: Arc::new(AlwaysOffSampler::new()),
        }
    }

    pub fn with_remote_parent_sampled(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.remote_parent_sampled = sampler;
        self
    }

    pub fn with_remote_parent_not_sampled(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.remote_parent_not_sampled = sampler;
        self
    }

    pub fn with_local_parent_sampled(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.local_parent_sampled = sampler;
        self
    }

    pub fn with_local_parent_not_sampled(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.local_parent_not_sampled = sampler;
        self
    }
}

impl Sampler for ParentBasedSampler {
    fn should_sample(&self, params: &SamplingParams) -> SamplingResult {
        match params.parent {
            None => self.root.should_sample(params),
            Some(parent) => {
                let delegate = match (parent.is_remote, parent.sampled) {
                    (true, true) => &self.remote_parent_sampled,
                    (true, false) => &self.remote_parent_not_sampled,
                    (false, true) => &self.local_parent_sampled,
                    (false, false) => &self.local_parent_not_sampled,
                };
                delegate.should_sample(params)
            }
        }
    }

    fn description(&self) -> &str {
        "ParentBasedSampler"
    }
}

impl fmt::Debug for ParentBasedSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParentBasedSampler")
            .field("root", &self.root.description())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_params(trace_id: TraceId) -> SamplingParams<'static> {
        SamplingParams {
            parent: None,
            trace_id,
            name: "test",
            kind: SpanKind::Internal,
            attributes: &[],
            links: &[],
        }
    }

    fn parent(sampled: bool, is_remote: bool) -> ParentContext {
        ParentContext {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            sampled,
            is_remote,
        }
    }

    #[test]
    fn test_constant_samplers() {
        let params = root_params(TraceId::random());
        assert!(AlwaysOnSampler::new()
            .should_sample(&params)
            .decision
            .is_sampled());
        assert!(!AlwaysOffSampler::new()
            .should_sample(&params)
            .decision
            .is_sampled());
    }

    #[test]
    fn test_ratio_boundaries() {
        let on = TraceIdRatioSampler::new(1.0);
        let off = TraceIdRatioSampler::new(0.0);

        for _ in 0..10_000 {
            let params = root_params(TraceId::random());
            assert!(on.should_sample(&params).decision.is_sampled());
            assert!(!off.should_sample(&params).decision.is_sampled());
        }
    }

    #[test]
    fn test_ratio_deterministic() {
        let sampler = TraceIdRatioSampler::new(0.5);
        for _ in 0..100 {
            let params = root_params(TraceId::random());
            let first = sampler.should_sample(&params).decision;
            for _ in 0..10 {
                assert_eq!(sampler.should_sample(&params).decision, first);
            }
        }
    }

    #[test]
    fn test_ratio_distribution() {
        let sampler = TraceIdRatioSampler::new(0.5);
        let sampled = (0..10_000)
            .filter(|_| {
                sampler
                    .should_sample(&root_params(TraceId::random()))
                    .decision
                    .is_sampled()
            })
            .count();
        // Loose bounds: binomial(10000, 0.5) is within ±500 essentially always.
        assert!((4500..=5500).contains(&sampled), "sampled {sampled}/10000");
    }

    #[test]
    #[should_panic(expected = "sampling probability")]
    fn test_ratio_rejects_out_of_range() {
        let _ = TraceIdRatioSampler::new(1.5);
    }

    #[test]
    fn test_credit_bucket_rate() {
        let bucket = CreditBucket::new(10.0, 10.0);
        let nanos_per_sec = 1_000_000_000i64;

        // Drain the initial full balance.
        let mut accepted = 0;
        for _ in 0..100 {
            if bucket.check_credit_at(0, 1.0) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 10);

        // Sustained 100/s offered for 10 simulated seconds: ~10/s accepted.
        let mut accepted = 0u32;
        for i in 0..1000i64 {
            let now = i * nanos_per_sec / 100;
            if bucket.check_credit_at(now, 1.0) {
                accepted += 1;
            }
        }
        assert!(
            (95..=105).contains(&accepted),
            "expected ~100 accepted, got {accepted}"
        );
    }

    #[test]
    fn test_credit_bucket_cap() {
        let bucket = CreditBucket::new(10.0, 10.0);
        // A long idle period must not accumulate more than max_balance.
        let now = 3600 * 1_000_000_000i64;
        let mut accepted = 0;
        for _ in 0..100 {
            if bucket.check_credit_at(now, 1.0) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 10);
    }

    #[test]
    fn test_rate_limiting_respects_parent() {
        let sampler = RateLimitingSampler::new(1.0);

        // Exhaust local credit.
        while sampler.bucket().check_credit(1.0) {}

        let mut params = root_params(TraceId::random());
        params.parent = Some(parent(true, true));
        assert!(sampler.should_sample(&params).decision.is_sampled());

        // Sampled link is enough too.
        let links = [parent(true, false)];
        let params = SamplingParams {
            parent: Some(parent(false, false)),
            trace_id: TraceId::random(),
            name: "test",
            kind: SpanKind::Internal,
            attributes: &[],
            links: &links,
        };
        assert!(sampler.should_sample(&params).decision.is_sampled());

        // No sampled lineage and no credit: dropped.
        let params = root_params(TraceId::random());
        assert!(!sampler.should_sample(&params).decision.is_sampled());
    }

    #[test]
    fn test_per_operation_dispatch() {
        let mut overrides: HashMap<String, Arc<dyn Sampler>> = HashMap::new();
        overrides.insert("checkout".to_string(), Arc::new(AlwaysOnSampler::new()));
        let sampler = PerOperationSampler::new(Arc::new(AlwaysOffSampler::new()), overrides);

        let mut params = root_params(TraceId::random());
        params.name = "checkout";
        assert!(sampler.should_sample(&params).decision.is_sampled());

        // Exact, case-sensitive match only.
        params.name = "Checkout";
        assert!(!sampler.should_sample(&params).decision.is_sampled());
        params.name = "unknown";
        assert!(!sampler.should_sample(&params).decision.is_sampled());
    }

    #[test]
    fn test_parent_based_delegation() {
        let sampler = ParentBasedSampler::new(Arc::new(AlwaysOffSampler::new()));

        // Root: delegate to root sampler (off).
        assert!(!sampler
            .should_sample(&root_params(TraceId::random()))
            .decision
            .is_sampled());

        // Sampled parent (remote or local): follow it.
        for is_remote in [true, false] {
            let mut params = root_params(TraceId::random());
            params.parent = Some(parent(true, is_remote));
            assert!(sampler.should_sample(&params).decision.is_sampled());

            params.parent = Some(parent(false, is_remote));
            assert!(!sampler.should_sample(&params).decision.is_sampled());
        }
    }

    #[test]
    fn test_parent_based_ratio_monotonic_under_sampled_parent() {
        // Even a never-sampling root composes into "parent sampled => sampled".
        let sampler = ParentBasedSampler::new(Arc::new(TraceIdRatioSampler::new(0.0)));
        for _ in 0..1000 {
            let mut params = root_params(TraceId::random());
            params.parent = Some(parent(true, false));
            assert!(sampler.should_sample(&params).decision.is_sampled());
        }
    }
}
