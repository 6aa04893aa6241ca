//! Convenient re-exports for common Alfred types.
pub use crate::{
    adaptive::Adaptive,
    algebra::{CombinedLayer, FallbackLayer, ForkJoinLayer, Policy},
    backoff::{
        Backoff, BackoffError, BackoffStrategy, ConstantBackoff, ExponentialBackoff, LinearBackoff,
        MAX_BACKOFF,
    },
    bulkhead::BulkheadLayer,
    circuit_breaker::{CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerLayer},
    control::{
        AuthMode, AuthPayload, AuthProvider, AuthRegistry, CommandContext, CommandEnvelope,
        CommandMeta, CommandService,
    },
    jitter::Jitter,
    live_plan::{LiveNodeKind, LivePolicy, LivePolicyPlan, PlanNode, StaticNode},
    rate_limit::{RateLimitPolicy, RateLimitPolicyLayer},
    retry::{BuildError, RetryLayer, RetryPolicy, RetryPolicyBuilder},
    telemetry::{
        BulkheadEvent, CircuitBreakerEvent, FallbackSink, LogSink, MemorySink, MulticastSink,
        NullSink, PolicyEvent, RequestOutcome, RetryEvent, StreamingSink, TelemetrySink,
        TimeoutEvent,
    },
    timeout::TimeoutLayer,
    timeout::{TimeoutError, TimeoutPolicy, MAX_TIMEOUT},
    BulkheadPolicy, ResilienceError,
};
