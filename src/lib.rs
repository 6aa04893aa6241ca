#![forbid(unsafe_code)]

//! # Alfred 🐱
//!
//! Production-grade resilience patterns for Rust: retry, timeout, circuit
//! breaker, bulkhead, hedge, rate limit, and the `wrap`/`or`/`race`
//! composition algebra that glues them together — plus a control plane for
//! retuning live policies at runtime.
//!
//! ## Features
//!
//! - **Retry** with backoff strategies (constant, linear, exponential) and jitter
//! - **Circuit breakers** with half-open state recovery
//! - **Bulkheads** for concurrency limiting, queueing, and live resizing
//! - **Timeouts** integrated with tokio
//! - **Hedging**: staggered speculative attempts, first winner cancels the rest
//! - **Rate limiting** via a pluggable token-bucket strategy
//! - **Policy composition** via the builder pattern and the tower-native algebra
//! - **Live configuration** through a typed registry and a JSONL command channel
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use alfred::{
//!     Backoff, BulkheadPolicy, CircuitBreakerPolicy, Jitter, ResilienceError, ResilienceStack,
//!     ResilienceStackBuilder, RetryPolicy, TimeoutPolicy,
//! };
//!
//! async fn flaky_operation(
//!     attempts: Arc<AtomicUsize>,
//! ) -> Result<(), ResilienceError<std::io::Error>> {
//!     let n = attempts.fetch_add(1, Ordering::Relaxed);
//!     if n < 2 {
//!         Err(ResilienceError::Inner(std::io::Error::new(
//!             std::io::ErrorKind::Other,
//!             "transient failure",
//!         )))
//!     } else {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ResilienceError<std::io::Error>> {
//!     let attempts = Arc::new(AtomicUsize::new(0));
//!
//!     // Configure individual policies.
//!     let retry = RetryPolicy::builder()
//!         .max_attempts(3)
//!         .expect("valid max_attempts")
//!         .backoff(Backoff::exponential(Duration::from_millis(200)))
//!         .with_jitter(Jitter::full())
//!         .build()
//!         .expect("valid retry policy");
//!     let timeout = TimeoutPolicy::new(Duration::from_secs(2)).expect("valid timeout");
//!     let bulkhead = BulkheadPolicy::new(32);
//!     let circuit_breaker = CircuitBreakerPolicy::new(5, Duration::from_secs(30));
//!
//!     // Compose via the stack builder (Timeout -> Bulkhead -> CircuitBreaker -> Retry).
//!     let stack: ResilienceStack<std::io::Error> = ResilienceStackBuilder::new()
//!         .retry(retry)
//!         .circuit_breaker(5, Duration::from_secs(30))
//!         .bulkhead(32)
//!         .timeout(Duration::from_secs(2))
//!         .build()
//!         .expect("valid stack");
//!
//!     let _ = (bulkhead, circuit_breaker);
//!     stack.execute(|| flaky_operation(attempts.clone())).await?;
//!     Ok(())
//! }
//! ```

pub mod adaptive;
mod algebra;
mod backoff;
mod bulkhead;
mod circuit_breaker;
pub mod circuit_breaker_registry;
mod clock;
pub mod control;
pub mod cookbook;
mod error;
mod hedge;
mod jitter;
pub mod live_plan;
pub mod presets;
pub mod rate_limit;
mod resolvable;
mod retry;
mod sleeper;
mod stack;
pub mod telemetry;
mod timeout;

// Re-exports
pub use adaptive::Adaptive;
pub use algebra::{CombinedLayer, FallbackLayer, ForkJoinLayer, Policy};
pub use backoff::{
    Backoff, BackoffError, BackoffStrategy, ConstantBackoff, ExponentialBackoff, LinearBackoff,
    MAX_BACKOFF,
};
pub use bulkhead::{BulkheadLayer, BulkheadPolicy, BulkheadService};
pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerError, CircuitBreakerLayer,
    CircuitBreakerPolicy, CircuitBreakerService, CircuitState,
};
pub use circuit_breaker_registry::{
    CircuitBreakerHandle, CircuitBreakerRegistry, InMemoryCircuitBreakerRegistry,
};
pub use clock::{CancellationToken, Clock, MonotonicClock, TestClock};
pub use control::auth::AuthorizationLayer;
pub use control::transport::{Transport, TransportEnvelope, TransportRouter};
pub use control::transport_channel::ChannelTransport;
pub use error::ResilienceError;
pub use hedge::{HedgeLayer, HedgePolicy, HedgeService};
pub use jitter::Jitter;
pub use live_plan::{
    LiveNodeKind, LivePolicy, LivePolicyPlan, PlanNode, StaticNode,
};
pub use rate_limit::{RateLimitPolicy, RateLimitPolicyLayer, RateLimitPolicyService};
pub use resolvable::Resolvable;
pub use retry::{BuildError, RetryLayer, RetryPolicy, RetryPolicyBuilder, RetryService};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use stack::{ResilienceStack, ResilienceStackBuilder, StackError};
pub use timeout::{TimeoutError, TimeoutLayer, TimeoutPolicy, MAX_TIMEOUT};

pub mod prelude;
