//! Ready-to-use policy recipes ("cookbook").
//! Each function returns a `Policy<Layer>` stack you can drop into `tower::ServiceBuilder`.
//! The goal is pragmatic defaults that are safe for production.

use std::time::Duration;

use crate::algebra::{CombinedLayer, FallbackLayer, Policy};
use crate::bulkhead::BulkheadLayer;
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerLayer};
use crate::hedge::{HedgeLayer, HedgePolicy};
use crate::retry::{BuildError, RetryLayer, RetryPolicy};
use crate::timeout::{TimeoutError, TimeoutLayer};
use crate::{Backoff, Jitter};

/// Simple, fast retry: 3 attempts, exponential backoff starting at 50ms, full jitter.
pub fn retry_fast<E>() -> Result<Policy<RetryLayer<E>>, BuildError>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let policy = RetryPolicy::builder()
        .max_attempts(3)?
        .backoff(Backoff::exponential(Duration::from_millis(50)))
        .with_jitter(Jitter::full())
        .build()?;
    Ok(Policy(RetryLayer::new(policy)))
}

/// Latency guard: 95th percentile focused timeout at 300ms.
pub fn timeout_p95() -> Result<Policy<TimeoutLayer>, TimeoutError> {
    Ok(Policy(TimeoutLayer::new(Duration::from_millis(300))?))
}

/// Bulkhead for noisy neighbors: cap at `max_in_flight` with immediate rejection.
pub fn bulkhead_isolate(max_in_flight: usize) -> Policy<BulkheadLayer> {
    Policy(BulkheadLayer::new(max_in_flight))
}

/// Circuit breaker tuned for flapping services.
pub fn circuit_flap_guard() -> Result<Policy<CircuitBreakerLayer>, CircuitBreakerError> {
    let cfg = CircuitBreakerConfig::builder()
        .failure_threshold(5)
        .recovery_timeout(Duration::from_secs(5))
        .success_threshold(3)
        .build()?;
    Ok(Policy(CircuitBreakerLayer::new(cfg)))
}

/// Reliable read: aggressive attempt then relaxed fallback.
/// Layout: (fast timeout + small retries) | (slow timeout + generous retries)
#[allow(clippy::type_complexity)]
pub fn reliable_read<E>() -> Result<
    Policy<FallbackLayer<CombinedLayer<TimeoutLayer, RetryLayer<E>>, CombinedLayer<TimeoutLayer, RetryLayer<E>>>>,
    Box<dyn std::error::Error>,
>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let fast_retry = RetryPolicy::builder()
        .max_attempts(2)?
        .backoff(Backoff::constant(Duration::from_millis(20)))
        .with_jitter(Jitter::equal())
        .build()?;
    let fast = timeout_p95()? + Policy(RetryLayer::new(fast_retry));

    let slow_retry = RetryPolicy::builder()
        .max_attempts(5)?
        .backoff(Backoff::exponential(Duration::from_millis(150)))
        .with_jitter(Jitter::full())
        .build()?;
    let slow = Policy(TimeoutLayer::new(Duration::from_secs(2))?) + Policy(RetryLayer::new(slow_retry));

    Ok(fast | slow)
}

/// API guardrail: timeout + circuit breaker + bulkhead, for external calls.
#[allow(clippy::type_complexity)]
pub fn api_guardrail(
) -> Result<Policy<CombinedLayer<CombinedLayer<TimeoutLayer, CircuitBreakerLayer>, BulkheadLayer>>, Box<dyn std::error::Error>>
{
    let timeout = Policy(TimeoutLayer::new(Duration::from_secs(1))?);
    let breaker = circuit_flap_guard()?;
    let bulkhead = bulkhead_isolate(64);
    Ok(timeout + breaker + bulkhead)
}

/// "Four nines" read-mostly path: a true hedge — second attempt launches
/// after 80ms if the first hasn't settled, whichever wins cancels the other.
pub fn hedged_read<E>() -> Policy<HedgeLayer<E>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    Policy(HedgeLayer::new(HedgePolicy::new(Duration::from_millis(80), 1)))
}

/// Low-risk default: timeout + retry + bulkhead. Good starting point for most I/O.
pub fn sensible_defaults<E>(max_in_flight: usize) -> Result<Policy<SensibleStack<E>>, Box<dyn std::error::Error>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let retry = RetryPolicy::builder()
        .max_attempts(3)?
        .backoff(Backoff::exponential(Duration::from_millis(100)))
        .with_jitter(Jitter::full())
        .build()?;
    Ok(Policy(TimeoutLayer::new(Duration::from_millis(750))?)
        + Policy(RetryLayer::new(retry))
        + bulkhead_isolate(max_in_flight))
}

type SensibleStack<E> = CombinedLayer<CombinedLayer<TimeoutLayer, RetryLayer<E>>, BulkheadLayer>;
