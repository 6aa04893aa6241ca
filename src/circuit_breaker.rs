//! Circuit breaker implementation with lock-free atomics.
//!
//! Three states: `Closed` (normal), `Open` (rejecting), `HalfOpen` (probing
//! recovery with a bounded number of test calls). A run of `success_threshold`
//! consecutive successes in `HalfOpen` closes the circuit; any failure there
//! reopens it immediately.

use crate::clock::{Clock, MonotonicClock};
use crate::resolvable::Resolvable;
use crate::ResilienceError;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Errors returned when configuring a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("failure_threshold must be > 0")]
    ZeroFailureThreshold,
    #[error("success_threshold must be > 0")]
    ZeroSuccessThreshold,
    #[error("half_open_max_calls must be > 0")]
    ZeroHalfOpenLimit,
}

#[derive(Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub success_threshold: usize,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: usize,
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    /// A breaker that never trips: threshold of `usize::MAX` failures.
    pub fn disabled() -> Self {
        Self {
            failure_threshold: usize::MAX,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(0),
            half_open_max_calls: usize::MAX,
        }
    }
}

/// Builder for [`CircuitBreakerConfig`] with validated construction.
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: usize,
    success_threshold: usize,
    recovery_timeout: Duration,
    half_open_max_calls: usize,
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfigBuilder {
    pub fn failure_threshold(mut self, n: usize) -> Self {
        self.failure_threshold = n;
        self
    }

    pub fn success_threshold(mut self, n: usize) -> Self {
        self.success_threshold = n;
        self
    }

    pub fn recovery_timeout(mut self, d: Duration) -> Self {
        self.recovery_timeout = d;
        self
    }

    pub fn half_open_max_calls(mut self, n: usize) -> Self {
        self.half_open_max_calls = n;
        self
    }

    pub fn build(self) -> Result<CircuitBreakerConfig, CircuitBreakerError> {
        if self.failure_threshold == 0 {
            return Err(CircuitBreakerError::ZeroFailureThreshold);
        }
        if self.success_threshold == 0 {
            return Err(CircuitBreakerError::ZeroSuccessThreshold);
        }
        if self.half_open_max_calls == 0 {
            return Err(CircuitBreakerError::ZeroHalfOpenLimit);
        }
        Ok(CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            recovery_timeout: self.recovery_timeout,
            half_open_max_calls: self.half_open_max_calls,
        })
    }
}

struct CircuitBreakerState {
    state: AtomicU8,
    failure_count: AtomicUsize,
    success_count: AtomicUsize,
    opened_at_millis: AtomicU64,
    half_open_calls: AtomicUsize,
}

impl CircuitBreakerState {
    fn fresh() -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            failure_count: AtomicUsize::new(0),
            success_count: AtomicUsize::new(0),
            opened_at_millis: AtomicU64::new(0),
            half_open_calls: AtomicUsize::new(0),
        }
    }

    fn current_state(&self) -> CircuitState {
        match self.state.load(Ordering::Acquire) {
            STATE_CLOSED => CircuitState::Closed,
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => unreachable!("invalid circuit breaker state"),
        }
    }

    fn reset(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
        self.failure_count.store(0, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
        self.opened_at_millis.store(0, Ordering::Release);
        self.half_open_calls.store(0, Ordering::Release);
    }
}

/// The breaker's tunable parameters, each independently [`Resolvable`] so a
/// live-bound breaker (see [`crate::control`]) can pick up configuration
/// changes without losing its accumulated state. Resolved per event, per the
/// timing rule in `resolvable`'s module docs: `recovery_timeout` when
/// deciding whether to probe, `half_open_max_calls`/`success_threshold` on
/// each half-open admission/success, `failure_threshold` on each failure.
#[derive(Clone)]
struct ResolvableCircuitBreakerConfig {
    failure_threshold: Resolvable<usize>,
    success_threshold: Resolvable<usize>,
    recovery_timeout: Resolvable<Duration>,
    half_open_max_calls: Resolvable<usize>,
}

impl From<CircuitBreakerConfig> for ResolvableCircuitBreakerConfig {
    fn from(c: CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: Resolvable::value(c.failure_threshold),
            success_threshold: Resolvable::value(c.success_threshold),
            recovery_timeout: Resolvable::value(c.recovery_timeout),
            half_open_max_calls: Resolvable::value(c.half_open_max_calls),
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreakerPolicy {
    state: Arc<CircuitBreakerState>,
    config: ResolvableCircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerPolicy {
    pub fn new(failure_threshold: usize, recovery_timeout: Duration) -> Self {
        Self {
            state: Arc::new(CircuitBreakerState::fresh()),
            config: CircuitBreakerConfig {
                failure_threshold,
                success_threshold: 1,
                recovery_timeout,
                half_open_max_calls: 1,
            }
            .into(),
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(CircuitBreakerState::fresh()),
            config: config.into(),
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Build a breaker whose thresholds and recovery timeout are re-read from
    /// a live source on every event, rather than fixed at construction.
    pub fn with_resolvable_config(
        failure_threshold: Resolvable<usize>,
        success_threshold: Resolvable<usize>,
        recovery_timeout: Resolvable<Duration>,
        half_open_max_calls: Resolvable<usize>,
    ) -> Self {
        Self {
            state: Arc::new(CircuitBreakerState::fresh()),
            config: ResolvableCircuitBreakerConfig {
                failure_threshold,
                success_threshold,
                recovery_timeout,
                half_open_max_calls,
            },
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_half_open_limit(mut self, limit: usize) -> Self {
        self.config.half_open_max_calls = Resolvable::value(limit);
        self
    }

    pub fn with_success_threshold(mut self, threshold: usize) -> Self {
        self.config.success_threshold = Resolvable::value(threshold);
        self
    }

    /// Current breaker state.
    pub fn current_state(&self) -> CircuitState {
        self.state.current_state()
    }

    /// Force the breaker back to `Closed`, clearing failure/success counters.
    pub fn reset(&self) {
        self.state.reset();
    }

    pub async fn execute<T, E, Fut, Op>(&self, mut operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        E: std::error::Error + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        loop {
            let current_state = self.state.state.load(Ordering::Acquire);

            match current_state {
                STATE_OPEN => {
                    let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
                    let now = self.now_millis();
                    let elapsed = now.saturating_sub(opened_at);

                    if elapsed >= self.config.recovery_timeout.resolve().as_millis() as u64 {
                        match self.state.state.compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                tracing::info!("Circuit breaker → half-open");
                                self.state.half_open_calls.store(1, Ordering::Release);
                                self.state.success_count.store(0, Ordering::Release);
                                break;
                            }
                            Err(STATE_HALF_OPEN) => continue,
                            Err(STATE_CLOSED) => break,
                            Err(_) => unreachable!("Invalid state transition"),
                        }
                    } else {
                        return Err(ResilienceError::CircuitOpen {
                            failure_count: self.state.failure_count.load(Ordering::Acquire),
                            open_duration: Duration::from_millis(elapsed),
                        });
                    }
                }
                STATE_HALF_OPEN => {
                    let current = self.state.half_open_calls.fetch_add(1, Ordering::AcqRel);
                    if current >= self.config.half_open_max_calls.resolve() {
                        self.state.half_open_calls.fetch_sub(1, Ordering::Release);
                        return Err(ResilienceError::CircuitOpen {
                            failure_count: self.state.failure_count.load(Ordering::Acquire),
                            open_duration: Duration::from_millis(0),
                        });
                    }
                    tracing::debug!(
                        in_flight = current + 1,
                        max = self.config.half_open_max_calls.resolve(),
                        "Circuit breaker: half-open test request"
                    );
                    break;
                }
                STATE_CLOSED => break,
                _ => unreachable!("Invalid circuit breaker state"),
            }
        }

        let was_half_open = self.state.state.load(Ordering::Acquire) == STATE_HALF_OPEN;
        let result = operation().await;

        if was_half_open {
            self.state.half_open_calls.fetch_sub(1, Ordering::Release);
        }

        match &result {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }

        result
    }

    fn on_success(&self) {
        let current = self.state.state.load(Ordering::Acquire);

        match current {
            STATE_HALF_OPEN => {
                let successes = self.state.success_count.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold.resolve()
                    && self
                        .state
                        .state
                        .compare_exchange(
                            STATE_HALF_OPEN,
                            STATE_CLOSED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    self.state.failure_count.store(0, Ordering::Release);
                    self.state.success_count.store(0, Ordering::Release);
                    self.state.opened_at_millis.store(0, Ordering::Release);
                    tracing::info!("Circuit breaker → closed");
                }
            }
            STATE_CLOSED => {
                self.state.failure_count.store(0, Ordering::Release);
            }
            _ => {}
        }
    }

    fn on_failure(&self) {
        let current = self.state.state.load(Ordering::Acquire);
        let failures = self.state.failure_count.fetch_add(1, Ordering::AcqRel) + 1;

        match current {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.state.success_count.store(0, Ordering::Release);
                    self.state.opened_at_millis.store(self.now_millis(), Ordering::Release);
                    tracing::warn!(failures, "Circuit breaker: test failed → open");
                }
            }
            STATE_CLOSED => {
                if failures >= self.config.failure_threshold.resolve()
                    && self
                        .state
                        .state
                        .compare_exchange(
                            STATE_CLOSED,
                            STATE_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    self.state.opened_at_millis.store(self.now_millis(), Ordering::Release);
                    tracing::warn!(
                        failures,
                        threshold = self.config.failure_threshold.resolve(),
                        "Circuit breaker → open"
                    );
                }
            }
            _ => {}
        }
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}

use crate::telemetry::{emit_best_effort, CircuitBreakerEvent, NullSink, PolicyEvent, RequestOutcome};
use futures::future::BoxFuture;
use tower_layer::Layer;
use tower_service::Service;

/// Tower-native circuit breaker layer with optional telemetry.
#[derive(Clone)]
pub struct CircuitBreakerLayer<Sink = NullSink> {
    policy: CircuitBreakerPolicy,
    sink: Sink,
}

impl CircuitBreakerLayer<NullSink> {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreakerLayer { policy: CircuitBreakerPolicy::with_config(config), sink: NullSink }
    }

    pub fn from_policy(policy: CircuitBreakerPolicy) -> Self {
        CircuitBreakerLayer { policy, sink: NullSink }
    }
}

impl<Sink> CircuitBreakerLayer<Sink>
where
    Sink: Clone,
{
    pub fn with_sink<NewSink: Clone>(self, sink: NewSink) -> CircuitBreakerLayer<NewSink> {
        CircuitBreakerLayer { policy: self.policy, sink }
    }
}

#[derive(Clone)]
pub struct CircuitBreakerService<S, Sink = NullSink> {
    inner: S,
    policy: CircuitBreakerPolicy,
    sink: Sink,
}

impl<S, Sink> Layer<S> for CircuitBreakerLayer<Sink>
where
    Sink: Clone,
{
    type Service = CircuitBreakerService<S, Sink>;
    fn layer(&self, service: S) -> Self::Service {
        CircuitBreakerService { inner: service, policy: self.policy.clone(), sink: self.sink.clone() }
    }
}

impl<S, Request, Sink> Service<Request> for CircuitBreakerService<S, Sink>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Request: Clone + Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
    S::Response: Send + 'static,
    Sink: tower::Service<PolicyEvent, Response = ()> + Clone + Send + 'static,
    Sink::Error: std::error::Error + Send + 'static,
    Sink::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = ResilienceError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(ResilienceError::Inner)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let mut inner = self.inner.clone();
        let policy = self.policy.clone();
        let sink = self.sink.clone();
        let state_before = policy.current_state();

        Box::pin(async move {
            let result = policy
                .execute(|| {
                    let fut = inner.call(req.clone());
                    async move { fut.await.map_err(ResilienceError::Inner) }
                })
                .await;

            let state_after = policy.current_state();
            match (&result, state_before, state_after) {
                (_, CircuitState::Closed, CircuitState::Open)
                | (_, CircuitState::HalfOpen, CircuitState::Open) => {
                    emit_best_effort(
                        sink.clone(),
                        PolicyEvent::CircuitBreaker(CircuitBreakerEvent::Opened {
                            failure_count: match &result {
                                Err(ResilienceError::CircuitOpen { failure_count, .. }) => {
                                    *failure_count
                                }
                                _ => 0,
                            },
                        }),
                    )
                    .await;
                }
                (_, CircuitState::Open, CircuitState::HalfOpen) => {
                    emit_best_effort(sink.clone(), PolicyEvent::CircuitBreaker(CircuitBreakerEvent::HalfOpen))
                        .await;
                }
                (_, CircuitState::HalfOpen, CircuitState::Closed) => {
                    emit_best_effort(sink.clone(), PolicyEvent::CircuitBreaker(CircuitBreakerEvent::Closed))
                        .await;
                }
                _ => {}
            }

            match &result {
                Ok(_) => {
                    emit_best_effort(
                        sink.clone(),
                        PolicyEvent::Request(RequestOutcome::Success { duration: Duration::ZERO }),
                    )
                    .await;
                }
                Err(_) => {
                    emit_best_effort(
                        sink.clone(),
                        PolicyEvent::Request(RequestOutcome::Failure { duration: Duration::ZERO }),
                    )
                    .await;
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    #[tokio::test]
    async fn test_circuit_starts_closed() {
        let breaker = CircuitBreakerPolicy::new(3, Duration::from_secs(1));
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result = breaker
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ResilienceError<TestError>>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_circuit_opens_after_threshold_failures() {
        let breaker = CircuitBreakerPolicy::new(3, Duration::from_secs(10));
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter_clone = counter.clone();
            let _ = breaker
                .execute(|| {
                    let counter = counter_clone.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(ResilienceError::Inner(TestError("fail".to_string())))
                    }
                })
                .await;
        }

        assert_eq!(counter.load(Ordering::SeqCst), 3, "Should have executed 3 times");
        assert_eq!(breaker.current_state(), CircuitState::Open);

        counter.store(0, Ordering::SeqCst);
        let counter_clone = counter.clone();
        let result = breaker
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ResilienceError<TestError>>(42)
                }
            })
            .await;

        assert!(result.is_err());
        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(counter.load(Ordering::SeqCst), 0, "Should not execute when circuit is open");
    }

    #[tokio::test]
    async fn test_circuit_transitions_to_half_open_after_timeout() {
        let clock = TestClock::new();
        let breaker =
            CircuitBreakerPolicy::new(2, Duration::from_millis(100)).with_clock(clock.clone());
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let counter_clone = counter.clone();
            let _ = breaker
                .execute(|| {
                    let counter = counter_clone.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(ResilienceError::Inner(TestError("fail".to_string())))
                    }
                })
                .await;
        }

        counter.store(0, Ordering::SeqCst);
        let counter_clone = counter.clone();
        let result = breaker
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ResilienceError<TestError>>(42)
                }
            })
            .await;
        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        clock.advance(Duration::from_millis(150));

        counter.store(0, Ordering::SeqCst);
        let counter_clone = counter.clone();
        let result = breaker
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ResilienceError<TestError>>(100)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 100);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "Should execute in half-open state");
    }

    #[tokio::test]
    async fn test_circuit_closes_after_successful_half_open_test() {
        let clock = TestClock::new();
        let breaker =
            CircuitBreakerPolicy::new(2, Duration::from_millis(100)).with_clock(clock.clone());
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let counter_clone = counter.clone();
            let _ = breaker
                .execute(|| {
                    let counter = counter_clone.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(ResilienceError::Inner(TestError("fail".to_string())))
                    }
                })
                .await;
        }

        clock.advance(Duration::from_millis(150));
        let counter_clone = counter.clone();
        let _ = breaker
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ResilienceError<TestError>>(42)
                }
            })
            .await;

        assert_eq!(breaker.current_state(), CircuitState::Closed);

        counter.store(0, Ordering::SeqCst);
        for _ in 0..5 {
            let counter_clone = counter.clone();
            let result = breaker
                .execute(|| {
                    let counter = counter_clone.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, ResilienceError<TestError>>(42)
                    }
                })
                .await;
            assert!(result.is_ok());
        }
        assert_eq!(counter.load(Ordering::SeqCst), 5, "All calls should succeed when closed");
    }

    #[tokio::test]
    async fn test_half_open_requires_success_threshold_consecutive_successes() {
        let clock = TestClock::new();
        let breaker = CircuitBreakerPolicy::new(1, Duration::from_millis(100))
            .with_clock(clock.clone())
            .with_success_threshold(2)
            .with_half_open_limit(1);

        let _ = breaker
            .execute(|| async {
                Err::<(), _>(ResilienceError::Inner(TestError("fail".to_string())))
            })
            .await;
        clock.advance(Duration::from_millis(150));

        // First half-open success: not enough on its own.
        let _ = breaker.execute(|| async { Ok::<_, ResilienceError<TestError>>(1) }).await;
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);

        // Second consecutive half-open success closes the circuit.
        let _ = breaker.execute(|| async { Ok::<_, ResilienceError<TestError>>(2) }).await;
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_circuit_reopens_if_half_open_test_fails() {
        let clock = TestClock::new();
        let breaker =
            CircuitBreakerPolicy::new(2, Duration::from_millis(100)).with_clock(clock.clone());

        for _ in 0..2 {
            let _ = breaker
                .execute(|| async {
                    Err::<(), _>(ResilienceError::Inner(TestError("fail".to_string())))
                })
                .await;
        }

        clock.advance(Duration::from_millis(150));
        let _ = breaker
            .execute(|| async {
                Err::<(), _>(ResilienceError::Inner(TestError("fail again".to_string())))
            })
            .await;

        let result = breaker.execute(|| async { Ok::<_, ResilienceError<TestError>>(42) }).await;

        assert!(result.is_err());
        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(breaker.current_state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_limits_concurrent_calls() {
        let clock = TestClock::new();
        let breaker = CircuitBreakerPolicy::new(2, Duration::from_millis(100))
            .with_clock(clock.clone())
            .with_half_open_limit(1);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let _ = breaker
                .execute(|| async {
                    Err::<(), _>(ResilienceError::Inner(TestError("fail".to_string())))
                })
                .await;
        }

        clock.advance(Duration::from_millis(150));

        let mut handles = vec![];
        for _ in 0..3 {
            let breaker_clone = breaker.clone();
            let counter_clone = counter.clone();
            let handle = tokio::spawn(async move {
                breaker_clone
                    .execute(|| {
                        let counter = counter_clone.clone();
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, ResilienceError<TestError>>(42)
                        }
                    })
                    .await
            });
            handles.push(handle);
        }

        let results: Vec<_> = futures::future::join_all(handles).await;

        let successes = results.iter().filter(|r| r.as_ref().unwrap().is_ok()).count();
        let circuit_opens = results
            .iter()
            .filter(|r| r.as_ref().unwrap().as_ref().err().map_or(false, |e| e.is_circuit_open()))
            .count();

        assert_eq!(successes, 1, "Only 1 call should succeed in half-open");
        assert_eq!(circuit_opens, 2, "Other 2 calls should be rejected");
    }

    #[tokio::test]
    async fn test_disabled_circuit_breaker_never_opens() {
        let breaker = CircuitBreakerPolicy::with_config(CircuitBreakerConfig::disabled());
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..1000 {
            let counter_clone = counter.clone();
            let _ = breaker
                .execute(|| {
                    let counter = counter_clone.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(ResilienceError::Inner(TestError("fail".to_string())))
                    }
                })
                .await;
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1000, "All calls should execute with disabled breaker");

        counter.store(0, Ordering::SeqCst);
        let counter_clone = counter.clone();
        let result = breaker
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ResilienceError<TestError>>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_successes_in_closed_state_reset_failure_count() {
        let breaker = CircuitBreakerPolicy::new(3, Duration::from_secs(1));

        for _ in 0..2 {
            let _ = breaker
                .execute(|| async {
                    Err::<(), _>(ResilienceError::Inner(TestError("fail".to_string())))
                })
                .await;
        }

        let _ = breaker.execute(|| async { Ok::<_, ResilienceError<TestError>>(42) }).await;

        for _ in 0..2 {
            let result = breaker
                .execute(|| async {
                    Err::<(), _>(ResilienceError::Inner(TestError("fail".to_string())))
                })
                .await;
            assert!(result.is_err());
            if let Err(ResilienceError::Inner(_)) = result {
                // correct: the operation failed, not the circuit
            } else {
                panic!("Expected Inner error, not circuit open");
            }
        }
    }

    #[tokio::test]
    async fn test_custom_clock_allows_instant_recovery() {
        let clock = TestClock::new();
        let breaker =
            CircuitBreakerPolicy::new(1, Duration::from_millis(100)).with_clock(clock.clone());

        let _ = breaker
            .execute(|| async {
                Err::<(), _>(ResilienceError::Inner(TestError("fail".to_string())))
            })
            .await;

        let open_result =
            breaker.execute(|| async { Ok::<_, ResilienceError<TestError>>(()) }).await;
        assert!(open_result.unwrap_err().is_circuit_open());

        clock.advance(Duration::from_millis(150));

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let success = breaker
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ResilienceError<TestError>>(42)
                }
            })
            .await;

        assert_eq!(success.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn config_builder_rejects_zero_thresholds() {
        assert_eq!(
            CircuitBreakerConfig::builder().failure_threshold(0).build().unwrap_err(),
            CircuitBreakerError::ZeroFailureThreshold
        );
        assert_eq!(
            CircuitBreakerConfig::builder().success_threshold(0).build().unwrap_err(),
            CircuitBreakerError::ZeroSuccessThreshold
        );
        assert_eq!(
            CircuitBreakerConfig::builder().half_open_max_calls(0).build().unwrap_err(),
            CircuitBreakerError::ZeroHalfOpenLimit
        );
    }

    #[test]
    fn reset_clears_state() {
        let breaker = CircuitBreakerPolicy::new(1, Duration::from_secs(30));
        breaker.on_failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);
        breaker.reset();
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }
}
