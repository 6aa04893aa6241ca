//! Retry policy: re-invoke a failing action with backoff and jitter between
//! attempts.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::adaptive::Adaptive;
use crate::backoff::Backoff;
use crate::clock::{CancellationToken, Clock, MonotonicClock};
use crate::error::{ResilienceError, MAX_RETRY_FAILURES};
use crate::jitter::Jitter;
use crate::resolvable::Resolvable;

/// Error returned when a `RetryPolicy` is misconfigured at build time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("max_attempts must be at least 1, got {0}")]
    InvalidMaxAttempts(usize),
}

/// Retries a failing action up to `max_attempts` times, sleeping between
/// attempts according to `backoff` and `jitter`. Options are [`Resolvable`]
/// and are re-read before every scheduling decision, so a live-bound
/// `RetryPolicy` picks up configuration changes attempt by attempt.
#[derive(Clone)]
pub struct RetryPolicy<E> {
    max_attempts: Resolvable<usize>,
    max_attempts_adaptive: Adaptive<usize>,
    backoff: Resolvable<Backoff>,
    jitter: Resolvable<Jitter>,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    clock: Arc<dyn Clock>,
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl<E> RetryPolicy<E> {
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::default()
    }

    /// Handle for retuning `max_attempts` live.
    ///
    /// Bound to the resolvable set by [`RetryPolicyBuilder::max_attempts`] at
    /// build time; writes through this handle are picked up on the next
    /// scheduling decision. If the policy was instead built with
    /// [`RetryPolicyBuilder::max_attempts_resolvable`], this handle is
    /// detached from the actual resolution source and has no effect.
    pub fn adaptive_max_attempts(&self) -> Adaptive<usize> {
        self.max_attempts_adaptive.clone()
    }

    /// Execute `action`, retrying on failures that `should_retry` accepts.
    pub async fn execute<F, Fut, T>(
        &self,
        mut action: F,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut failures: Vec<E> = Vec::new();
        let mut prev_delay: Option<Duration> = None;
        let total = self.max_attempts.resolve().max(1);

        for attempt in 1..=total {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(ResilienceError::Cancelled);
                }
            }

            match action().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if !(self.should_retry)(&e) {
                        return Err(ResilienceError::Inner(e));
                    }
                    if failures.len() >= MAX_RETRY_FAILURES {
                        failures.remove(0);
                    }
                    failures.push(e);

                    if attempt == total {
                        tracing::warn!(attempts = attempt, "retry exhausted");
                        return Err(ResilienceError::RetryExhausted { attempts: attempt, failures });
                    }

                    let backoff = self.backoff.resolve();
                    let jitter = self.jitter.resolve();
                    let raw = backoff.delay(attempt);
                    let floor = prev_delay.unwrap_or(raw);
                    let actual = jitter.apply_with_state(raw, floor);
                    prev_delay = Some(actual);

                    tracing::debug!(attempt, delay_ms = actual.as_millis() as u64, "retry scheduled");
                    self.clock.sleep(actual, cancel).await;
                }
            }
        }
        unreachable!("loop always returns by the final attempt")
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder<E> {
    max_attempts: Resolvable<usize>,
    max_attempts_adaptive: Adaptive<usize>,
    backoff: Resolvable<Backoff>,
    jitter: Resolvable<Jitter>,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    clock: Arc<dyn Clock>,
}

impl<E> Default for RetryPolicyBuilder<E> {
    fn default() -> Self {
        let max_attempts_adaptive = Adaptive::new(3);
        Self {
            max_attempts: Resolvable::value(3),
            max_attempts_adaptive,
            backoff: Resolvable::value(Backoff::constant(Duration::from_millis(1000))),
            jitter: Resolvable::value(Jitter::None),
            should_retry: Arc::new(|_| true),
            clock: Arc::new(MonotonicClock::default()),
        }
    }
}

impl<E> RetryPolicyBuilder<E> {
    /// Total attempts, including the first (must be >= 1).
    ///
    /// Also seeds the handle returned by [`RetryPolicy::adaptive_max_attempts`]
    /// so the built policy can be retuned live without going through
    /// [`Self::max_attempts_resolvable`].
    pub fn max_attempts(mut self, n: usize) -> Result<Self, BuildError> {
        if n == 0 {
            return Err(BuildError::InvalidMaxAttempts(n));
        }
        let adaptive = Adaptive::new(n);
        self.max_attempts = Resolvable::producer({
            let adaptive = adaptive.clone();
            move || *adaptive.get()
        });
        self.max_attempts_adaptive = adaptive;
        Ok(self)
    }

    /// Bind `max_attempts` to a live-resolvable source.
    pub fn max_attempts_resolvable(mut self, r: Resolvable<usize>) -> Self {
        self.max_attempts = r;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Resolvable::value(backoff);
        self
    }

    pub fn backoff_resolvable(mut self, r: Resolvable<Backoff>) -> Self {
        self.backoff = r;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = Resolvable::value(jitter);
        self
    }

    pub fn jitter_resolvable(mut self, r: Resolvable<Jitter>) -> Self {
        self.jitter = r;
        self
    }

    pub fn should_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(f);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<RetryPolicy<E>, BuildError> {
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            max_attempts_adaptive: self.max_attempts_adaptive,
            backoff: self.backoff,
            jitter: self.jitter,
            should_retry: self.should_retry,
            clock: self.clock,
        })
    }
}

impl<E> RetryPolicy<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Wrap this policy as a tower [`Layer`](tower_layer::Layer) with no telemetry.
    pub fn into_layer(self) -> RetryLayer<E> {
        RetryLayer { policy: self, sink: NullSink }
    }
}

use crate::telemetry::{emit_best_effort, NullSink, PolicyEvent, RequestOutcome, RetryEvent};
use futures::future::BoxFuture;
use tower_layer::Layer;
use tower_service::Service;

/// Tower-native retry layer with optional telemetry.
///
/// Because [`RetryPolicy::execute`] requires the wrapped operation to return a
/// bare `Result<T, E>`, this must sit as the innermost layer wrapping the raw
/// service — composing it outside a `Timeout`/`Bulkhead`/`CircuitBreaker`
/// layer (whose services yield `Result<T, ResilienceError<E>>`) will not
/// type-check, by design.
#[derive(Clone)]
pub struct RetryLayer<E, Sink = NullSink> {
    policy: RetryPolicy<E>,
    sink: Sink,
}

impl<E> RetryLayer<E, NullSink>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new(policy: RetryPolicy<E>) -> Self {
        RetryLayer { policy, sink: NullSink }
    }
}

impl<E, Sink> RetryLayer<E, Sink>
where
    Sink: Clone,
{
    pub fn with_sink<NewSink: Clone>(self, sink: NewSink) -> RetryLayer<E, NewSink> {
        RetryLayer { policy: self.policy, sink }
    }
}

#[derive(Clone)]
pub struct RetryService<S, E, Sink = NullSink> {
    inner: S,
    policy: RetryPolicy<E>,
    sink: Sink,
}

impl<S, E, Sink> Layer<S> for RetryLayer<E, Sink>
where
    E: Clone,
    Sink: Clone,
{
    type Service = RetryService<S, E, Sink>;
    fn layer(&self, service: S) -> Self::Service {
        RetryService { inner: service, policy: self.policy.clone(), sink: self.sink.clone() }
    }
}

impl<S, Request, Sink> Service<Request> for RetryService<S, S::Error, Sink>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Request: Clone + Send + 'static,
    S::Error: std::error::Error + Send + Sync + Clone + 'static,
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

        Box::pin(async move {
            let start = std::time::Instant::now();
            let result = policy
                .execute(|| inner.call(req.clone()), None)
                .await;
            let elapsed = start.elapsed();

            match &result {
                Ok(_) => {
                    emit_best_effort(
                        sink.clone(),
                        PolicyEvent::Request(RequestOutcome::Success { duration: elapsed }),
                    )
                    .await;
                }
                Err(ResilienceError::RetryExhausted { attempts, .. }) => {
                    emit_best_effort(
                        sink.clone(),
                        PolicyEvent::Retry(RetryEvent::Exhausted {
                            total_attempts: *attempts,
                            total_duration: elapsed,
                        }),
                    )
                    .await;
                }
                Err(_) => {
                    emit_best_effort(
                        sink.clone(),
                        PolicyEvent::Request(RequestOutcome::Failure { duration: elapsed }),
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

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct E(&'static str);

    #[tokio::test]
    async fn success_first_attempt() {
        let policy: RetryPolicy<E> = RetryPolicy::builder().max_attempts(3).unwrap().build().unwrap();
        let calls = AtomicUsize::new(0);
        let result = policy
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, E>(1) }
                },
                None,
            )
            .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_after_retries_advances_test_clock() {
        let clock = Arc::new(TestClock::new());
        let policy: RetryPolicy<E> = RetryPolicy::builder()
            .max_attempts(5)
            .unwrap()
            .backoff(Backoff::constant(Duration::from_millis(10)))
            .with_clock(clock.clone())
            .build()
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let clock2 = clock.clone();
        let handle = tokio::spawn(async move {
            policy
                .execute(
                    move || {
                        let n = calls2.fetch_add(1, Ordering::SeqCst);
                        async move { if n < 2 { Err(E("fail")) } else { Ok(42) } }
                    },
                    None,
                )
                .await
        });
        for _ in 0..2 {
            tokio::task::yield_now().await;
            clock2.advance(Duration::from_millis(10));
        }
        let result = handle.await.unwrap();
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_exhaustion_reports_attempts_and_failures() {
        let clock = Arc::new(TestClock::new());
        let policy: RetryPolicy<E> = RetryPolicy::builder()
            .max_attempts(3)
            .unwrap()
            .backoff(Backoff::constant(Duration::from_millis(1)))
            .with_clock(clock.clone())
            .build()
            .unwrap();

        let clock2 = clock.clone();
        let handle = tokio::spawn(async move {
            policy.execute(|| async { Err::<(), _>(E("boom")) }, None).await
        });
        for _ in 0..2 {
            tokio::task::yield_now().await;
            clock2.advance(Duration::from_millis(1));
        }
        let err = handle.await.unwrap().unwrap_err();
        match err {
            ResilienceError::RetryExhausted { attempts, failures } => {
                assert_eq!(attempts, 3);
                assert_eq!(failures.len(), 3);
                assert_eq!(failures.last().unwrap(), &E("boom"));
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn should_retry_predicate_stops_early() {
        let policy: RetryPolicy<E> = RetryPolicy::builder()
            .max_attempts(5)
            .unwrap()
            .should_retry(|e| e.0 != "fatal")
            .build()
            .unwrap();
        let calls = AtomicUsize::new(0);
        let result = policy
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(E("fatal")) }
                },
                None,
            )
            .await;
        assert!(matches!(result, Err(ResilienceError::Inner(E("fatal")))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_inner_errors_never_surface_from_a_bare_retry() {
        let policy: RetryPolicy<E> = RetryPolicy::builder().max_attempts(1).unwrap().build().unwrap();
        let result = policy.execute(|| async { Ok::<_, E>(()) }, None).await;
        assert!(result.is_ok());
    }

    #[test]
    fn zero_max_attempts_rejected() {
        let err = RetryPolicy::<E>::builder().max_attempts(0).unwrap_err();
        assert_eq!(err, BuildError::InvalidMaxAttempts(0));
    }

    #[tokio::test]
    async fn cancellation_short_circuits_before_first_attempt() {
        let policy: RetryPolicy<E> = RetryPolicy::builder().max_attempts(3).unwrap().build().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let calls = AtomicUsize::new(0);
        let result = policy
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, E>(()) }
                },
                Some(&token),
            )
            .await;
        assert!(matches!(result, Err(ResilienceError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
