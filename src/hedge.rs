//! Hedge policy: launch speculative parallel attempts at staggered delays
//! and take whichever settles first, cancelling the rest.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};

use crate::clock::{CancellationToken, Clock, MonotonicClock};
use crate::error::ResilienceError;
use crate::resolvable::Resolvable;

enum AttemptOutcome<T, E> {
    Settled(usize, Result<T, E>),
    Skipped,
}

/// Races up to `1 + max_hedges` attempts of the same action, launching the
/// first immediately and the rest at `delay, 2·delay, 3·delay, …` unless a
/// winner has already settled. `delay` and `max_hedges` are [`Resolvable`]
/// and are re-read once per `execute` call, matching the other once-per-call
/// policies (timeout, rate limit).
#[derive(Clone)]
pub struct HedgePolicy<E> {
    delay: Resolvable<Duration>,
    max_hedges: Resolvable<usize>,
    clock: Arc<dyn Clock>,
    _marker: std::marker::PhantomData<fn() -> E>,
}

impl<E> fmt::Debug for HedgePolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HedgePolicy")
            .field("delay", &self.delay)
            .field("max_hedges", &self.max_hedges)
            .finish_non_exhaustive()
    }
}

impl<E> HedgePolicy<E>
where
    E: Send + 'static,
{
    pub fn new(delay: Duration, max_hedges: usize) -> Self {
        Self::with_resolvable(Resolvable::value(delay), Resolvable::value(max_hedges))
    }

    pub fn with_resolvable(delay: Resolvable<Duration>, max_hedges: Resolvable<usize>) -> Self {
        Self { delay, max_hedges, clock: Arc::new(MonotonicClock::default()), _marker: std::marker::PhantomData }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay.resolve()
    }

    pub fn max_hedges(&self) -> usize {
        self.max_hedges.resolve()
    }

    /// Run `action` under the hedge. `action` receives a fresh
    /// [`CancellationToken`] per attempt; a losing attempt's token is
    /// cancelled as soon as a winner settles, but cancellation is
    /// cooperative — the action decides how (or whether) to honor it.
    pub async fn execute<F, Fut, T>(&self, action: F) -> Result<T, ResilienceError<E>>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
    {
        let delay = self.delay.resolve();
        let max_hedges = self.max_hedges.resolve();
        let total = max_hedges + 1;

        let action = Arc::new(action);
        let finished = Arc::new(AtomicBool::new(false));
        let tokens: Vec<CancellationToken> = (0..total).map(|_| CancellationToken::new()).collect();

        let mut attempts: FuturesUnordered<BoxFuture<'static, AttemptOutcome<T, E>>> = FuturesUnordered::new();
        for (i, token) in tokens.iter().cloned().enumerate() {
            let clock = self.clock.clone();
            let finished = finished.clone();
            let action = action.clone();
            let fut: BoxFuture<'static, AttemptOutcome<T, E>> = Box::pin(async move {
                if i > 0 {
                    clock.sleep(delay * i as u32, Some(&token)).await;
                }
                if finished.load(Ordering::Acquire) {
                    return AttemptOutcome::Skipped;
                }
                tracing::debug!(index = i, "hedge attempt launched");
                let result = action(token).await;
                AttemptOutcome::Settled(i, result)
            });
            attempts.push(fut);
        }

        let mut failures: Vec<Option<E>> = (0..total).map(|_| None).collect();
        let mut settled = 0;

        while let Some(outcome) = attempts.next().await {
            match outcome {
                AttemptOutcome::Skipped => {}
                AttemptOutcome::Settled(_i, Ok(value)) => {
                    finished.store(true, Ordering::Release);
                    for token in &tokens {
                        token.cancel();
                    }
                    return Ok(value);
                }
                AttemptOutcome::Settled(i, Err(e)) => {
                    failures[i] = Some(e);
                    settled += 1;
                }
            }
            if settled == total {
                break;
            }
        }

        let first_failure = failures.into_iter().flatten().next().expect(
            "hedge returns only after every attempt settles or skips, and at least one must fail here",
        );
        Err(ResilienceError::Inner(first_failure))
    }
}

use crate::telemetry::{emit_best_effort, HedgeEvent, NullSink, PolicyEvent, RequestOutcome};
use tower_layer::Layer;
use tower_service::Service;

/// Tower-native hedge layer with optional telemetry. Wraps a service whose
/// requests are cheap to clone and safe to run more than once concurrently.
#[derive(Clone)]
pub struct HedgeLayer<E, Sink = NullSink> {
    policy: HedgePolicy<E>,
    sink: Sink,
}

impl<E> HedgeLayer<E, NullSink>
where
    E: Send + 'static,
{
    pub fn new(policy: HedgePolicy<E>) -> Self {
        HedgeLayer { policy, sink: NullSink }
    }
}

impl<E, Sink> HedgeLayer<E, Sink>
where
    Sink: Clone,
{
    pub fn with_sink<NewSink: Clone>(self, sink: NewSink) -> HedgeLayer<E, NewSink> {
        HedgeLayer { policy: self.policy, sink }
    }
}

#[derive(Clone)]
pub struct HedgeService<S, E, Sink = NullSink> {
    inner: S,
    policy: HedgePolicy<E>,
    sink: Sink,
}

impl<S, E, Sink> Layer<S> for HedgeLayer<E, Sink>
where
    E: Send + 'static,
    Sink: Clone,
{
    type Service = HedgeService<S, E, Sink>;
    fn layer(&self, service: S) -> Self::Service {
        HedgeService { inner: service, policy: self.policy.clone(), sink: self.sink.clone() }
    }
}

impl<S, Request, Sink> Service<Request> for HedgeService<S, S::Error, Sink>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Request: Clone + Send + Sync + 'static,
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
        let inner = self.inner.clone();
        let policy = self.policy.clone();
        let sink = self.sink.clone();

        Box::pin(async move {
            let start = std::time::Instant::now();
            let max_hedges = policy.max_hedges();
            for index in 0..=max_hedges {
                emit_best_effort(sink.clone(), PolicyEvent::Hedge(HedgeEvent::Attempt { index })).await;
            }

            let result = policy
                .execute(move |_cancel| {
                    let mut inner = inner.clone();
                    let req = req.clone();
                    async move { inner.call(req).await }
                })
                .await;
            let elapsed = start.elapsed();

            match &result {
                Ok(_) => {
                    emit_best_effort(
                        sink.clone(),
                        PolicyEvent::Hedge(HedgeEvent::Success { index: 0, duration: elapsed }),
                    )
                    .await;
                    emit_best_effort(
                        sink.clone(),
                        PolicyEvent::Request(RequestOutcome::Success { duration: elapsed }),
                    )
                    .await;
                }
                Err(_) => {
                    emit_best_effort(
                        sink.clone(),
                        PolicyEvent::Hedge(HedgeEvent::Failure { attempts: max_hedges + 1 }),
                    )
                    .await;
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
    use std::sync::atomic::{AtomicUsize, Ordering as AtOrdering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct E(&'static str);

    #[tokio::test]
    async fn primary_success_never_launches_hedges() {
        let policy: HedgePolicy<E> = HedgePolicy::new(Duration::from_millis(50), 2);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let result = policy
            .execute(move |_token| {
                calls2.fetch_add(1, AtOrdering::SeqCst);
                async { Ok::<_, E>(42) }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(AtOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hung_primary_is_overtaken_by_hedge() {
        let clock = Arc::new(TestClock::new());
        let policy: HedgePolicy<E> =
            HedgePolicy::new(Duration::from_millis(10), 1).with_clock(clock.clone());
        let launches = Arc::new(AtomicUsize::new(0));

        let launches2 = launches.clone();
        let handle = tokio::spawn(async move {
            policy
                .execute(move |_token| {
                    let first = launches2.fetch_add(1, AtOrdering::SeqCst) == 0;
                    async move {
                        if first {
                            // The primary attempt never resolves on its own;
                            // only the staggered hedge completes and wins.
                            std::future::pending::<()>().await;
                            unreachable!()
                        }
                        Ok::<_, E>(7)
                    }
                })
                .await
        });
        tokio::task::yield_now().await;
        clock.advance(Duration::from_millis(10));
        let result = handle.await.unwrap();
        assert_eq!(result.unwrap(), 7);
        assert_eq!(launches.load(AtOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn all_attempts_failing_surfaces_primarys_error() {
        let clock = Arc::new(TestClock::new());
        let policy: HedgePolicy<E> =
            HedgePolicy::new(Duration::from_millis(5), 2).with_clock(clock.clone());

        let handle = tokio::spawn(async move {
            policy.execute(|_token| async { Err::<(), _>(E("boom")) }).await
        });
        for _ in 0..2 {
            tokio::task::yield_now().await;
            clock.advance(Duration::from_millis(5));
        }
        let err = handle.await.unwrap().unwrap_err();
        match err {
            ResilienceError::Inner(E(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected Inner(boom), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_hedges_behaves_like_a_single_attempt() {
        let policy: HedgePolicy<E> = HedgePolicy::new(Duration::from_millis(10), 0);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let result = policy
            .execute(move |_token| {
                calls2.fetch_add(1, AtOrdering::SeqCst);
                async { Ok::<_, E>(()) }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(AtOrdering::SeqCst), 1);
    }
}
