//! Local, clock-driven token-bucket policy with a FIFO wait queue.
//!
//! Unlike [`crate::rate_limit::strategies::TokenBucket`] (a pluggable,
//! possibly-distributed limiter reached through the [`crate::rate_limit::RateLimiter`]
//! trait), `RateLimitPolicy` is a self-contained policy in the same shape as
//! [`crate::retry::RetryPolicy`]/[`crate::bulkhead::BulkheadPolicy`]: it owns its
//! bucket state, is driven by an injected [`Clock`], and exposes `execute`
//! directly.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::clock::{Clock, MonotonicClock};
use crate::resolvable::Resolvable;
use crate::ResilienceError;

struct BucketState {
    tokens: f64,
    last_refill_millis: u64,
    queue: VecDeque<oneshot::Sender<()>>,
    pump_running: bool,
}

/// Token-bucket rate limiter: `rate` tokens per second, up to `burst` banked.
/// Calls beyond the bucket either queue (FIFO, up to `queue_limit`) for the
/// next refill or are rejected with `RateLimited`.
#[derive(Clone)]
pub struct RateLimitPolicy {
    rate: Resolvable<f64>,
    burst: Resolvable<f64>,
    queue_limit: Resolvable<usize>,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<BucketState>>,
}

impl RateLimitPolicy {
    /// `rate` tokens/second, up to `burst` banked, no queueing.
    pub fn new(rate: f64, burst: f64) -> Self {
        Self::with_queue(rate, burst, 0)
    }

    pub fn with_queue(rate: f64, burst: f64, queue_limit: usize) -> Self {
        Self::with_resolvable(Resolvable::value(rate), Resolvable::value(burst), Resolvable::value(queue_limit))
    }

    /// Rate limiter whose `rate`/`burst`/`queue_limit` are re-read once per
    /// `execute` call, matching the once-per-call resolution timing of
    /// timeout and hedge (§4.2).
    pub fn with_resolvable(
        rate: Resolvable<f64>,
        burst: Resolvable<f64>,
        queue_limit: Resolvable<usize>,
    ) -> Self {
        let burst_value = burst.resolve();
        Self {
            rate,
            burst,
            queue_limit,
            clock: Arc::new(MonotonicClock::default()),
            state: Arc::new(Mutex::new(BucketState {
                tokens: burst_value,
                last_refill_millis: 0,
                queue: VecDeque::new(),
                pump_running: false,
            })),
        }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn rate(&self) -> f64 {
        self.rate.resolve()
    }

    pub fn burst(&self) -> f64 {
        self.burst.resolve()
    }

    pub fn queue_limit(&self) -> usize {
        self.queue_limit.resolve()
    }

    fn refill_locked(&self, state: &mut BucketState, rate: f64, burst: f64) {
        let now = self.clock.now_millis();
        let elapsed = now.saturating_sub(state.last_refill_millis);
        if elapsed > 0 {
            state.tokens = (state.tokens + (elapsed as f64) * rate / 1000.0).min(burst);
            state.last_refill_millis = now;
        }
    }

    fn try_acquire_locked(&self, state: &mut BucketState, rate: f64, burst: f64) -> bool {
        self.refill_locked(state, rate, burst);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn ms_until_token_locked(state: &BucketState, rate: f64) -> u64 {
        if rate <= 0.0 {
            return u64::MAX;
        }
        let missing = (1.0 - state.tokens).max(0.0);
        (missing * 1000.0 / rate).ceil() as u64
    }

    /// Run `action` once a token is available, queueing (or rejecting) if
    /// the bucket is currently empty.
    pub async fn execute<T, E, Fut, Op>(&self, mut operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        E: std::error::Error + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let rate = self.rate.resolve();
        let burst = self.burst.resolve();
        let queue_limit = self.queue_limit.resolve();

        let acquired = {
            let mut state = self.state.lock().expect("rate limit state lock poisoned");
            self.try_acquire_locked(&mut state, rate, burst)
        };

        if acquired {
            return operation().await.map_err(ResilienceError::Inner);
        }

        let (tx, rx) = oneshot::channel();
        let should_spawn_pump = {
            let mut state = self.state.lock().expect("rate limit state lock poisoned");
            if state.queue.len() >= queue_limit {
                let retry_after = Duration::from_millis(Self::ms_until_token_locked(&state, rate));
                tracing::warn!(queue_limit, "rate limiter rejected: queue full");
                return Err(ResilienceError::RateLimited { retry_after });
            }
            let was_empty = state.queue.is_empty() && !state.pump_running;
            state.queue.push_back(tx);
            if was_empty {
                state.pump_running = true;
            }
            tracing::debug!(queued = state.queue.len(), "rate limiter queued caller");
            was_empty
        };

        if should_spawn_pump {
            let pump = self.clone();
            tokio::spawn(async move { pump.run_pump().await });
        }

        let _ = rx.await;
        operation().await.map_err(ResilienceError::Inner)
    }

    /// Repeatedly sleep until the next token is due, then drain as many
    /// queued waiters as tokens allow, until the queue empties.
    async fn run_pump(&self) {
        loop {
            let rate = self.rate.resolve();
            let burst = self.burst.resolve();
            let wait_ms = {
                let state = self.state.lock().expect("rate limit state lock poisoned");
                if state.queue.is_empty() {
                    break;
                }
                Self::ms_until_token_locked(&state, rate)
            };
            if wait_ms == u64::MAX {
                // rate <= 0: nothing will ever refill; drop the queue rather
                // than sleep forever.
                let mut state = self.state.lock().expect("rate limit state lock poisoned");
                state.queue.clear();
                state.pump_running = false;
                break;
            }
            self.clock.sleep(Duration::from_millis(wait_ms), None).await;

            let mut state = self.state.lock().expect("rate limit state lock poisoned");
            self.refill_locked(&mut state, rate, burst);
            while state.tokens >= 1.0 {
                match state.queue.pop_front() {
                    Some(tx) => {
                        state.tokens -= 1.0;
                        let _ = tx.send(());
                        tracing::debug!("rate limiter dequeued waiter");
                    }
                    None => break,
                }
            }
            if state.queue.is_empty() {
                state.pump_running = false;
                break;
            }
        }
    }
}

use crate::telemetry::{emit_best_effort, NullSink, PolicyEvent, RateLimitEvent, RequestOutcome};
use futures::future::BoxFuture;
use tower_layer::Layer;
use tower_service::Service;

/// Tower-native layer wrapping [`RateLimitPolicy`], in the same shape as the
/// other policy layers (`RetryLayer`, `TimeoutLayer`, ...).
#[derive(Clone)]
pub struct RateLimitPolicyLayer<Sink = NullSink> {
    policy: RateLimitPolicy,
    sink: Sink,
}

impl RateLimitPolicyLayer<NullSink> {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self { policy, sink: NullSink }
    }
}

impl<Sink> RateLimitPolicyLayer<Sink>
where
    Sink: Clone,
{
    pub fn with_sink<NewSink: Clone>(self, sink: NewSink) -> RateLimitPolicyLayer<NewSink> {
        RateLimitPolicyLayer { policy: self.policy, sink }
    }
}

#[derive(Clone)]
pub struct RateLimitPolicyService<S, Sink = NullSink> {
    inner: S,
    policy: RateLimitPolicy,
    sink: Sink,
}

impl<S, Sink> Layer<S> for RateLimitPolicyLayer<Sink>
where
    Sink: Clone,
{
    type Service = RateLimitPolicyService<S, Sink>;
    fn layer(&self, service: S) -> Self::Service {
        RateLimitPolicyService { inner: service, policy: self.policy.clone(), sink: self.sink.clone() }
    }
}

impl<S, Request, Sink> Service<Request> for RateLimitPolicyService<S, Sink>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Request: Send + 'static,
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

        Box::pin(async move {
            let start = std::time::Instant::now();
            let result = policy.execute(|| inner.call(req.clone())).await;

            match &result {
                Ok(_) => {
                    emit_best_effort(
                        sink.clone(),
                        PolicyEvent::Request(RequestOutcome::Success { duration: start.elapsed() }),
                    )
                    .await;
                }
                Err(ResilienceError::RateLimited { .. }) => {
                    emit_best_effort(
                        sink.clone(),
                        PolicyEvent::RateLimit(RateLimitEvent::Rejected {
                            queue_limit: policy.queue_limit(),
                        }),
                    )
                    .await;
                    emit_best_effort(
                        sink.clone(),
                        PolicyEvent::Request(RequestOutcome::Failure { duration: start.elapsed() }),
                    )
                    .await;
                }
                Err(_) => {
                    emit_best_effort(
                        sink.clone(),
                        PolicyEvent::Request(RequestOutcome::Failure { duration: start.elapsed() }),
                    )
                    .await;
                }
            }
            result
        })
    }
}
