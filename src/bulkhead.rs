//! Bulkhead implementation for concurrency limiting.
//!
//! Admission has two modes, chosen at construction:
//! - `queue_limit == 0`: immediate admit-or-reject (no waiting).
//! - `queue_limit > 0`: up to `queue_limit` callers may wait in a FIFO queue
//!   for a permit to free up before being rejected.

use crate::adaptive::Adaptive;
use crate::resolvable::Resolvable;
use crate::ResilienceError;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

#[derive(Clone)]
pub struct BulkheadPolicy {
    semaphore: Arc<Semaphore>,
    limit: Resolvable<usize>,
    limit_adaptive: Adaptive<usize>,
    queue_limit: Resolvable<usize>,
    queued: Arc<AtomicUsize>,
    // Permits the semaphore is currently sized for. Diverges from `limit`
    // between a live write and the next release when the limit shrinks.
    capacity: Arc<AtomicUsize>,
    // Permits still owed to a shrink: released permits are forgotten instead
    // of returned to the pool until this reaches zero (§4.6 soft shrink).
    pending_shrink: Arc<AtomicUsize>,
}

impl BulkheadPolicy {
    /// Bulkhead with immediate admit-or-reject semantics (no queueing).
    pub fn new(max_concurrent: usize) -> Self {
        Self::with_queue(max_concurrent, 0)
    }

    /// Bulkhead that additionally allows up to `queue_limit` callers to wait
    /// for a permit before being rejected.
    pub fn with_queue(max_concurrent: usize, queue_limit: usize) -> Self {
        let adaptive = Adaptive::new(max_concurrent);
        let limit = Resolvable::producer({
            let adaptive = adaptive.clone();
            move || *adaptive.get()
        });
        let mut policy = Self::with_resolvable(limit, Resolvable::value(queue_limit));
        policy.limit_adaptive = adaptive;
        policy
    }

    /// Bulkhead whose `limit` and `queue_limit` are re-resolved on every
    /// admission attempt, so a live-bound source (see [`crate::control`]) can
    /// reshape concurrency without rebuilding the policy. Growing applies
    /// immediately; shrinking never cancels in-flight work — surplus permits
    /// are reclaimed as holders release them, so new admissions simply wait
    /// longer until the active count drops under the new limit.
    pub fn with_resolvable(limit: Resolvable<usize>, queue_limit: Resolvable<usize>) -> Self {
        let initial = limit.resolve();
        Self {
            semaphore: Arc::new(Semaphore::new(initial)),
            limit,
            limit_adaptive: Adaptive::new(initial),
            queue_limit,
            queued: Arc::new(AtomicUsize::new(0)),
            capacity: Arc::new(AtomicUsize::new(initial)),
            pending_shrink: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unlimited() -> Self {
        // Semaphore::MAX_PERMITS is approximately usize::MAX / 4
        // Use a large but safe value: 1 billion concurrent operations
        Self::new(1_000_000_000)
    }

    pub fn max_concurrent(&self) -> usize {
        self.limit.resolve()
    }

    /// Handle for retuning `max_concurrent` live.
    ///
    /// Bound to the resolvable set by [`Self::new`]/[`Self::with_queue`] at
    /// construction; writes through this handle are picked up on the next
    /// admission attempt. A policy built via [`Self::with_resolvable`] gets a
    /// detached snapshot handle instead, since its limit may not be backed by
    /// an `Adaptive` at all.
    pub fn adaptive_max_concurrent(&self) -> Adaptive<usize> {
        self.limit_adaptive.clone()
    }

    pub fn queue_limit(&self) -> usize {
        self.queue_limit.resolve()
    }

    /// Number of callers currently parked waiting for a permit.
    pub fn queued_count(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Reconcile the semaphore's real permit count with `target`. Called at
    /// the start of every admission attempt (the bulkhead's resolution
    /// point, §4.2).
    fn reconcile(&self, target: usize) {
        let current = self.capacity.load(Ordering::SeqCst);
        if target > current {
            self.semaphore.add_permits(target - current);
            self.capacity.store(target, Ordering::SeqCst);
        } else if target < current {
            self.capacity.store(target, Ordering::SeqCst);
            self.pending_shrink.fetch_add(current - target, Ordering::SeqCst);
        }
    }

    /// Release an admitted permit, forgetting it instead of returning it to
    /// the pool if a live shrink is still owed.
    fn release(&self, permit: SemaphorePermit<'_>) {
        loop {
            let pending = self.pending_shrink.load(Ordering::SeqCst);
            if pending == 0 {
                drop(permit);
                return;
            }
            if self
                .pending_shrink
                .compare_exchange(pending, pending - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                permit.forget();
                return;
            }
        }
    }

    pub async fn execute<T, E, Fut, Op>(&self, mut operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        E: std::error::Error + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let max_concurrent = self.limit.resolve();
        self.reconcile(max_concurrent);
        let queue_limit = self.queue_limit.resolve();

        let available = self.semaphore.available_permits();
        let in_flight = max_concurrent.saturating_sub(available);

        let permit = if available > 0 || queue_limit == 0 {
            self.semaphore.try_acquire().map_err(|_| {
                tracing::warn!(in_flight, max = max_concurrent, "bulkhead rejected: at capacity");
                ResilienceError::Bulkhead { in_flight, max: max_concurrent }
            })?
        } else {
            let queued = self.queued.fetch_add(1, Ordering::AcqRel);
            if queued >= queue_limit {
                self.queued.fetch_sub(1, Ordering::AcqRel);
                tracing::warn!(in_flight, max = max_concurrent, queue_limit, "bulkhead rejected: queue full");
                return Err(ResilienceError::Bulkhead { in_flight, max: max_concurrent });
            }
            tracing::debug!(queued = queued + 1, queue_limit, "bulkhead enqueued, waiting for a permit");
            let permit = self.semaphore.acquire().await.expect("bulkhead semaphore never closes");
            self.queued.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!("bulkhead dequeued, permit acquired");
            permit
        };

        let result = operation().await;
        self.release(permit);
        result
    }
}

use crate::telemetry::{emit_best_effort, BulkheadEvent, NullSink, PolicyEvent, RequestOutcome};
use futures::future::BoxFuture;
use tower_layer::Layer;
use tower_service::Service;

/// Tower-native bulkhead layer with optional telemetry.
#[derive(Clone)]
pub struct BulkheadLayer<Sink = NullSink> {
    policy: BulkheadPolicy,
    sink: Sink,
}

impl BulkheadLayer<NullSink> {
    pub fn new(max_concurrent: usize) -> Self {
        BulkheadLayer { policy: BulkheadPolicy::new(max_concurrent), sink: NullSink }
    }

    pub fn with_queue(max_concurrent: usize, queue_limit: usize) -> Self {
        BulkheadLayer { policy: BulkheadPolicy::with_queue(max_concurrent, queue_limit), sink: NullSink }
    }
}

impl<Sink> BulkheadLayer<Sink>
where
    Sink: Clone,
{
    pub fn with_sink<NewSink: Clone>(self, sink: NewSink) -> BulkheadLayer<NewSink> {
        BulkheadLayer { policy: self.policy, sink }
    }
}

#[derive(Clone)]
pub struct BulkheadService<S, Sink = NullSink> {
    inner: S,
    policy: BulkheadPolicy,
    sink: Sink,
}

impl<S, Sink> Layer<S> for BulkheadLayer<Sink>
where
    Sink: Clone,
{
    type Service = BulkheadService<S, Sink>;
    fn layer(&self, service: S) -> Self::Service {
        BulkheadService { inner: service, policy: self.policy.clone(), sink: self.sink.clone() }
    }
}

impl<S, Request, Sink> Service<Request> for BulkheadService<S, Sink>
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
            let result = policy
                .execute(|| {
                    let fut = inner.call(req.clone());
                    async move { fut.await.map_err(ResilienceError::Inner) }
                })
                .await;

            match &result {
                Ok(_) => {
                    emit_best_effort(
                        sink.clone(),
                        PolicyEvent::Request(RequestOutcome::Success { duration: start.elapsed() }),
                    )
                    .await;
                }
                Err(ResilienceError::Bulkhead { in_flight, max }) => {
                    emit_best_effort(
                        sink.clone(),
                        PolicyEvent::Bulkhead(BulkheadEvent::Rejected {
                            active_count: *in_flight,
                            max_concurrency: *max,
                        }),
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
