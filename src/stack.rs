//! Resilience stack builder for composing policies.
//!
//! Composition order is fixed: `Timeout -> Bulkhead -> CircuitBreaker -> Retry -> operation`.
//! Retry must sit innermost because [`RetryPolicy::execute`] requires its action
//! closure to return a bare `Result<T, E>`; the other three policies uniformly
//! consume and produce `Result<T, ResilienceError<E>>`, so they can wrap each
//! other (and retry) in any order without a type mismatch. This builder fixes
//! one such order as the default stack.

use crate::{
    BulkheadPolicy, CircuitBreakerConfig, CircuitBreakerPolicy, ResilienceError, RetryPolicy,
    TimeoutError, TimeoutPolicy,
};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
pub struct ResilienceStack<E> {
    pub(crate) timeout: TimeoutPolicy,
    pub(crate) bulkhead: BulkheadPolicy,
    pub(crate) circuit_breaker: CircuitBreakerPolicy,
    pub(crate) retry: RetryPolicy<E>,
}

impl<E> ResilienceStack<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new() -> ResilienceStackBuilder<E> {
        ResilienceStackBuilder::new()
    }

    /// Execute `operation` through the full stack. Unlike the individual
    /// policies, `operation` returns a bare `Result<T, E>` — retry is the
    /// innermost layer and owns converting failures into [`ResilienceError`].
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let op_cell = Arc::new(Mutex::new(operation));
        let retry = self.retry.clone();
        let circuit_breaker = self.circuit_breaker.clone();
        let bulkhead = self.bulkhead.clone();
        let timeout = self.timeout.clone();

        timeout
            .execute(|| {
                let op_cell = op_cell.clone();
                let bulkhead = bulkhead.clone();
                let circuit_breaker = circuit_breaker.clone();
                let retry = retry.clone();

                async move {
                    bulkhead
                        .execute(|| {
                            let op_cell = op_cell.clone();
                            let circuit_breaker = circuit_breaker.clone();
                            let retry = retry.clone();

                            async move {
                                circuit_breaker
                                    .execute(|| {
                                        let op_cell = op_cell.clone();
                                        let retry = retry.clone();

                                        async move {
                                            retry
                                                .execute(
                                                    || {
                                                        let mut op =
                                                            op_cell.lock().unwrap_or_else(|p| p.into_inner());
                                                        op()
                                                    },
                                                    None,
                                                )
                                                .await
                                        }
                                    })
                                    .await
                            }
                        })
                        .await
                }
            })
            .await
    }
}

impl<E> Default for ResilienceStack<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn default() -> Self {
        ResilienceStackBuilder::new().build().expect("default stack config is always valid")
    }
}

/// Errors from assembling a [`ResilienceStack`] via [`ResilienceStackBuilder`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StackError {
    #[error("invalid timeout configuration: {0}")]
    Timeout(#[from] TimeoutError),
}

pub struct ResilienceStackBuilder<E> {
    timeout: Option<Result<TimeoutPolicy, TimeoutError>>,
    bulkhead: Option<BulkheadPolicy>,
    circuit_breaker: Option<CircuitBreakerPolicy>,
    retry: Option<RetryPolicy<E>>,
}

impl<E> ResilienceStackBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { timeout: None, bulkhead: None, circuit_breaker: None, retry: None }
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(TimeoutPolicy::new(duration));
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.timeout = Some(TimeoutPolicy::new(Duration::from_secs(u64::MAX / 1000)));
        self
    }

    pub fn bulkhead(mut self, max_concurrent: usize) -> Self {
        self.bulkhead = Some(BulkheadPolicy::new(max_concurrent));
        self
    }

    pub fn bulkhead_with_queue(mut self, max_concurrent: usize, queue_limit: usize) -> Self {
        self.bulkhead = Some(BulkheadPolicy::with_queue(max_concurrent, queue_limit));
        self
    }

    pub fn unlimited_bulkhead(mut self) -> Self {
        self.bulkhead = Some(BulkheadPolicy::unlimited());
        self
    }

    pub fn circuit_breaker(mut self, failures: usize, timeout: Duration) -> Self {
        self.circuit_breaker = Some(CircuitBreakerPolicy::new(failures, timeout));
        self
    }

    pub fn circuit_breaker_with_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(CircuitBreakerPolicy::with_config(config));
        self
    }

    pub fn no_circuit_breaker(mut self) -> Self {
        self.circuit_breaker =
            Some(CircuitBreakerPolicy::with_config(CircuitBreakerConfig::disabled()));
        self
    }

    pub fn retry(mut self, policy: RetryPolicy<E>) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn build(self) -> Result<ResilienceStack<E>, StackError> {
        let timeout = match self.timeout {
            Some(result) => result?,
            None => TimeoutPolicy::new(Duration::from_secs(30))?,
        };
        Ok(ResilienceStack {
            timeout,
            bulkhead: self.bulkhead.unwrap_or_else(|| BulkheadPolicy::new(100)),
            circuit_breaker: self
                .circuit_breaker
                .unwrap_or_else(|| CircuitBreakerPolicy::new(5, Duration::from_secs(60))),
            retry: self.retry.unwrap_or_else(|| {
                RetryPolicy::builder().build().expect("default retry config is always valid")
            }),
        })
    }
}

impl<E> Default for ResilienceStackBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Backoff;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    #[tokio::test]
    async fn default_stack_executes_successful_operation() {
        let stack: ResilienceStack<TestError> = ResilienceStack::new().build().unwrap();
        let result = stack.execute(|| async { Ok::<_, TestError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retry_runs_innermost_and_recovers_transient_failures() {
        let retry = RetryPolicy::builder()
            .max_attempts(3)
            .unwrap()
            .backoff(Backoff::constant(Duration::from_millis(1)))
            .build()
            .unwrap();
        let stack: ResilienceStack<TestError> =
            ResilienceStack::new().retry(retry).bulkhead(10).timeout(Duration::from_secs(5)).build().unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let result = stack
            .execute(move || {
                let calls = calls2.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(TestError("transient".to_string()))
                    } else {
                        Ok(99)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn bulkhead_rejection_surfaces_through_the_stack() {
        let stack: ResilienceStack<TestError> =
            ResilienceStack::new().bulkhead(1).timeout(Duration::from_secs(5)).build().unwrap();

        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let stack2 = stack.clone();
        let barrier2 = barrier.clone();
        let holder = tokio::spawn(async move {
            stack2
                .execute(|| {
                    let barrier = barrier2.clone();
                    async move {
                        barrier.wait().await;
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, TestError>(())
                    }
                })
                .await
        });
        barrier.wait().await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let result = stack.execute(|| async { Ok::<_, TestError>(()) }).await;
        assert!(result.unwrap_err().is_bulkhead());
        holder.await.unwrap().unwrap();
    }

    #[test]
    fn builder_propagates_invalid_timeout_as_stack_error() {
        let err: StackError = ResilienceStackBuilder::<TestError>::new()
            .timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, StackError::Timeout(TimeoutError::ZeroDuration)));
    }
}
