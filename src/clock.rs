//! Clock abstractions used by every time-dependent policy.
//!
//! Production code runs on [`MonotonicClock`]; tests run on [`TestClock`], a
//! deterministic virtual clock whose notion of time only advances when
//! explicitly told to, so retry/backoff/circuit-breaker timing assertions
//! never depend on real wall-clock scheduling.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Cooperative cancellation signal shared between a policy and the attempts
/// it supervises. Cloning shares the same underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    wakers: Arc<Mutex<Vec<Waker>>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark this token (and every clone of it) as cancelled.
    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::SeqCst);
        let mut wakers = self.wakers.lock().unwrap_or_else(|p| p.into_inner());
        for waker in wakers.drain(..) {
            waker.wake();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }

    /// Await cancellation. Resolves immediately if already cancelled.
    pub fn cancelled(&self) -> Cancelled<'_> {
        Cancelled { token: self }
    }
}

pub struct Cancelled<'a> {
    token: &'a CancellationToken,
}

impl Future for Cancelled<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.token.is_cancelled() {
            return Poll::Ready(());
        }
        self.token.wakers.lock().unwrap_or_else(|p| p.into_inner()).push(cx.waker().clone());
        // Re-check after registering to avoid a missed wakeup race.
        if self.token.is_cancelled() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Clock abstraction so timing can be faked in tests.
#[async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> u64;

    /// Sleep for `duration`, honoring `cancel` if provided.
    async fn sleep(&self, duration: Duration, cancel: Option<&CancellationToken>);
}

/// Monotonic clock backed by `Instant::now()` and `tokio::time::sleep`.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

#[async_trait]
impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    async fn sleep(&self, duration: Duration, cancel: Option<&CancellationToken>) {
        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = token.cancelled() => {}
                }
            }
            None => tokio::time::sleep(duration).await,
        }
    }
}

/// A single scheduled wakeup inside [`TestClock`].
struct Sleeper {
    trigger_at: u64,
    seq: u64,
    waker_slot: Arc<Mutex<(bool, Option<Waker>)>>,
}

impl PartialEq for Sleeper {
    fn eq(&self, other: &Self) -> bool {
        self.trigger_at == other.trigger_at && self.seq == other.seq
    }
}
impl Eq for Sleeper {}
impl Ord for Sleeper {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the earliest trigger sorts first.
        other.trigger_at.cmp(&self.trigger_at).then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for Sleeper {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct TestClockInner {
    now: u64,
    seq: u64,
    pending: BinaryHeap<Sleeper>,
}

/// Deterministic virtual-time clock for tests.
///
/// `sleep` never touches real time: it registers a waker that fires once
/// [`TestClock::advance`] has moved virtual time past the requested point.
#[derive(Debug, Clone, Default)]
pub struct TestClock {
    inner: Arc<Mutex<TestClockInner>>,
}

impl TestClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance virtual time by `delta`, resolving every sleeper whose trigger
    /// point falls at or before the new time, in trigger order.
    pub fn advance(&self, delta: Duration) {
        let delta_ms = delta.as_millis() as u64;
        let target = {
            let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            inner.now + delta_ms
        };
        loop {
            let next = {
                let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
                match inner.pending.peek() {
                    Some(s) if s.trigger_at <= target => {
                        inner.now = s.trigger_at;
                        inner.pending.pop()
                    }
                    _ => None,
                }
            };
            match next {
                Some(sleeper) => {
                    let mut slot = sleeper.waker_slot.lock().unwrap_or_else(|p| p.into_inner());
                    slot.0 = true;
                    if let Some(w) = slot.1.take() {
                        w.wake();
                    }
                }
                None => break,
            }
        }
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.now = target;
    }

    /// Number of sleepers still waiting for a future `advance`.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).pending.len()
    }
}

struct TestSleep {
    slot: Arc<Mutex<(bool, Option<Waker>)>>,
}

impl Future for TestSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        if slot.0 {
            Poll::Ready(())
        } else {
            slot.1 = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

#[async_trait]
impl Clock for TestClock {
    fn now_millis(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).now
    }

    async fn sleep(&self, duration: Duration, cancel: Option<&CancellationToken>) {
        let slot = Arc::new(Mutex::new((false, None)));
        {
            let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            let trigger_at = inner.now + duration.as_millis() as u64;
            let seq = inner.seq;
            inner.seq += 1;
            if duration.is_zero() {
                let mut s = slot.lock().unwrap_or_else(|p| p.into_inner());
                s.0 = true;
            } else {
                inner.pending.push(Sleeper { trigger_at, seq, waker_slot: slot.clone() });
            }
        }
        let sleep_fut = TestSleep { slot };
        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = sleep_fut => {}
                    _ = token.cancelled() => {}
                }
            }
            None => sleep_fut.await,
        }
    }
}

/// A monotonically increasing counter of milliseconds, for code that just
/// needs "now" without the sleep half of the [`Clock`] contract.
pub fn system_millis_since(start: &AtomicU64) -> u64 {
    start.load(AtomicOrdering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn monotonic_clock_advances() {
        let clock = MonotonicClock::default();
        let t0 = clock.now_millis();
        clock.sleep(Duration::from_millis(5), None).await;
        assert!(clock.now_millis() >= t0);
    }

    #[tokio::test]
    async fn test_clock_sleep_resolves_on_advance() {
        let clock = TestClock::new();
        let done = Arc::new(AtomicBool::new(false));
        let done2 = done.clone();
        let clock2 = clock.clone();
        let handle = tokio::spawn(async move {
            clock2.sleep(Duration::from_millis(100), None).await;
            done2.store(true, AtomicOrdering::SeqCst);
        });
        tokio::task::yield_now().await;
        assert!(!done.load(AtomicOrdering::SeqCst));
        clock.advance(Duration::from_millis(100));
        handle.await.unwrap();
        assert!(done.load(AtomicOrdering::SeqCst));
        assert_eq!(clock.now_millis(), 100);
    }

    #[tokio::test]
    async fn test_clock_orders_sleepers_by_trigger_time() {
        let clock = TestClock::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for (label, ms) in [("b", 20u64), ("a", 10u64), ("c", 30u64)] {
            let clock = clock.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                clock.sleep(Duration::from_millis(ms), None).await;
                order.lock().unwrap().push(label);
            }));
        }
        tokio::task::yield_now().await;
        clock.advance(Duration::from_millis(30));
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn cancellation_token_cancels_pending_sleep() {
        let clock = TestClock::new();
        let token = CancellationToken::new();
        let clock2 = clock.clone();
        let token2 = token.clone();
        let handle = tokio::spawn(async move {
            clock2.sleep(Duration::from_secs(100), Some(&token2)).await;
        });
        tokio::task::yield_now().await;
        token.cancel();
        handle.await.unwrap();
        assert!(token.is_cancelled());
    }
}
