//! Adaptive handles for live-updatable config.
//!
//! Default uses `ArcSwap` for lock-free reads; feature `adaptive-rwlock` can
//! switch to RwLock if desired. Beyond the current value, an `Adaptive<T>`
//! tracks a monotonically increasing version and the millisecond timestamp
//! of its last write, which the live-config registry (`crate::control`)
//! surfaces in every read/write response.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[cfg(feature = "adaptive-rwlock")]
use std::sync::RwLock;

#[cfg(not(feature = "adaptive-rwlock"))]
use arc_swap::ArcSwap;

use crate::clock::{Clock, MonotonicClock};

/// Adaptive<T> gives cheap reads and controlled updates for shared config,
/// with a version counter and last-update timestamp for observability.
#[derive(Debug)]
pub struct Adaptive<T> {
    #[cfg(not(feature = "adaptive-rwlock"))]
    inner: Arc<ArcSwap<T>>,
    #[cfg(feature = "adaptive-rwlock")]
    inner: Arc<RwLock<T>>,
    version: Arc<AtomicU64>,
    updated_at: Arc<AtomicU64>,
    clock: Arc<dyn Clock>,
}

impl<T> Clone for Adaptive<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            version: self.version.clone(),
            updated_at: self.updated_at.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<T> Adaptive<T> {
    pub fn new(value: T) -> Self {
        Self::with_clock(value, Arc::new(MonotonicClock::default()))
    }

    /// Create a handle backed by a caller-supplied clock (tests, deterministic replay).
    pub fn with_clock(value: T, clock: Arc<dyn Clock>) -> Self {
        #[cfg(not(feature = "adaptive-rwlock"))]
        let inner = Arc::new(ArcSwap::from_pointee(value));
        #[cfg(feature = "adaptive-rwlock")]
        let inner = Arc::new(RwLock::new(value));

        Self {
            inner,
            version: Arc::new(AtomicU64::new(1)),
            updated_at: Arc::new(AtomicU64::new(0)),
            clock,
        }
    }

    /// Snapshot the current value (cheap clone of Arc).
    pub fn get(&self) -> Arc<T> {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            self.inner.load_full()
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            Arc::new(self.inner.read().unwrap_or_else(|p| p.into_inner()).clone())
        }
    }

    /// Current version; starts at 1 and increments on every `set`/`update`.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Millisecond timestamp (per the caller-supplied clock) of the most
    /// recent write, or 0 if the value has never been written since creation.
    pub fn updated_at(&self) -> u64 {
        self.updated_at.load(Ordering::SeqCst)
    }

    /// Replace the value entirely, bumping the version and timestamp.
    pub fn set(&self, value: T) {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            self.inner.store(Arc::new(value));
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            *self.inner.write().unwrap_or_else(|p| p.into_inner()) = value;
        }
        self.version.fetch_add(1, Ordering::SeqCst);
        self.updated_at.store(self.clock.now_millis(), Ordering::SeqCst);
    }

    /// Update via closure, bumping the version and timestamp.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
        T: Clone,
    {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            let cur = self.inner.load_full();
            let new_val = f(&cur);
            self.inner.store(Arc::new(new_val));
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            let cur = self.inner.read().unwrap_or_else(|p| p.into_inner()).clone();
            let new_val = f(&cur);
            *self.inner.write().unwrap_or_else(|p| p.into_inner()) = new_val;
        }
        self.version.fetch_add(1, Ordering::SeqCst);
        self.updated_at.store(self.clock.now_millis(), Ordering::SeqCst);
    }
}
