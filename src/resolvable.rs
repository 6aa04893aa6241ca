//! `Resolvable<T>`: a policy parameter that is either a fixed value or a
//! producer re-consulted at well-defined points during policy execution.
//!
//! Each policy documents exactly when it calls [`Resolvable::resolve`] (see
//! the resolution-timing rules on [`crate::retry`], [`crate::bulkhead`],
//! [`crate::circuit_breaker`]): retry options resolve per attempt, bulkhead
//! limits resolve per admission, circuit-breaker thresholds resolve per
//! event, and timeout/hedge/rate-limit options resolve once per `execute`
//! call. This is what lets [`crate::adaptive::Adaptive`] values, bound
//! through a live-config registry, change a running policy's behavior
//! without rebuilding it.

use std::fmt;
use std::sync::Arc;

/// Either a literal value or a zero-argument producer of one.
#[derive(Clone)]
pub enum Resolvable<T> {
    Value(T),
    Producer(Arc<dyn Fn() -> T + Send + Sync>),
}

impl<T> Resolvable<T> {
    pub fn value(v: T) -> Self {
        Self::Value(v)
    }

    pub fn producer<F>(f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::Producer(Arc::new(f))
    }

    /// Produce the current value: returns the literal, or invokes the
    /// producer.
    pub fn resolve(&self) -> T
    where
        T: Clone,
    {
        match self {
            Self::Value(v) => v.clone(),
            Self::Producer(f) => f(),
        }
    }
}

impl<T> From<T> for Resolvable<T> {
    fn from(v: T) -> Self {
        Self::Value(v)
    }
}

impl<T: fmt::Debug> fmt::Debug for Resolvable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Resolvable::Value").field(v).finish(),
            Self::Producer(_) => f.write_str("Resolvable::Producer(..)"),
        }
    }
}
