//! Registry for managing named circuit breakers.
//!
//! Allows global access and control (reset/inspection) of circuit breakers by ID,
//! which is what the control plane's breaker-management commands operate against.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::circuit_breaker::{CircuitBreakerPolicy, CircuitState};

/// Handle to reset/query a circuit breaker instance.
#[derive(Clone)]
pub struct CircuitBreakerHandle {
    policy: CircuitBreakerPolicy,
}

impl CircuitBreakerHandle {
    pub fn new(policy: CircuitBreakerPolicy) -> Self {
        Self { policy }
    }

    /// Reset the circuit breaker state to Closed, clearing failure counts.
    pub fn reset(&self) {
        self.policy.reset();
    }

    /// Current breaker state.
    pub fn state(&self) -> CircuitState {
        self.policy.current_state()
    }

    /// Borrow the underlying policy, e.g. to compose it into a stack.
    pub fn policy(&self) -> &CircuitBreakerPolicy {
        &self.policy
    }
}

/// Lookup and control surface for named circuit breakers.
///
/// `control::handler::BreakerService` is built against this trait so the
/// live-config command plane can reset or inspect breakers by id without
/// depending on a concrete storage strategy.
pub trait CircuitBreakerRegistry: Send + Sync {
    /// Register a breaker under `id`, overwriting any existing entry.
    fn register(&self, id: String, handle: CircuitBreakerHandle);

    /// Retrieve a handle to a registered circuit breaker by id.
    fn get(&self, id: &str) -> Option<CircuitBreakerHandle>;

    /// Reset a registered circuit breaker by id.
    fn reset(&self, id: &str) -> Result<(), String> {
        match self.get(id) {
            Some(handle) => {
                handle.reset();
                Ok(())
            }
            None => Err(format!("breaker id not found: {id}")),
        }
    }

    /// Snapshot of all breaker states (id, state), sorted by id.
    fn snapshot(&self) -> Vec<(String, CircuitState)>;
}

/// In-memory `CircuitBreakerRegistry` backed by a mutex-guarded map.
#[derive(Default, Clone)]
pub struct InMemoryCircuitBreakerRegistry {
    inner: Arc<Mutex<HashMap<String, CircuitBreakerHandle>>>,
}

impl InMemoryCircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience: create and register a fresh breaker with the given id.
    pub fn register_new(&self, id: String, policy: CircuitBreakerPolicy) {
        self.register(id, CircuitBreakerHandle::new(policy));
    }
}

impl CircuitBreakerRegistry for InMemoryCircuitBreakerRegistry {
    fn register(&self, id: String, handle: CircuitBreakerHandle) {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).insert(id, handle);
    }

    fn get(&self, id: &str) -> Option<CircuitBreakerHandle> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).get(id).cloned()
    }

    fn snapshot(&self) -> Vec<(String, CircuitState)> {
        let map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let mut entries: Vec<(String, CircuitState)> =
            map.iter().map(|(k, v)| (k.clone(), v.state())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn register_and_get_roundtrip() {
        let registry = InMemoryCircuitBreakerRegistry::new();
        let policy = CircuitBreakerPolicy::new(3, Duration::from_secs(30));
        registry.register_new("svc-a".to_string(), policy);

        let handle = registry.get("svc-a").expect("handle present");
        assert_eq!(handle.state(), CircuitState::Closed);
    }

    #[test]
    fn get_missing_returns_none() {
        let registry = InMemoryCircuitBreakerRegistry::new();
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn reset_missing_id_errors() {
        let registry = InMemoryCircuitBreakerRegistry::new();
        assert!(registry.reset("missing").is_err());
    }

    #[tokio::test]
    async fn reset_known_id_clears_state() {
        let registry = InMemoryCircuitBreakerRegistry::new();
        let policy = CircuitBreakerPolicy::new(1, Duration::from_secs(30));
        registry.register_new("svc-b".to_string(), policy.clone());

        let _ = policy
            .execute(|| async {
                Err::<(), _>(crate::ResilienceError::Inner(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "boom",
                )))
            })
            .await;
        assert_eq!(registry.get("svc-b").unwrap().state(), CircuitState::Open);

        registry.reset("svc-b").unwrap();
        assert_eq!(registry.get("svc-b").unwrap().state(), CircuitState::Closed);
    }

    #[test]
    fn snapshot_is_sorted_by_id() {
        let registry = InMemoryCircuitBreakerRegistry::new();
        registry.register_new("zeta".to_string(), CircuitBreakerPolicy::new(1, Duration::from_secs(1)));
        registry.register_new("alpha".to_string(), CircuitBreakerPolicy::new(1, Duration::from_secs(1)));

        let snapshot = registry.snapshot();
        let ids: Vec<&str> = snapshot.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }
}
