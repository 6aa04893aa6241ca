//! Declarative live policy plans: bind a set of resilience policies to
//! config-registry paths under a common base and compose them into a single
//! executable policy.
//!
//! A plan is a list of nodes, each either a *live* binding (its parameters
//! are re-read from the registry per the resolution-timing rule of its
//! kind — see [`crate::retry`], [`crate::bulkhead`], [`crate::circuit_breaker`],
//! [`crate::timeout`]) or a *static* pre-built policy spliced in untouched.
//! [`LivePolicyPlan::register`] validates the plan, ensure-registers each
//! live field under `base_path/binding/<field>`, and produces the composed
//! [`LivePolicy`].
//!
//! Composition is left-to-right, outer-to-inner, matching `wrap(outer, inner)`
//! (§4.9): the first node in the plan is outermost. Because
//! [`crate::retry::RetryPolicy::execute`] requires its action to return a bare
//! `Result<T, E>` rather than `Result<T, ResilienceError<E>>`, a `Retry` node
//! may only appear as the last (innermost) node of a plan — the same
//! constraint [`crate::stack::ResilienceStack`] bakes into its fixed order.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::backoff::Backoff;
use crate::bulkhead::BulkheadPolicy;
use crate::circuit_breaker::CircuitBreakerPolicy;
use crate::control::{CommandFailure, ConfigRegistry, InMemoryConfigRegistry};
use crate::jitter::Jitter;
use crate::resolvable::Resolvable;
use crate::retry::RetryPolicy;
use crate::timeout::TimeoutPolicy;
use crate::ResilienceError;

/// Which concrete policy a live binding produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LiveNodeKind {
    Retry,
    Bulkhead,
    CircuitBreaker,
    Timeout,
}

impl LiveNodeKind {
    /// Field names recognised under this kind's binding path, per the live
    /// policy field catalogue. Fields not in this list are rejected.
    fn fields(self) -> &'static [&'static str] {
        match self {
            LiveNodeKind::Retry => &["retries", "delay", "maxDelay", "backoff", "jitter"],
            LiveNodeKind::Bulkhead => &["limit", "queueLimit"],
            LiveNodeKind::CircuitBreaker => &["threshold", "duration", "successThreshold"],
            LiveNodeKind::Timeout => &["ms"],
        }
    }

    /// Catalogue default for a field, or `None` when the field is required
    /// and has no default (`Bulkhead.limit`, `CircuitBreaker.threshold`,
    /// `CircuitBreaker.duration`, `Timeout.ms`).
    fn default_for(self, field: &str) -> Option<&'static str> {
        match (self, field) {
            (LiveNodeKind::Retry, "retries") => Some("3"),
            (LiveNodeKind::Retry, "delay") => Some("1000"),
            (LiveNodeKind::Retry, "maxDelay") => Some("30000"),
            (LiveNodeKind::Retry, "backoff") => Some("constant"),
            (LiveNodeKind::Retry, "jitter") => Some("none"),
            (LiveNodeKind::Bulkhead, "queueLimit") => Some("0"),
            (LiveNodeKind::CircuitBreaker, "successThreshold") => Some("1"),
            _ => None,
        }
    }
}

/// A live, registry-bound policy binding: `{kind, binding, defaults}`.
#[derive(Clone, Debug)]
pub struct LiveBinding {
    pub kind: LiveNodeKind,
    /// Single path segment naming this binding under the plan's base path.
    pub binding: String,
    /// Overrides for fields that have no catalogue default (or to override
    /// one that does). Values are the raw strings stored at each field's
    /// registry path.
    pub defaults: Vec<(String, String)>,
}

impl LiveBinding {
    pub fn new(kind: LiveNodeKind, binding: impl Into<String>) -> Self {
        Self { kind, binding: binding.into(), defaults: Vec::new() }
    }

    pub fn with_default(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.push((field.into(), value.into()));
        self
    }

    fn default_for(&self, field: &str) -> Option<String> {
        self.defaults
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.clone())
            .or_else(|| self.kind.default_for(field).map(String::from))
    }
}

/// A pre-built policy spliced into a plan without a registry binding.
#[derive(Clone)]
pub enum StaticNode<E> {
    Retry(RetryPolicy<E>),
    Bulkhead(BulkheadPolicy),
    CircuitBreaker(CircuitBreakerPolicy),
    Timeout(TimeoutPolicy),
}

/// One entry of a [`LivePolicyPlan`].
#[derive(Clone)]
pub enum PlanNode<E> {
    Live(LiveBinding),
    Static(StaticNode<E>),
}

impl<E> PlanNode<E> {
    fn kind(&self) -> LiveNodeKind {
        match self {
            PlanNode::Live(b) => b.kind,
            PlanNode::Static(StaticNode::Retry(_)) => LiveNodeKind::Retry,
            PlanNode::Static(StaticNode::Bulkhead(_)) => LiveNodeKind::Bulkhead,
            PlanNode::Static(StaticNode::CircuitBreaker(_)) => LiveNodeKind::CircuitBreaker,
            PlanNode::Static(StaticNode::Timeout(_)) => LiveNodeKind::Timeout,
        }
    }
}

/// An unregistered, declarative plan. Validate and bind it with
/// [`LivePolicyPlan::register`] to get a [`LivePolicy`].
pub struct LivePolicyPlan<E> {
    nodes: Vec<PlanNode<E>>,
}

impl<E> LivePolicyPlan<E> {
    pub fn new(nodes: Vec<PlanNode<E>>) -> Self {
        Self { nodes }
    }

    /// Validate the plan and base path, ensure-register every live field
    /// under `base_path/binding/<field>`, and build the composed
    /// [`LivePolicy`] bound to `registry`.
    ///
    /// `registry` is a shared handle: the same store the returned policy's
    /// resolvables read from should be the one the command channel later
    /// writes through, so registration goes through `&self` rather than
    /// requiring exclusive access.
    ///
    /// Steps (§4.10):
    /// 1. Validate `base_path` and every binding name.
    /// 2. For each live node, ensure-register each recognized field's
    ///    default under its path, reusing an already-registered entry.
    /// 3. Build each node's concrete policy with live resolvers reading its
    ///    fields on the resolution schedule of §4.2.
    /// 4. Compose nodes left-to-right.
    pub fn register(
        self,
        registry: &Arc<InMemoryConfigRegistry>,
        base_path: &str,
    ) -> Result<LivePolicy<E>, CommandFailure>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        crate::control::path::validate_path(base_path, false)?;

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if let PlanNode::Live(b) = node {
                crate::control::path::validate_path(&b.binding, false)?;
                if !seen.insert(b.binding.clone()) {
                    return Err(CommandFailure::ValidationFailed {
                        path: format!("{base_path}/{}", b.binding),
                        msg: "duplicate binding name in live policy plan".into(),
                    });
                }
            }
        }

        let retry_count = self.nodes.iter().filter(|n| n.kind() == LiveNodeKind::Retry).count();
        if retry_count > 1 {
            return Err(CommandFailure::ValidationFailed {
                path: base_path.to_string(),
                msg: "a live policy plan may contain at most one Retry node".into(),
            });
        }
        if retry_count == 1 && !matches!(self.nodes.last().map(PlanNode::kind), Some(LiveNodeKind::Retry))
        {
            return Err(CommandFailure::ValidationFailed {
                path: base_path.to_string(),
                msg: "a Retry node must be the last (innermost) entry of a live policy plan".into(),
            });
        }

        let mut nodes = Vec::with_capacity(self.nodes.len());
        for node in self.nodes {
            nodes.push(match node {
                PlanNode::Static(s) => ComposedNode::from(s),
                PlanNode::Live(binding) => {
                    ensure_register_fields(registry, base_path, &binding)?;
                    let dyn_registry: Arc<dyn ConfigRegistry> = registry.clone();
                    build_live_node(dyn_registry, base_path, binding)
                }
            });
        }

        Ok(LivePolicy { nodes })
    }
}

fn ensure_register_fields(
    registry: &InMemoryConfigRegistry,
    base_path: &str,
    binding: &LiveBinding,
) -> Result<(), CommandFailure> {
    for field in binding.kind.fields() {
        let path = format!("{base_path}/{}/{field}", binding.binding);
        if registry.contains(&path) {
            continue;
        }
        let default = binding.default_for(field).ok_or_else(|| CommandFailure::ValidationFailed {
            path: path.clone(),
            msg: format!("field '{field}' has no default and none was supplied"),
        })?;
        registry.register_fromstr(path, crate::adaptive::Adaptive::new(default))?;
    }
    Ok(())
}

/// Read a field's raw string under a binding, falling back to `default` on a
/// missing path (should not happen post-registration, but stays cheap and
/// side-effect free rather than panicking).
fn read_field(reg: &Arc<dyn ConfigRegistry>, path: &str) -> Option<String> {
    reg.read(path).ok()
}

fn parse_or<T: std::str::FromStr>(s: Option<String>, default: T) -> T {
    s.and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn build_live_node<E>(
    registry: Arc<dyn ConfigRegistry>,
    base_path: &str,
    binding: LiveBinding,
) -> ComposedNode<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let prefix = format!("{base_path}/{}", binding.binding);
    match binding.kind {
        LiveNodeKind::Retry => {
            let retries_path = format!("{prefix}/retries");
            let delay_path = format!("{prefix}/delay");
            let max_delay_path = format!("{prefix}/maxDelay");
            let backoff_path = format!("{prefix}/backoff");
            let jitter_path = format!("{prefix}/jitter");

            let reg = registry.clone();
            let path = retries_path.clone();
            let max_attempts = Resolvable::producer(move || {
                let retries: u64 = parse_or(read_field(&reg, &path), 3);
                (retries + 1) as usize
            });

            let reg = registry.clone();
            let (dp, mp, bp) = (delay_path.clone(), max_delay_path.clone(), backoff_path.clone());
            let backoff = Resolvable::producer(move || {
                let delay_ms: u64 = parse_or(read_field(&reg, &dp), 1000);
                let max_ms: u64 = parse_or(read_field(&reg, &mp), 30_000);
                let kind = read_field(&reg, &bp).unwrap_or_else(|| "constant".into());
                let base = Duration::from_millis(delay_ms);
                match kind.as_str() {
                    "linear" => Backoff::linear(base),
                    "exponential" => Backoff::exponential(base).with_max(Duration::from_millis(max_ms)),
                    _ => Backoff::constant(base),
                }
            });

            let reg = registry.clone();
            let (dp, mp, jp) = (delay_path, max_delay_path, jitter_path);
            let jitter = Resolvable::producer(move || {
                let delay_ms: u64 = parse_or(read_field(&reg, &dp), 1000);
                let max_ms: u64 = parse_or(read_field(&reg, &mp), 30_000);
                let kind = read_field(&reg, &jp).unwrap_or_else(|| "none".into());
                match kind.as_str() {
                    "full" => Jitter::Full,
                    "equal" => Jitter::Equal,
                    "decorrelated" => Jitter::decorrelated(
                        Duration::from_millis(delay_ms),
                        Duration::from_millis(max_ms),
                    ),
                    _ => Jitter::None,
                }
            });

            let policy = RetryPolicy::builder()
                .max_attempts_resolvable(max_attempts)
                .backoff_resolvable(backoff)
                .jitter_resolvable(jitter)
                .build()
                .expect("resolvable retry builder never fails validation");
            ComposedNode::Retry(policy)
        }
        LiveNodeKind::Bulkhead => {
            let limit_path = format!("{prefix}/limit");
            let queue_path = format!("{prefix}/queueLimit");

            let reg = registry.clone();
            let path = limit_path;
            let limit = Resolvable::producer(move || parse_or(read_field(&reg, &path), 1usize));

            let reg = registry.clone();
            let path = queue_path;
            let queue_limit = Resolvable::producer(move || parse_or(read_field(&reg, &path), 0usize));

            ComposedNode::Bulkhead(BulkheadPolicy::with_resolvable(limit, queue_limit))
        }
        LiveNodeKind::CircuitBreaker => {
            let threshold_path = format!("{prefix}/threshold");
            let duration_path = format!("{prefix}/duration");
            let success_path = format!("{prefix}/successThreshold");

            let reg = registry.clone();
            let path = threshold_path;
            let threshold = Resolvable::producer(move || parse_or(read_field(&reg, &path), 5usize));

            let reg = registry.clone();
            let path = duration_path;
            let duration = Resolvable::producer(move || {
                Duration::from_millis(parse_or(read_field(&reg, &path), 30_000u64))
            });

            let reg = registry.clone();
            let path = success_path;
            let success_threshold =
                Resolvable::producer(move || parse_or(read_field(&reg, &path), 1usize));

            ComposedNode::CircuitBreaker(CircuitBreakerPolicy::with_resolvable_config(
                threshold,
                success_threshold,
                duration,
                Resolvable::value(1),
            ))
        }
        LiveNodeKind::Timeout => {
            let ms_path = format!("{prefix}/ms");
            let reg = registry.clone();
            let duration = Resolvable::producer(move || {
                Duration::from_millis(parse_or(read_field(&reg, &ms_path), 1000u64))
            });
            ComposedNode::Timeout(TimeoutPolicy::with_resolvable(duration))
        }
    }
}

#[derive(Clone)]
enum ComposedNode<E> {
    Retry(RetryPolicy<E>),
    Bulkhead(BulkheadPolicy),
    CircuitBreaker(CircuitBreakerPolicy),
    Timeout(TimeoutPolicy),
}

impl<E> From<StaticNode<E>> for ComposedNode<E> {
    fn from(s: StaticNode<E>) -> Self {
        match s {
            StaticNode::Retry(p) => ComposedNode::Retry(p),
            StaticNode::Bulkhead(p) => ComposedNode::Bulkhead(p),
            StaticNode::CircuitBreaker(p) => ComposedNode::CircuitBreaker(p),
            StaticNode::Timeout(p) => ComposedNode::Timeout(p),
        }
    }
}

/// A live policy plan bound to a registry: a single composed policy whose
/// `execute` runs every node left-to-right, outer-to-inner, per `wrap`
/// (§4.9).
#[derive(Clone)]
pub struct LivePolicy<E> {
    nodes: Vec<ComposedNode<E>>,
}

type WrappedOp<T, E> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<T, ResilienceError<E>>> + Send + Sync>;

impl<E> LivePolicy<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Run `operation` through every node of the plan. Unlike a bare policy,
    /// failures are never thrown across the registry boundary — callers
    /// building a command-channel surface on top of this should map the
    /// returned `Err` to the wire `{ok:false, error}` shape themselves.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        Op: Fn() -> Fut + Send + Sync + 'static,
    {
        let (retry, rest): (Option<&ComposedNode<E>>, &[ComposedNode<E>]) =
            match self.nodes.split_last() {
                Some((last @ ComposedNode::Retry(_), rest)) => (Some(last), rest),
                _ => (None, &self.nodes[..]),
            };

        let op = Arc::new(operation);
        let base: WrappedOp<T, E> = if let Some(ComposedNode::Retry(retry)) = retry {
            let retry = retry.clone();
            let op = op.clone();
            Arc::new(move || {
                let retry = retry.clone();
                let op = op.clone();
                Box::pin(async move { retry.execute(move || (op)(), None).await })
            })
        } else {
            let op = op.clone();
            Arc::new(move || {
                let op = op.clone();
                Box::pin(async move { (op)().await.map_err(ResilienceError::Inner) })
            })
        };

        let mut current = base;
        for node in rest.iter().rev() {
            current = wrap_one(node.clone(), current);
        }
        (current)().await
    }
}

fn wrap_one<T, E>(node: ComposedNode<E>, inner: WrappedOp<T, E>) -> WrappedOp<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    match node {
        ComposedNode::Bulkhead(b) => Arc::new(move || {
            let b = b.clone();
            let inner = inner.clone();
            Box::pin(async move { b.execute(move || (inner)()).await })
        }),
        ComposedNode::CircuitBreaker(cb) => Arc::new(move || {
            let cb = cb.clone();
            let inner = inner.clone();
            Box::pin(async move { cb.execute(move || (inner)()).await })
        }),
        ComposedNode::Timeout(t) => Arc::new(move || {
            let t = t.clone();
            let inner = inner.clone();
            Box::pin(async move { t.execute(move || (inner)()).await })
        }),
        // A Retry node can only be the innermost entry (checked at
        // registration time), so it is never reached here.
        ComposedNode::Retry(_) => inner,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, thiserror::Error)]
    #[error("boom")]
    struct TestError;

    #[tokio::test]
    async fn ensure_register_seeds_catalogue_defaults() {
        let registry = Arc::new(InMemoryConfigRegistry::new());
        let plan = LivePolicyPlan::<TestError>::new(vec![PlanNode::Live(LiveBinding::new(
            LiveNodeKind::Retry,
            "api",
        ))]);
        let _policy = plan.register(&registry, "policies").unwrap();

        assert_eq!(registry.read("policies/api/retries").unwrap(), "3");
        assert_eq!(registry.read("policies/api/delay").unwrap(), "1000");
        assert_eq!(registry.read("policies/api/backoff").unwrap(), "constant");
    }

    #[tokio::test]
    async fn required_field_without_default_is_rejected() {
        let registry = Arc::new(InMemoryConfigRegistry::new());
        let plan = LivePolicyPlan::<TestError>::new(vec![PlanNode::Live(LiveBinding::new(
            LiveNodeKind::Bulkhead,
            "db",
        ))]);
        let err = plan.register(&registry, "policies").unwrap_err();
        assert!(matches!(err, CommandFailure::ValidationFailed { .. }));
    }

    #[tokio::test]
    async fn retry_must_be_innermost() {
        let registry = Arc::new(InMemoryConfigRegistry::new());
        let plan = LivePolicyPlan::<TestError>::new(vec![
            PlanNode::Live(LiveBinding::new(LiveNodeKind::Retry, "r")),
            PlanNode::Live(LiveBinding::new(LiveNodeKind::Timeout, "t").with_default("ms", "500")),
        ]);
        let err = plan.register(&registry, "policies").unwrap_err();
        assert!(matches!(err, CommandFailure::ValidationFailed { .. }));
    }

    #[tokio::test]
    async fn duplicate_binding_names_are_rejected() {
        let registry = Arc::new(InMemoryConfigRegistry::new());
        let plan = LivePolicyPlan::<TestError>::new(vec![
            PlanNode::Live(LiveBinding::new(LiveNodeKind::Timeout, "x").with_default("ms", "1")),
            PlanNode::Live(LiveBinding::new(LiveNodeKind::Bulkhead, "x").with_default("limit", "1")),
        ]);
        let err = plan.register(&registry, "policies").unwrap_err();
        assert!(matches!(err, CommandFailure::ValidationFailed { .. }));
    }

    #[tokio::test]
    async fn composed_plan_executes_and_picks_up_live_writes() {
        let registry = Arc::new(InMemoryConfigRegistry::new());
        let plan = LivePolicyPlan::<TestError>::new(vec![
            PlanNode::Live(LiveBinding::new(LiveNodeKind::Timeout, "t").with_default("ms", "1000")),
            PlanNode::Live(
                LiveBinding::new(LiveNodeKind::Retry, "r")
                    .with_default("retries", "2")
                    .with_default("delay", "1"),
            ),
        ]);
        let policy = plan.register(&registry, "svc").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let result = policy
            .execute(move || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(TestError)
                    } else {
                        Ok::<_, TestError>(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn ensure_register_reuses_already_registered_path() {
        let registry = Arc::new(InMemoryConfigRegistry::new());
        registry.register_fromstr("svc/t/ms", crate::adaptive::Adaptive::new(250u64)).unwrap();

        let plan = LivePolicyPlan::<TestError>::new(vec![PlanNode::Live(LiveBinding::new(
            LiveNodeKind::Timeout,
            "t",
        ))]);
        // No default supplied for `ms`, but the path already exists, so the
        // ensure-register step must reuse it instead of failing.
        let err = plan.register(&registry, "svc");
        assert!(err.is_ok(), "existing registration should satisfy the required field");
        assert_eq!(registry.read("svc/t/ms").unwrap(), "250");
    }
}
