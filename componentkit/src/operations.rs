//! C4 — operations contract & factory registry. The typed plugin
//! boundary: a provider registers a [`OperationsFactory`] that parses
//! opaque `spec.config`/`status.providerStatus` bytes into a per-reconcile
//! [`Operations`] handle. The engine calls exactly one of the five
//! methods per reconcile and never touches the control plane from inside
//! a provider call (spec §4.4).

use crate::result::{ActionResult, CheckResult};
use crate::timeouts::RequeuePolicy;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Raised by a factory when `spec.config` or `status.providerStatus`
/// cannot be parsed or validated. Both are permanent failures: a
/// corrupt config is a `ConfigurationError` (→ Failed), a corrupt opaque
/// status is a `StatusParseError` (→ Failed) — a provider must never
/// silently discard status it cannot understand (spec §4.4).
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("status parse error: {0}")]
    Status(String),
}

/// Threaded into every `Operations` method call. Carries cancellation,
/// the Component-scoped timeout relevant to the call being made, and how
/// long the Component has been in its current phase — generalizing the
/// teacher's `ReconcileContext` (an `Arc`-wrapped `Client` threaded into
/// `reconcile`/`error_policy`) into a per-operation context that also
/// exposes elapsed-time so
/// providers can embed their own timeout checks (spec §4.7).
#[derive(Clone)]
pub struct OperationContext {
    pub cancellation: CancellationToken,
    /// Time elapsed since `status.phaseEnteredAt`.
    pub phase_elapsed: Duration,
    /// `spec.deploymentTimeout`, parsed, if the Component carries one.
    pub deployment_timeout: Option<Duration>,
    /// `spec.terminationTimeout`, parsed, if the Component carries one.
    pub termination_timeout: Option<Duration>,
}

/// The five-method contract implemented by a provider for a single
/// reconcile pass. Instances are immutable value-like objects scoped to
/// one reconcile; providers must not cache mutable state across calls.
#[async_trait]
pub trait Operations: Send + Sync {
    /// Start creation of external resources. Must return promptly once
    /// the external work has been kicked off — this is an asynchronous
    /// initiation, not a blocking wait for completion.
    async fn deploy(&self, ctx: &OperationContext) -> ActionResult;

    /// Non-blocking readiness probe. Safe to call repeatedly; must not
    /// retry internally.
    async fn check_applied(&self, ctx: &OperationContext) -> CheckResult;

    /// Apply the updated spec to an existing deployment.
    async fn upgrade(&self, ctx: &OperationContext) -> ActionResult;

    /// Start external cleanup. Providers must treat "already deleted" as
    /// success (idempotency requirement, spec §4.3).
    async fn delete(&self, ctx: &OperationContext) -> ActionResult;

    /// Non-blocking cleanup-completion probe.
    async fn check_deleted(&self, ctx: &OperationContext) -> CheckResult;
}

/// Stateless constructor that turns raw config + status bytes into a
/// typed per-reconcile [`Operations`] instance.
#[async_trait]
pub trait OperationsFactory: Send + Sync {
    /// Provider name this factory serves, e.g. `"helm"`.
    fn provider_name(&self) -> &str;

    async fn new_operations(
        &self,
        raw_config: &Value,
        raw_provider_status: Option<&Value>,
    ) -> Result<Box<dyn Operations>, FactoryError>;
}

/// Classifies a provider-reported error string as retryable or not.
/// Supplied at registration time so the same underlying error is
/// classified consistently across all check points of a given provider
/// (spec §4.5) — e.g. AWS throttling is retryable, but IAM's
/// `NoSuchEntity` during delete should never even reach the classifier
/// because the provider treats it as success beforehand.
pub type ErrorClassifier = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Everything supplied when a provider registers with the engine:
/// its factory, error classifier, and per-provider requeue/concurrency
/// tuning (spec §4.7, §5).
pub struct ProviderRegistration {
    pub factory: Arc<dyn OperationsFactory>,
    pub classifier: ErrorClassifier,
    pub requeue: RequeuePolicy,
    pub max_concurrent_reconciles: usize,
}

/// Registry of providers keyed by name, built once per process and
/// shared via `Arc` across controller workers — the per-process
/// singleton recommended in spec §9, in place of constructing factories
/// per reconcile.
#[derive(Default)]
pub struct FactoryRegistry {
    providers: HashMap<String, ProviderRegistration>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, registration: ProviderRegistration) {
        let name = registration.factory.provider_name().to_owned();
        self.providers.insert(name, registration);
    }

    pub fn get(&self, provider_name: &str) -> Option<&ProviderRegistration> {
        self.providers.get(provider_name)
    }

    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}
