//! componentkit: the generic Component reconciliation engine. Crates
//! implementing a specific provider depend on this crate for the claim
//! protocol, the lifecycle state machine, and the plugin contract; they
//! supply an [`operations::OperationsFactory`] and register it with an
//! [`operations::FactoryRegistry`].

pub mod adapter;
pub mod claim;
pub mod deletion;
pub mod error;
pub mod metrics;
pub mod operations;
pub mod result;
pub mod state_machine;
pub mod timeouts;

pub use adapter::{AdapterError, ComponentKey, ComponentStore, KubeComponentStore};
pub use claim::{can_claim, can_delete, is_claimed_by_us, ClaimError, WaitingForCoordination};
pub use error::Error;
pub use metrics::ControllerMetrics;
pub use operations::{
    ErrorClassifier, FactoryError, FactoryRegistry, OperationContext, Operations,
    OperationsFactory, ProviderRegistration,
};
pub use result::{ActionResult, CheckResult};
pub use state_machine::{reconcile, EngineContext, ReconcileOutcome};
pub use timeouts::RequeuePolicy;

#[cfg(any(test, feature = "testing"))]
pub use adapter::fake::FakeComponentStore;
