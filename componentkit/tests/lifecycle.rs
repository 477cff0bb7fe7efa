//! End-to-end lifecycle coverage against `FakeComponentStore`: claim,
//! deploy, ready, dirty-triggered upgrade, and the full deletion
//! sequence including the dual-finalizer gate.

use async_trait::async_trait;
use componentkit::{
    reconcile, ActionResult, CheckResult, EngineContext, FactoryError, FakeComponentStore,
    OperationContext, Operations, OperationsFactory, ReconcileOutcome, RequeuePolicy,
};
use componentkit_types::{Component, ComponentPhase, ComponentSpec, COORDINATION_FINALIZER};
use kube::api::ObjectMeta;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A provider whose `check_applied`/`check_deleted` report `InProgress`
/// until called a fixed number of times, so tests can exercise the
/// requeue-and-poll path realistically.
struct SlowProvider {
    checks_until_ready: AtomicUsize,
}

#[async_trait]
impl Operations for SlowProvider {
    async fn deploy(&self, _ctx: &OperationContext) -> ActionResult {
        ActionResult::Success {
            updated_status: serde_json::json!({ "started": true }),
            details: Some("deploy kicked off".to_owned()),
        }
    }

    async fn check_applied(&self, _ctx: &OperationContext) -> CheckResult {
        if self.checks_until_ready.fetch_sub(1, Ordering::SeqCst) <= 1 {
            CheckResult::Success { updated_status: Value::Null, details: None }
        } else {
            CheckResult::InProgress { updated_status: Value::Null, details: None }
        }
    }

    async fn upgrade(&self, _ctx: &OperationContext) -> ActionResult {
        ActionResult::Success { updated_status: Value::Null, details: Some("upgraded".to_owned()) }
    }

    async fn delete(&self, _ctx: &OperationContext) -> ActionResult {
        ActionResult::Success { updated_status: Value::Null, details: Some("delete kicked off".to_owned()) }
    }

    async fn check_deleted(&self, _ctx: &OperationContext) -> CheckResult {
        CheckResult::Success { updated_status: Value::Null, details: None }
    }
}

struct SlowProviderFactory {
    checks_until_ready: usize,
}

#[async_trait]
impl OperationsFactory for SlowProviderFactory {
    fn provider_name(&self) -> &str {
        "slow"
    }

    async fn new_operations(
        &self,
        _raw_config: &Value,
        _raw_provider_status: Option<&Value>,
    ) -> Result<Box<dyn Operations>, FactoryError> {
        Ok(Box::new(SlowProvider {
            checks_until_ready: AtomicUsize::new(self.checks_until_ready),
        }))
    }
}

fn engine(store: Arc<FakeComponentStore>, checks_until_ready: usize) -> EngineContext {
    EngineContext {
        store,
        provider_name: "slow".to_owned(),
        factory: Arc::new(SlowProviderFactory { checks_until_ready }),
        classifier: Arc::new(|_: &str| true),
        requeue: RequeuePolicy::default(),
        cancellation: CancellationToken::new(),
        metrics: componentkit::ControllerMetrics::new("slow"),
    }
}

fn new_component(name: &str) -> Component {
    let mut c = Component::new(
        name,
        ComponentSpec {
            provider_name: "slow".to_owned(),
            config: serde_json::json!({}),
            deployment_timeout: None,
            termination_timeout: None,
        },
    );
    c.metadata = ObjectMeta {
        name: Some(name.to_owned()),
        namespace: Some("default".to_owned()),
        ..Default::default()
    };
    c
}

#[tokio::test]
async fn claim_then_deploy_then_ready() {
    let store = Arc::new(FakeComponentStore::new());
    let key = store.insert(new_component("c1"));
    let engine = engine(store.clone(), 1);

    // Claim.
    let component = store.get(&key).unwrap();
    let outcome = reconcile(&component, &engine).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Requeue(Duration::ZERO));
    let component = store.get(&key).unwrap();
    assert_eq!(component.status.as_ref().unwrap().phase, Some(ComponentPhase::Claimed));

    // Deploy.
    let outcome = reconcile(&component, &engine).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Requeue(engine.requeue.status_check_requeue));
    let component = store.get(&key).unwrap();
    assert_eq!(component.status.as_ref().unwrap().phase, Some(ComponentPhase::Deploying));

    // Check applied -> ready in one poll since checks_until_ready == 1.
    let outcome = reconcile(&component, &engine).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Requeue(engine.requeue.status_check_requeue));
    let component = store.get(&key).unwrap();
    assert_eq!(component.status.as_ref().unwrap().phase, Some(ComponentPhase::Ready));
}

#[tokio::test]
async fn dirty_ready_component_triggers_upgrade() {
    let store = Arc::new(FakeComponentStore::new());
    let key = store.insert(new_component("c2"));
    let engine = engine(store.clone(), 1);

    let mut component = store.get(&key).unwrap();
    component.status = Some(componentkit_types::ComponentStatus {
        phase: Some(ComponentPhase::Ready),
        dirty: Some(true),
        ..Default::default()
    });
    store.update_status(&component).await.unwrap();

    let component = store.get(&key).unwrap();
    let outcome = reconcile(&component, &engine).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Requeue(engine.requeue.status_check_requeue));
    let component = store.get(&key).unwrap();
    assert_eq!(component.status.as_ref().unwrap().phase, Some(ComponentPhase::Deploying));
}

#[tokio::test]
async fn deletion_waits_for_coordination_finalizer_then_completes() {
    let store = Arc::new(FakeComponentStore::new());
    let mut component = new_component("c3");
    component.metadata.finalizers = Some(vec![
        "slow/lifecycle".to_owned(),
        COORDINATION_FINALIZER.to_owned(),
    ]);
    component.status = Some(componentkit_types::ComponentStatus {
        phase: Some(ComponentPhase::Ready),
        ..Default::default()
    });
    let key = store.insert(component);
    let engine = engine(store.clone(), 1);

    // Simulate a delete request.
    let mut component = store.get(&key).unwrap();
    component.metadata.deletion_timestamp = Some(kube::core::Time(chrono::Utc::now()));
    store.update_spec(&component).await.unwrap();

    // Coordination finalizer still present: must wait, not proceed.
    let component = store.get(&key).unwrap();
    let outcome = reconcile(&component, &engine).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Requeue(engine.requeue.default_requeue));
    let component = store.get(&key).unwrap();
    assert_eq!(component.status.as_ref().unwrap().phase, Some(ComponentPhase::Ready));

    // Coordination finalizer cleared externally: deletion proceeds.
    let mut component = store.get(&key).unwrap();
    component.metadata.finalizers = Some(vec!["slow/lifecycle".to_owned()]);
    store.update_spec(&component).await.unwrap();

    let component = store.get(&key).unwrap();
    let outcome = reconcile(&component, &engine).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Requeue(engine.requeue.status_check_requeue));
    let component = store.get(&key).unwrap();
    assert_eq!(component.status.as_ref().unwrap().phase, Some(ComponentPhase::Terminating));

    // check_deleted succeeds immediately -> lifecycle finalizer removed.
    let outcome = reconcile(&component, &engine).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::NoRequeue);
    let component = store.get(&key).unwrap();
    assert!(component.metadata.finalizers.as_ref().unwrap().is_empty());
}
