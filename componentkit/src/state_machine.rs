//! C3 — lifecycle state machine. Drives a Component through
//! Claimed → Deploying → Ready → (Upgrade) → Terminating, consulting
//! the claim validator (C2) and the deletion coordinator (C6), and
//! invoking exactly one `Operations` method per reconcile through the
//! factory registry (C4). Write-ahead persistence ensures a crash
//! between "persist phase" and "call provider" leaves the Component in
//! the phase consistent with the *attempted* operation (spec §4.3).
//!
//! Control flow below mirrors the ordered dispatch inside the teacher's
//! own `reconcile` function (deletion-timestamp check first, then
//! finalizer-ensure, then evaluate) generalized to dispatch through the
//! generic [`Operations`] contract instead of inline per-kind logic.

use crate::adapter::{AdapterError, ComponentStore};
use crate::claim;
use crate::deletion;
use crate::error::Error;
use crate::metrics::ControllerMetrics;
use crate::operations::{ErrorClassifier, FactoryError, OperationContext, OperationsFactory};
use crate::result::{ActionResult, CheckResult};
use crate::timeouts::{self, RequeuePolicy};
use chrono::Utc;
use componentkit_types::{Component, ComponentPhase, ComponentStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything the state machine needs for one provider's Components:
/// the shared control-plane adapter, this provider's identity, and its
/// registration (factory, classifier, requeue policy).
pub struct EngineContext {
    pub store: Arc<dyn ComponentStore>,
    pub provider_name: String,
    pub factory: Arc<dyn OperationsFactory>,
    pub classifier: ErrorClassifier,
    pub requeue: RequeuePolicy,
    pub cancellation: CancellationToken,
    pub metrics: ControllerMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Requeue(Duration),
    NoRequeue,
}

/// Entry point invoked once per watch event, exactly as the teacher's
/// `reconcile` function is invoked by `kube_runtime::Controller`.
pub async fn reconcile(
    component: &Component,
    engine: &EngineContext,
) -> Result<ReconcileOutcome, Error> {
    if let Err(claim_err) = claim::can_claim(component, &engine.provider_name) {
        // NotForUs / ClaimedByOther: leave unchanged, no requeue (spec §4.3).
        let _ = claim_err;
        return Ok(ReconcileOutcome::NoRequeue);
    }

    let namespace = component.metadata.namespace.as_deref().unwrap_or("default");
    engine.metrics.record_reconcile(namespace);
    let _timer = engine.metrics.time_reconcile();

    if component.metadata.deletion_timestamp.is_some() {
        if !claim::is_claimed_by_us(component, &engine.provider_name) {
            // Never claimed; the control plane will delete it outright
            // once the last finalizer (if any) clears.
            return Ok(ReconcileOutcome::NoRequeue);
        }
        return handle_deletion(component, engine).await;
    }

    handle_lifecycle(component, engine).await
}

fn needs_claim(component: &Component, self_name: &str) -> bool {
    component.status.as_ref().and_then(|s| s.phase).is_none()
        && !claim::is_claimed_by_us(component, self_name)
}

async fn handle_lifecycle(
    component: &Component,
    engine: &EngineContext,
) -> Result<ReconcileOutcome, Error> {
    if needs_claim(component, &engine.provider_name) {
        return claim_component(component, engine).await;
    }

    let phase = component
        .status
        .as_ref()
        .and_then(|s| s.phase)
        .ok_or_else(|| Error::UserInputError("Component has no phase after claim".to_owned()))?;

    match phase {
        ComponentPhase::Claimed => deploy(component, engine).await,
        ComponentPhase::Deploying => check_applied(component, engine).await,
        ComponentPhase::Ready | ComponentPhase::Failed => {
            if component.status.as_ref().and_then(|s| s.dirty).unwrap_or(false) {
                upgrade(component, engine).await
            } else {
                Ok(ReconcileOutcome::NoRequeue)
            }
        }
        // A Terminating/TerminationFailed Component observed without a
        // deletion timestamp (e.g. the user restored the object) is left
        // alone; nothing in the contract defines resurrection.
        ComponentPhase::Pending | ComponentPhase::Terminating | ComponentPhase::TerminationFailed => {
            Ok(ReconcileOutcome::NoRequeue)
        }
    }
}

async fn claim_component(
    component: &Component,
    engine: &EngineContext,
) -> Result<ReconcileOutcome, Error> {
    let finalizer = componentkit_types::lifecycle_finalizer(&engine.provider_name);
    let claimed = retry_on_conflict(engine, component.clone(), true, move |mut c| {
        let mut finalizers = c.metadata.finalizers.clone().unwrap_or_default();
        if !finalizers.iter().any(|f| f == &finalizer) {
            finalizers.push(finalizer.clone());
        }
        c.metadata.finalizers = Some(finalizers);
        c
    })
    .await?;

    let now = Utc::now().to_rfc3339();
    let mut claimed = claimed;
    claimed.status = Some(ComponentStatus {
        phase: Some(ComponentPhase::Claimed),
        claimed_by: Some(engine.provider_name.clone()),
        claimed_at: Some(now.clone()),
        phase_entered_at: Some(now),
        message: Some("Claimed by provider".to_owned()),
        ..claimed.status.unwrap_or_default()
    });
    engine.store.update_status(&claimed).await.map_err(Error::from)?;

    info!(provider = %engine.provider_name, "claimed Component");
    Ok(ReconcileOutcome::Requeue(Duration::ZERO))
}

async fn build_operations(
    component: &Component,
    engine: &EngineContext,
) -> Result<Box<dyn crate::operations::Operations>, FactoryError> {
    let raw_status = component
        .status
        .as_ref()
        .and_then(|s| s.provider_status.as_ref());
    engine
        .factory
        .new_operations(&component.spec.config, raw_status)
        .await
}

fn operation_context(component: &Component, engine: &EngineContext) -> OperationContext {
    let status = component.status.as_ref();
    OperationContext {
        cancellation: engine.cancellation.clone(),
        phase_elapsed: timeouts::elapsed_since(
            status.and_then(|s| s.phase_entered_at.as_deref()),
        ),
        deployment_timeout: timeouts::parse_timeout(
            component.spec.deployment_timeout.as_deref(),
        ),
        termination_timeout: timeouts::parse_timeout(
            component.spec.termination_timeout.as_deref(),
        ),
    }
}

async fn deploy(component: &Component, engine: &EngineContext) -> Result<ReconcileOutcome, Error> {
    let operations = match build_operations(component, engine).await {
        Ok(ops) => ops,
        Err(err) => return fail_factory(component, engine, err).await,
    };

    let mut deploying = component.clone();
    set_phase(&mut deploying, ComponentPhase::Deploying, None);
    let deploying = engine.store.update_status(&deploying).await.map_err(Error::from)?;

    let ctx = operation_context(&deploying, engine);
    let result = operations.deploy(&ctx).await;
    apply_action_result(&deploying, engine, result, Phase::Deploy).await
}

async fn upgrade(component: &Component, engine: &EngineContext) -> Result<ReconcileOutcome, Error> {
    let operations = match build_operations(component, engine).await {
        Ok(ops) => ops,
        Err(err) => return fail_factory(component, engine, err).await,
    };

    let mut deploying = component.clone();
    set_phase(&mut deploying, ComponentPhase::Deploying, None);
    let deploying = engine.store.update_status(&deploying).await.map_err(Error::from)?;

    let ctx = operation_context(&deploying, engine);
    let result = operations.upgrade(&ctx).await;
    apply_action_result(&deploying, engine, result, Phase::Deploy).await
}

async fn check_applied(
    component: &Component,
    engine: &EngineContext,
) -> Result<ReconcileOutcome, Error> {
    let operations = match build_operations(component, engine).await {
        Ok(ops) => ops,
        Err(err) => return fail_factory(component, engine, err).await,
    };
    let ctx = operation_context(component, engine);
    let result = operations.check_applied(&ctx).await;
    apply_check_result(component, engine, result, Phase::Deploy).await
}

async fn handle_deletion(
    component: &Component,
    engine: &EngineContext,
) -> Result<ReconcileOutcome, Error> {
    if let Err(claim::WaitingForCoordination) = claim::can_delete(component) {
        return Ok(ReconcileOutcome::Requeue(engine.requeue.default_requeue));
    }

    let phase = component.status.as_ref().and_then(|s| s.phase);

    if phase == Some(ComponentPhase::TerminationFailed) {
        if !deletion::retry_requested(component, None) {
            return Ok(ReconcileOutcome::NoRequeue);
        }
        // Fall through and re-enter the Terminating sequence.
    }

    if phase != Some(ComponentPhase::Terminating) {
        let operations = match build_operations(component, engine).await {
            Ok(ops) => ops,
            Err(err) => return fail_factory_termination(component, engine, err).await,
        };

        let mut terminating = component.clone();
        set_phase(&mut terminating, ComponentPhase::Terminating, None);
        let terminating = engine.store.update_status(&terminating).await.map_err(Error::from)?;

        let ctx = operation_context(&terminating, engine);
        let result = operations.delete(&ctx).await;
        return apply_action_result(&terminating, engine, result, Phase::Terminate).await;
    }

    let operations = match build_operations(component, engine).await {
        Ok(ops) => ops,
        Err(err) => return fail_factory_termination(component, engine, err).await,
    };
    let ctx = operation_context(component, engine);
    let result = operations.check_deleted(&ctx).await;
    apply_check_deleted_result(component, engine, result).await
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Deploy,
    Terminate,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Deploy => "deploy",
            Phase::Terminate => "terminate",
        }
    }
}

async fn apply_action_result(
    component: &Component,
    engine: &EngineContext,
    result: ActionResult,
    path: Phase,
) -> Result<ReconcileOutcome, Error> {
    let mut updated = component.clone();
    match result {
        ActionResult::Success {
            updated_status,
            details,
        } => {
            set_status_bytes(&mut updated, updated_status, details);
            engine.store.update_status(&updated).await.map_err(Error::from)?;
            Ok(ReconcileOutcome::Requeue(engine.requeue.status_check_requeue))
        }
        ActionResult::TransientError { updated_status, err } => {
            set_status_bytes(&mut updated, updated_status, Some(err.clone()));
            engine.store.update_status(&updated).await.map_err(Error::from)?;
            engine.metrics.record_error(path.as_str(), true);
            warn!(error = %err, "transient error, will retry");
            Ok(ReconcileOutcome::Requeue(engine.requeue.error_requeue))
        }
        ActionResult::PermanentError { updated_status, err } => {
            let failed_phase = match path {
                Phase::Deploy => ComponentPhase::Failed,
                Phase::Terminate => ComponentPhase::TerminationFailed,
            };
            set_phase(&mut updated, failed_phase, Some(err.clone()));
            updated.status.as_mut().unwrap().provider_status = Some(updated_status);
            engine.store.update_status(&updated).await.map_err(Error::from)?;
            engine.metrics.record_error(path.as_str(), false);
            warn!(error = %err, "permanent error");
            Ok(ReconcileOutcome::NoRequeue)
        }
    }
}

async fn apply_check_result(
    component: &Component,
    engine: &EngineContext,
    result: CheckResult,
    path: Phase,
) -> Result<ReconcileOutcome, Error> {
    let mut updated = component.clone();
    match result {
        CheckResult::Success {
            updated_status,
            details,
        } => {
            let next = match path {
                Phase::Deploy => ComponentPhase::Ready,
                Phase::Terminate => unreachable!("CheckDeleted uses apply_check_deleted_result"),
            };
            set_phase(&mut updated, next, details);
            updated.status.as_mut().unwrap().provider_status = Some(updated_status);
            updated.status.as_mut().unwrap().dirty = Some(false);
            engine.store.update_status(&updated).await.map_err(Error::from)?;
            let namespace = updated.metadata.namespace.as_deref().unwrap_or("default");
            engine.metrics.record_phase(namespace, "ready");
            Ok(ReconcileOutcome::Requeue(engine.requeue.status_check_requeue))
        }
        CheckResult::InProgress {
            updated_status,
            details,
        } => {
            set_status_bytes(&mut updated, updated_status, details);
            engine.store.update_status(&updated).await.map_err(Error::from)?;
            Ok(ReconcileOutcome::Requeue(engine.requeue.status_check_requeue))
        }
        CheckResult::TransientError { updated_status, err } => {
            set_status_bytes(&mut updated, updated_status, Some(err.clone()));
            engine.store.update_status(&updated).await.map_err(Error::from)?;
            engine.metrics.record_error(path.as_str(), true);
            warn!(error = %err, "transient error polling progress");
            Ok(ReconcileOutcome::Requeue(engine.requeue.error_requeue))
        }
        CheckResult::PermanentError { updated_status, err } => {
            let failed_phase = match path {
                Phase::Deploy => ComponentPhase::Failed,
                Phase::Terminate => ComponentPhase::TerminationFailed,
            };
            set_phase(&mut updated, failed_phase, Some(err.clone()));
            updated.status.as_mut().unwrap().provider_status = Some(updated_status);
            engine.store.update_status(&updated).await.map_err(Error::from)?;
            engine.metrics.record_error(path.as_str(), false);
            Ok(ReconcileOutcome::NoRequeue)
        }
    }
}

async fn apply_check_deleted_result(
    component: &Component,
    engine: &EngineContext,
    result: CheckResult,
) -> Result<ReconcileOutcome, Error> {
    match result {
        CheckResult::Success { .. } => {
            remove_lifecycle_finalizer(component, engine).await?;
            info!(provider = %engine.provider_name, "cleanup complete, lifecycle finalizer removed");
            Ok(ReconcileOutcome::NoRequeue)
        }
        other => apply_check_result(component, engine, other, Phase::Terminate).await,
    }
}

async fn remove_lifecycle_finalizer(
    component: &Component,
    engine: &EngineContext,
) -> Result<(), Error> {
    let finalizer = componentkit_types::lifecycle_finalizer(&engine.provider_name);
    retry_on_conflict(engine, component.clone(), true, move |mut c| {
        let finalizers = c
            .metadata
            .finalizers
            .take()
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != &finalizer)
            .collect::<Vec<_>>();
        c.metadata.finalizers = Some(finalizers);
        c
    })
    .await?;
    Ok(())
}

async fn fail_factory(
    component: &Component,
    engine: &EngineContext,
    err: FactoryError,
) -> Result<ReconcileOutcome, Error> {
    let mut updated = component.clone();
    let message = match &err {
        FactoryError::Configuration(msg) => format!("Configuration error: {msg}"),
        FactoryError::Status(msg) => format!("Status parse error: {msg}"),
    };
    set_phase(&mut updated, ComponentPhase::Failed, Some(message));
    engine.store.update_status(&updated).await.map_err(Error::from)?;
    Ok(ReconcileOutcome::NoRequeue)
}

async fn fail_factory_termination(
    component: &Component,
    engine: &EngineContext,
    err: FactoryError,
) -> Result<ReconcileOutcome, Error> {
    let mut updated = component.clone();
    let message = match &err {
        FactoryError::Configuration(msg) => format!("Configuration error: {msg}"),
        FactoryError::Status(msg) => format!("Status parse error: {msg}"),
    };
    set_phase(&mut updated, ComponentPhase::TerminationFailed, Some(message));
    engine.store.update_status(&updated).await.map_err(Error::from)?;
    Ok(ReconcileOutcome::NoRequeue)
}

fn set_phase(component: &mut Component, phase: ComponentPhase, message: Option<String>) {
    let now = Utc::now().to_rfc3339();
    let mut status = component.status.clone().unwrap_or_default();
    status.phase = Some(phase);
    status.phase_entered_at = Some(now);
    if let Some(message) = message {
        status.message = Some(message);
    }
    component.status = Some(status);
}

fn set_status_bytes(
    component: &mut Component,
    provider_status: serde_json::Value,
    message: Option<String>,
) {
    let mut status = component.status.clone().unwrap_or_default();
    status.provider_status = Some(provider_status);
    if let Some(message) = message {
        status.message = Some(message);
    }
    component.status = Some(status);
}

/// Applies `mutate` to a base Component and retries once against a
/// freshly-fetched copy on `AdapterError::Conflict`, matching the
/// engine's stated policy that optimistic-concurrency conflicts are
/// non-fatal (spec §4.1, §7). `mutate` must be re-appliable to any
/// revision of the Component, since it runs again against the
/// freshly-fetched copy on conflict.
async fn retry_on_conflict(
    engine: &EngineContext,
    base: Component,
    is_spec_update: bool,
    mutate: impl Fn(Component) -> Component,
) -> Result<Component, Error> {
    let attempt = mutate(base);
    let result = if is_spec_update {
        engine.store.update_spec(&attempt).await
    } else {
        engine.store.update_status(&attempt).await
    };
    match result {
        Ok(updated) => Ok(updated),
        Err(AdapterError::Conflict(key)) => {
            let fresh = engine
                .store
                .fetch(&key)
                .await
                .map_err(Error::from)?
                .ok_or_else(|| Error::UserInputError(format!("{key} disappeared mid-reconcile")))?;
            let retried = mutate(fresh);
            let result = if is_spec_update {
                engine.store.update_spec(&retried).await
            } else {
                engine.store.update_status(&retried).await
            };
            result.map_err(Error::from)
        }
        Err(e) => Err(e.into()),
    }
}
