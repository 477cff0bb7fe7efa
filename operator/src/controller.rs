//! Generic controller runner: one `kube_runtime::Controller` per
//! registered provider, all watching the single shared `Component` CRD
//! and each scoped to its own provider name via
//! `componentkit::adapter::handler_predicate`, mirroring the teacher's
//! single `Controller::new(..).run(reconcile, error_policy, ctx)` wiring
//! generalized to one per provider identity against a shared kind.

use componentkit::{handler_predicate, reconcile, EngineContext, Error, ReconcileOutcome};
use componentkit_types::Component;
use futures::StreamExt;
use kube::runtime::{controller::Action, watcher, Controller};
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Runs the controller for a single provider until the process exits.
/// Never returns under normal operation; the teacher's own `run()`
/// treats its controller stream ending as itself a noteworthy, logged
/// condition rather than a silent exit.
pub async fn run(client: Client, engine: Arc<EngineContext>) {
    let provider_name = engine.provider_name.clone();
    let api: Api<Component> = Api::all(client);
    let predicate = handler_predicate(&provider_name);

    info!(provider = %provider_name, "starting controller");

    Controller::new(api, watcher::Config::default())
        .run(reconcile_one, error_policy, engine)
        .for_each(|result| {
            let provider_name = provider_name.clone();
            async move {
                match result {
                    Ok((object_ref, _action)) => {
                        info!(provider = %provider_name, component = ?object_ref, "reconciled");
                    }
                    Err(e) => {
                        warn!(provider = %provider_name, error = %e, "reconcile error");
                    }
                }
            }
        })
        .await;

    // Only reached if the watch stream itself terminates, which
    // kube_runtime does not do under normal operation.
    error!(provider = %provider_name, "controller loop exited unexpectedly");
}

async fn reconcile_one(component: Arc<Component>, engine: Arc<EngineContext>) -> Result<Action, Error> {
    match reconcile(&component, &engine).await? {
        ReconcileOutcome::Requeue(duration) => Ok(Action::requeue(duration)),
        ReconcileOutcome::NoRequeue => Ok(Action::await_change()),
    }
}

fn error_policy(_component: Arc<Component>, error: &Error, engine: Arc<EngineContext>) -> Action {
    warn!(provider = %engine.provider_name, error = %error, "reconcile failed, backing off");
    Action::requeue(engine.requeue.error_requeue)
}
