//! Raw-manifest provider: applies an arbitrary Kubernetes object via
//! server-side apply and polls its `status.conditions` the way `kstatus`
//! does, without attempting to special-case every workload kind.

use async_trait::async_trait;
use componentkit::{ActionResult, CheckResult, FactoryError, OperationContext, Operations, OperationsFactory};
use kube::api::{DynamicObject, Patch, PatchParams};
use kube::core::{GroupVersionKind, TypeMeta};
use kube::discovery::{self, Scope};
use kube::{Api, Client};
use serde::Deserialize;
use serde_json::Value;

const MANAGER_NAME: &str = "componentkit-manifest";

#[derive(Debug, Clone, Deserialize)]
struct ManifestConfig {
    manifest: Value,
    #[serde(default)]
    namespace: Option<String>,
}

pub struct ManifestOperationsFactory {
    client: Client,
}

impl ManifestOperationsFactory {
    pub fn new(client: Client) -> Self {
        ManifestOperationsFactory { client }
    }
}

#[async_trait]
impl OperationsFactory for ManifestOperationsFactory {
    fn provider_name(&self) -> &str {
        "manifest"
    }

    async fn new_operations(
        &self,
        raw_config: &Value,
        _raw_provider_status: Option<&Value>,
    ) -> Result<Box<dyn Operations>, FactoryError> {
        let config: ManifestConfig = serde_json::from_value(raw_config.clone())
            .map_err(|e| FactoryError::Configuration(format!("invalid manifest config: {e}")))?;
        let type_meta: TypeMeta = serde_json::from_value(config.manifest.clone())
            .map_err(|e| FactoryError::Configuration(format!("manifest missing apiVersion/kind: {e}")))?;
        Ok(Box::new(ManifestOperations {
            client: self.client.clone(),
            config,
            type_meta,
        }))
    }
}

pub struct ManifestOperations {
    client: Client,
    config: ManifestConfig,
    type_meta: TypeMeta,
}

impl ManifestOperations {
    async fn api(&self) -> Result<Api<DynamicObject>, String> {
        let gvk = GroupVersionKind::try_from(&self.type_meta).map_err(|e| e.to_string())?;
        let (resource, capabilities) = discovery::oneshot::pinned_kind(&self.client, &gvk)
            .await
            .map_err(|e| format!("discovering {gvk:?}: {e}"))?;
        Ok(match (&capabilities.scope, &self.config.namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &resource),
            _ => Api::all_with(self.client.clone(), &resource),
        })
    }

    fn object_name(&self) -> Option<String> {
        object_name_of(&self.config.manifest)
    }
}

fn object_name_of(manifest: &Value) -> Option<String> {
    manifest
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

#[async_trait]
impl Operations for ManifestOperations {
    async fn deploy(&self, _ctx: &OperationContext) -> ActionResult {
        let Some(name) = self.object_name() else {
            return ActionResult::PermanentError {
                updated_status: Value::Null,
                err: "manifest.metadata.name is required".to_owned(),
            };
        };
        let api = match self.api().await {
            Ok(api) => api,
            Err(err) => return ActionResult::TransientError { updated_status: Value::Null, err },
        };
        let patch = Patch::Apply(&self.config.manifest);
        match api.patch(&name, &PatchParams::apply(MANAGER_NAME), &patch).await {
            Ok(applied) => ActionResult::Success {
                updated_status: serde_json::json!({ "appliedGeneration": applied.metadata.generation }),
                details: Some(format!("applied {name}")),
            },
            Err(e) => ActionResult::TransientError {
                updated_status: Value::Null,
                err: format!("applying {name}: {e}"),
            },
        }
    }

    async fn check_applied(&self, _ctx: &OperationContext) -> CheckResult {
        let Some(name) = self.object_name() else {
            return CheckResult::PermanentError {
                updated_status: Value::Null,
                err: "manifest.metadata.name is required".to_owned(),
            };
        };
        let api = match self.api().await {
            Ok(api) => api,
            Err(err) => return CheckResult::TransientError { updated_status: Value::Null, err },
        };
        match api.get(&name).await {
            Ok(object) => {
                if is_ready(&object) {
                    CheckResult::Success {
                        updated_status: Value::Null,
                        details: Some(format!("{name} is ready")),
                    }
                } else {
                    CheckResult::InProgress {
                        updated_status: Value::Null,
                        details: Some(format!("{name} not yet ready")),
                    }
                }
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => CheckResult::InProgress {
                updated_status: Value::Null,
                details: Some(format!("{name} not yet observed")),
            },
            Err(e) => CheckResult::TransientError {
                updated_status: Value::Null,
                err: format!("reading {name}: {e}"),
            },
        }
    }

    async fn upgrade(&self, ctx: &OperationContext) -> ActionResult {
        self.deploy(ctx).await
    }

    async fn delete(&self, _ctx: &OperationContext) -> ActionResult {
        let Some(name) = self.object_name() else {
            return ActionResult::Success {
                updated_status: Value::Null,
                details: Some("nothing to delete".to_owned()),
            };
        };
        let api = match self.api().await {
            Ok(api) => api,
            Err(err) => return ActionResult::TransientError { updated_status: Value::Null, err },
        };
        match api.delete(&name, &Default::default()).await {
            Ok(_) => ActionResult::Success {
                updated_status: Value::Null,
                details: Some(format!("deleting {name}")),
            },
            Err(kube::Error::Api(ae)) if ae.code == 404 => ActionResult::Success {
                updated_status: Value::Null,
                details: Some(format!("{name} already absent")),
            },
            Err(e) => ActionResult::TransientError {
                updated_status: Value::Null,
                err: format!("deleting {name}: {e}"),
            },
        }
    }

    async fn check_deleted(&self, _ctx: &OperationContext) -> CheckResult {
        let Some(name) = self.object_name() else {
            return CheckResult::Success { updated_status: Value::Null, details: None };
        };
        let api = match self.api().await {
            Ok(api) => api,
            Err(err) => return CheckResult::TransientError { updated_status: Value::Null, err },
        };
        match api.get(&name).await {
            Ok(_) => CheckResult::InProgress {
                updated_status: Value::Null,
                details: Some(format!("{name} still present")),
            },
            Err(kube::Error::Api(ae)) if ae.code == 404 => CheckResult::Success {
                updated_status: Value::Null,
                details: Some(format!("{name} removed")),
            },
            Err(e) => CheckResult::TransientError {
                updated_status: Value::Null,
                err: format!("checking {name}: {e}"),
            },
        }
    }
}

fn is_ready(object: &DynamicObject) -> bool {
    object
        .data
        .get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(Value::as_array)
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some("Ready")
                    && c.get("status").and_then(Value::as_str) == Some("True")
            })
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_name_is_read_from_manifest_metadata() {
        let manifest = serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "my-app" },
        });
        assert_eq!(object_name_of(&manifest), Some("my-app".to_owned()));
    }

    #[test]
    fn object_name_is_none_without_metadata_name() {
        let manifest = serde_json::json!({ "apiVersion": "v1", "kind": "ConfigMap" });
        assert_eq!(object_name_of(&manifest), None);
    }

    #[test]
    fn is_ready_requires_ready_true_condition() {
        let not_ready: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "my-app" },
            "status": { "conditions": [{ "type": "Ready", "status": "False" }] },
        }))
        .unwrap();
        assert!(!is_ready(&not_ready));

        let ready: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "my-app" },
            "status": { "conditions": [{ "type": "Ready", "status": "True" }] },
        }))
        .unwrap();
        assert!(is_ready(&ready));
    }

    #[test]
    fn is_ready_false_without_conditions() {
        let object: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "my-app" },
        }))
        .unwrap();
        assert!(!is_ready(&object));
    }
}
