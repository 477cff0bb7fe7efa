//! IAM role provider: thin sketch covering the create → attach →
//! detach → delete sequencing an IAM role needs, reusing the same
//! `NoSuchEntity`-is-success idempotency note as [`crate::iam_policy`].

use async_trait::async_trait;
use aws_sdk_iam::Client as IamClient;
use componentkit::{ActionResult, CheckResult, FactoryError, OperationContext, Operations, OperationsFactory};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
struct IamRoleConfig {
    #[serde(rename = "roleName")]
    role_name: String,
    #[serde(rename = "assumeRolePolicyDocument")]
    assume_role_policy_document: Value,
    #[serde(rename = "attachedPolicyArns", default)]
    attached_policy_arns: Vec<String>,
}

pub struct IamRoleOperationsFactory {
    client: IamClient,
}

impl IamRoleOperationsFactory {
    pub fn new(client: IamClient) -> Self {
        IamRoleOperationsFactory { client }
    }
}

#[async_trait]
impl OperationsFactory for IamRoleOperationsFactory {
    fn provider_name(&self) -> &str {
        "iam-role"
    }

    async fn new_operations(
        &self,
        raw_config: &Value,
        _raw_provider_status: Option<&Value>,
    ) -> Result<Box<dyn Operations>, FactoryError> {
        let config: IamRoleConfig = serde_json::from_value(raw_config.clone())
            .map_err(|e| FactoryError::Configuration(format!("invalid iam-role config: {e}")))?;
        Ok(Box::new(IamRoleOperations {
            client: self.client.clone(),
            config,
        }))
    }
}

pub struct IamRoleOperations {
    client: IamClient,
    config: IamRoleConfig,
}

#[async_trait]
impl Operations for IamRoleOperations {
    async fn deploy(&self, _ctx: &OperationContext) -> ActionResult {
        let document = self.config.assume_role_policy_document.to_string();
        let create_result = self
            .client
            .create_role()
            .role_name(&self.config.role_name)
            .assume_role_policy_document(&document)
            .send()
            .await;
        if let Err(e) = &create_result {
            if !error_contains(e, "EntityAlreadyExists") {
                return ActionResult::TransientError {
                    updated_status: Value::Null,
                    err: e.to_string(),
                };
            }
        }

        for arn in &self.config.attached_policy_arns {
            if let Err(e) = self
                .client
                .attach_role_policy()
                .role_name(&self.config.role_name)
                .policy_arn(arn)
                .send()
                .await
            {
                return ActionResult::TransientError {
                    updated_status: Value::Null,
                    err: format!("attaching {arn} to {}: {e}", self.config.role_name),
                };
            }
        }

        ActionResult::Success {
            updated_status: serde_json::json!({ "roleName": self.config.role_name }),
            details: Some(format!("role {} provisioned", self.config.role_name)),
        }
    }

    async fn check_applied(&self, _ctx: &OperationContext) -> CheckResult {
        CheckResult::Success { updated_status: Value::Null, details: None }
    }

    async fn upgrade(&self, ctx: &OperationContext) -> ActionResult {
        self.deploy(ctx).await
    }

    async fn delete(&self, _ctx: &OperationContext) -> ActionResult {
        for arn in &self.config.attached_policy_arns {
            if let Err(e) = self
                .client
                .detach_role_policy()
                .role_name(&self.config.role_name)
                .policy_arn(arn)
                .send()
                .await
            {
                if !error_contains(&e, "NoSuchEntity") {
                    return ActionResult::TransientError {
                        updated_status: Value::Null,
                        err: format!("detaching {arn} from {}: {e}", self.config.role_name),
                    };
                }
            }
        }

        match self.client.delete_role().role_name(&self.config.role_name).send().await {
            Ok(_) => ActionResult::Success {
                updated_status: Value::Null,
                details: Some(format!("deleted role {}", self.config.role_name)),
            },
            Err(e) if error_contains(&e, "NoSuchEntity") => ActionResult::Success {
                updated_status: Value::Null,
                details: Some("role already absent".to_owned()),
            },
            Err(e) => ActionResult::TransientError {
                updated_status: Value::Null,
                err: e.to_string(),
            },
        }
    }

    async fn check_deleted(&self, _ctx: &OperationContext) -> CheckResult {
        CheckResult::Success { updated_status: Value::Null, details: None }
    }
}

fn error_contains<E: std::fmt::Debug>(err: &E, needle: &str) -> bool {
    format!("{err:?}").contains(needle)
}
