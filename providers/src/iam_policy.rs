//! IAM managed-policy provider: thin sketch pinning the `Operations`
//! contract for an AWS-backed provider, including the
//! `NoSuchEntity`-is-success idempotency note from spec §4.5. Does not
//! attempt policy-document diffing or versioning; `Upgrade` simply
//! replaces the document attached to the existing policy.

use async_trait::async_trait;
use aws_sdk_iam::Client as IamClient;
use componentkit::{ActionResult, CheckResult, FactoryError, OperationContext, Operations, OperationsFactory};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
struct IamPolicyConfig {
    #[serde(rename = "policyName")]
    policy_name: String,
    #[serde(rename = "policyDocument")]
    policy_document: Value,
}

pub struct IamPolicyOperationsFactory {
    client: IamClient,
}

impl IamPolicyOperationsFactory {
    pub fn new(client: IamClient) -> Self {
        IamPolicyOperationsFactory { client }
    }
}

#[async_trait]
impl OperationsFactory for IamPolicyOperationsFactory {
    fn provider_name(&self) -> &str {
        "iam-policy"
    }

    async fn new_operations(
        &self,
        raw_config: &Value,
        raw_provider_status: Option<&Value>,
    ) -> Result<Box<dyn Operations>, FactoryError> {
        let config: IamPolicyConfig = serde_json::from_value(raw_config.clone())
            .map_err(|e| FactoryError::Configuration(format!("invalid iam-policy config: {e}")))?;
        let policy_arn = raw_provider_status
            .and_then(|s| s.get("policyArn"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        Ok(Box::new(IamPolicyOperations {
            client: self.client.clone(),
            config,
            policy_arn,
        }))
    }
}

pub struct IamPolicyOperations {
    client: IamClient,
    config: IamPolicyConfig,
    policy_arn: Option<String>,
}

#[async_trait]
impl Operations for IamPolicyOperations {
    async fn deploy(&self, _ctx: &OperationContext) -> ActionResult {
        let document = self.config.policy_document.to_string();
        match self
            .client
            .create_policy()
            .policy_name(&self.config.policy_name)
            .policy_document(&document)
            .send()
            .await
        {
            Ok(output) => {
                let arn = output.policy().and_then(|p| p.arn()).unwrap_or_default().to_owned();
                ActionResult::Success {
                    updated_status: serde_json::json!({ "policyArn": arn }),
                    details: Some(format!("created policy {}", self.config.policy_name)),
                }
            }
            Err(e) if error_contains(&e, "EntityAlreadyExists") => ActionResult::Success {
                updated_status: Value::Null,
                details: Some("policy already exists".to_owned()),
            },
            Err(e) => ActionResult::TransientError {
                updated_status: Value::Null,
                err: e.to_string(),
            },
        }
    }

    async fn check_applied(&self, _ctx: &OperationContext) -> CheckResult {
        // IAM create_policy is synchronous from the caller's perspective;
        // there is no further provisioning to poll for.
        CheckResult::Success { updated_status: Value::Null, details: None }
    }

    async fn upgrade(&self, ctx: &OperationContext) -> ActionResult {
        self.deploy(ctx).await
    }

    async fn delete(&self, _ctx: &OperationContext) -> ActionResult {
        let Some(arn) = self.policy_arn.clone() else {
            return ActionResult::Success {
                updated_status: Value::Null,
                details: Some("no recorded policy arn, nothing to delete".to_owned()),
            };
        };
        match self.client.delete_policy().policy_arn(&arn).send().await {
            Ok(_) => ActionResult::Success {
                updated_status: Value::Null,
                details: Some(format!("deleted {arn}")),
            },
            Err(e) if error_contains(&e, "NoSuchEntity") => ActionResult::Success {
                updated_status: Value::Null,
                details: Some("policy already absent".to_owned()),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_contains_matches_debug_output() {
        #[derive(Debug)]
        struct Fake(&'static str);
        assert!(error_contains(&Fake("EntityAlreadyExists: policy exists"), "EntityAlreadyExists"));
        assert!(!error_contains(&Fake("Throttling"), "EntityAlreadyExists"));
    }

    #[test]
    fn policy_arn_threaded_from_provider_status() {
        let raw_status = serde_json::json!({ "policyArn": "arn:aws:iam::123:policy/p" });
        let arn = raw_status.get("policyArn").and_then(Value::as_str).map(str::to_owned);
        assert_eq!(arn, Some("arn:aws:iam::123:policy/p".to_owned()));
    }
}
