//! Secrets Manager push provider: puts a Component-scoped secret value
//! and keeps it current on upgrade. Deletion removes it with a recovery
//! window (matching the default, non-`ForceDelete` AWS behavior).

use async_trait::async_trait;
use aws_sdk_secretsmanager::Client as SecretsManagerClient;
use componentkit::{ActionResult, CheckResult, FactoryError, OperationContext, Operations, OperationsFactory};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
struct SecretPushConfig {
    #[serde(rename = "secretId")]
    secret_id: String,
    #[serde(rename = "secretValue")]
    secret_value: String,
}

pub struct SecretPushOperationsFactory {
    client: SecretsManagerClient,
}

impl SecretPushOperationsFactory {
    pub fn new(client: SecretsManagerClient) -> Self {
        SecretPushOperationsFactory { client }
    }
}

#[async_trait]
impl OperationsFactory for SecretPushOperationsFactory {
    fn provider_name(&self) -> &str {
        "secret-push"
    }

    async fn new_operations(
        &self,
        raw_config: &Value,
        _raw_provider_status: Option<&Value>,
    ) -> Result<Box<dyn Operations>, FactoryError> {
        let config: SecretPushConfig = serde_json::from_value(raw_config.clone())
            .map_err(|e| FactoryError::Configuration(format!("invalid secret-push config: {e}")))?;
        Ok(Box::new(SecretPushOperations {
            client: self.client.clone(),
            config,
        }))
    }
}

pub struct SecretPushOperations {
    client: SecretsManagerClient,
    config: SecretPushConfig,
}

#[async_trait]
impl Operations for SecretPushOperations {
    async fn deploy(&self, _ctx: &OperationContext) -> ActionResult {
        let create_result = self
            .client
            .create_secret()
            .name(&self.config.secret_id)
            .secret_string(&self.config.secret_value)
            .send()
            .await;
        match create_result {
            Ok(_) => ActionResult::Success {
                updated_status: Value::Null,
                details: Some(format!("created secret {}", self.config.secret_id)),
            },
            Err(e) if error_contains(&e, "ResourceExistsException") => self.put_value().await,
            Err(e) => ActionResult::TransientError {
                updated_status: Value::Null,
                err: e.to_string(),
            },
        }
    }

    async fn check_applied(&self, _ctx: &OperationContext) -> CheckResult {
        CheckResult::Success { updated_status: Value::Null, details: None }
    }

    async fn upgrade(&self, _ctx: &OperationContext) -> ActionResult {
        self.put_value().await
    }

    async fn delete(&self, _ctx: &OperationContext) -> ActionResult {
        match self
            .client
            .delete_secret()
            .secret_id(&self.config.secret_id)
            .send()
            .await
        {
            Ok(_) => ActionResult::Success {
                updated_status: Value::Null,
                details: Some(format!("scheduled deletion of {}", self.config.secret_id)),
            },
            Err(e) if error_contains(&e, "ResourceNotFoundException") => ActionResult::Success {
                updated_status: Value::Null,
                details: Some("secret already absent".to_owned()),
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

impl SecretPushOperations {
    async fn put_value(&self) -> ActionResult {
        match self
            .client
            .put_secret_value()
            .secret_id(&self.config.secret_id)
            .secret_string(&self.config.secret_value)
            .send()
            .await
        {
            Ok(_) => ActionResult::Success {
                updated_status: Value::Null,
                details: Some(format!("updated secret {}", self.config.secret_id)),
            },
            Err(e) => ActionResult::TransientError {
                updated_status: Value::Null,
                err: e.to_string(),
            },
        }
    }
}

fn error_contains<E: std::fmt::Debug>(err: &E, needle: &str) -> bool {
    format!("{err:?}").contains(needle)
}
