//! Read-only config-source provider: `Deploy` is the only non-trivial
//! method (fetch once, stash the result), `Delete` is a no-op success
//! since there is nothing external to tear down (spec §4.2 "Provider
//! instances").

use async_trait::async_trait;
use componentkit::{ActionResult, CheckResult, FactoryError, OperationContext, Operations, OperationsFactory};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
struct ConfigReaderConfig {
    url: String,
}

#[derive(Default)]
pub struct ConfigReaderOperationsFactory {
    http: reqwest::Client,
}

impl ConfigReaderOperationsFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OperationsFactory for ConfigReaderOperationsFactory {
    fn provider_name(&self) -> &str {
        "config-reader"
    }

    async fn new_operations(
        &self,
        raw_config: &Value,
        _raw_provider_status: Option<&Value>,
    ) -> Result<Box<dyn Operations>, FactoryError> {
        let config: ConfigReaderConfig = serde_json::from_value(raw_config.clone())
            .map_err(|e| FactoryError::Configuration(format!("invalid config-reader config: {e}")))?;
        Ok(Box::new(ConfigReaderOperations {
            http: self.http.clone(),
            config,
        }))
    }
}

pub struct ConfigReaderOperations {
    http: reqwest::Client,
    config: ConfigReaderConfig,
}

#[async_trait]
impl Operations for ConfigReaderOperations {
    async fn deploy(&self, _ctx: &OperationContext) -> ActionResult {
        match self.http.get(&self.config.url).send().await {
            Ok(response) => match response.error_for_status() {
                Ok(response) => match response.text().await {
                    Ok(body) => ActionResult::Success {
                        updated_status: serde_json::json!({ "contents": body }),
                        details: Some(format!("read {}", self.config.url)),
                    },
                    Err(e) => ActionResult::TransientError {
                        updated_status: Value::Null,
                        err: e.to_string(),
                    },
                },
                Err(e) => ActionResult::TransientError {
                    updated_status: Value::Null,
                    err: e.to_string(),
                },
            },
            Err(e) => ActionResult::TransientError {
                updated_status: Value::Null,
                err: e.to_string(),
            },
        }
    }

    async fn check_applied(&self, _ctx: &OperationContext) -> CheckResult {
        CheckResult::Success { updated_status: Value::Null, details: None }
    }

    async fn upgrade(&self, ctx: &OperationContext) -> ActionResult {
        self.deploy(ctx).await
    }

    async fn delete(&self, _ctx: &OperationContext) -> ActionResult {
        ActionResult::Success { updated_status: Value::Null, details: None }
    }

    async fn check_deleted(&self, _ctx: &OperationContext) -> CheckResult {
        CheckResult::Success { updated_status: Value::Null, details: None }
    }
}
