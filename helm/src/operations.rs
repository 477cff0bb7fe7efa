//! The reference `Operations` implementation this subsystem exists to
//! support: resolves a chart through the source-factory layer (above),
//! then drives the Helm CLI as a subprocess. No native Rust binding of
//! the Helm action library exists in this ecosystem, so shelling out to
//! `helm` — the same integration point most non-Go Helm integrations
//! use — stands in for it here.

use crate::chart_source::{ChartSourceContext, CompositeChartSourceFactory};
use crate::config::{HelmChartConfig, HelmConfig, HelmProviderStatus};
use crate::error::ChartSourceError;
use async_trait::async_trait;
use componentkit::{ActionResult, CheckResult, FactoryError, OperationContext, Operations, OperationsFactory};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HelmOperationsFactory {
    sources: Arc<CompositeChartSourceFactory>,
    cache_dir: PathBuf,
    helm_binary: String,
}

impl HelmOperationsFactory {
    pub fn new(sources: Arc<CompositeChartSourceFactory>, cache_dir: PathBuf) -> Self {
        HelmOperationsFactory {
            sources,
            cache_dir,
            helm_binary: "helm".to_owned(),
        }
    }
}

#[async_trait]
impl OperationsFactory for HelmOperationsFactory {
    fn provider_name(&self) -> &str {
        "helm"
    }

    async fn new_operations(
        &self,
        raw_config: &Value,
        raw_provider_status: Option<&Value>,
    ) -> Result<Box<dyn Operations>, FactoryError> {
        let config: HelmConfig = serde_json::from_value(raw_config.clone())
            .map_err(|e| FactoryError::Configuration(format!("invalid helm config: {e}")))?;
        let status: HelmProviderStatus = match raw_provider_status {
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| FactoryError::Status(format!("invalid helm provider status: {e}")))?,
            None => HelmProviderStatus::default(),
        };
        Ok(Box::new(HelmOperations {
            config,
            status,
            sources: self.sources.clone(),
            cache_dir: self.cache_dir.clone(),
            helm_binary: self.helm_binary.clone(),
        }))
    }
}

pub struct HelmOperations {
    config: HelmConfig,
    status: HelmProviderStatus,
    sources: Arc<CompositeChartSourceFactory>,
    cache_dir: PathBuf,
    helm_binary: String,
}

impl HelmOperations {
    async fn chart_path(&self, chart: &HelmChartConfig) -> Result<(PathBuf, String), ChartSourceError> {
        let source = self.sources.create_source(&chart.source).await?;
        let ctx = ChartSourceContext {
            cache_dir: self.cache_dir.clone(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        };
        let path = source.locate_chart(&ctx).await?;
        Ok((path, source.version().to_owned()))
    }

    async fn upgrade_install(&self) -> ActionResult {
        let (chart_path, chart_version) = match self.chart_path(&self.config.chart).await {
            Ok(resolved) => resolved,
            Err(err) => {
                return action_error_from_chart_source(&self.status, err);
            }
        };

        let mut values_file = None;
        let mut args = vec![
            "upgrade".to_owned(),
            "--install".to_owned(),
            self.config.release_name.clone(),
            chart_path.to_string_lossy().into_owned(),
            "--namespace".to_owned(),
            self.config.namespace.clone(),
            "--create-namespace".to_owned(),
        ];
        if let Some(values) = &self.config.values {
            match write_values_file(values).await {
                Ok(file) => {
                    args.push("--values".to_owned());
                    args.push(file.path().to_string_lossy().into_owned());
                    values_file = Some(file);
                }
                Err(e) => {
                    return ActionResult::PermanentError {
                        updated_status: self.status_value(Some(chart_version), None, None),
                        err: format!("writing values file: {e}"),
                    };
                }
            }
        }

        let outcome = self.run_helm(&args).await;
        drop(values_file);
        self.classify_action(outcome, Some(chart_version), "upgrade --install")
    }

    async fn run_helm(&self, args: &[String]) -> std::io::Result<std::process::Output> {
        Command::new(&self.helm_binary).args(args).output().await
    }

    fn classify_action(
        &self,
        outcome: std::io::Result<std::process::Output>,
        chart_version: Option<String>,
        command: &str,
    ) -> ActionResult {
        match outcome {
            Ok(output) if output.status.success() => ActionResult::Success {
                updated_status: self.status_value(chart_version, Some(command.to_owned()), output.status.code()),
                details: Some(format!("{command} succeeded")),
            },
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                let status = self.status_value(chart_version, Some(command.to_owned()), output.status.code());
                if is_transient_helm_error(&stderr) {
                    ActionResult::TransientError { updated_status: status, err: stderr }
                } else {
                    ActionResult::PermanentError { updated_status: status, err: stderr }
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to spawn helm");
                ActionResult::TransientError {
                    updated_status: self.status_value(chart_version, Some(command.to_owned()), None),
                    err: format!("failed to spawn helm: {e}"),
                }
            }
        }
    }

    fn status_value(
        &self,
        chart_version: Option<String>,
        last_command: Option<String>,
        last_exit_code: Option<i32>,
    ) -> Value {
        serde_json::to_value(HelmProviderStatus {
            release_name: self.config.release_name.clone(),
            chart_version: chart_version.or_else(|| self.status.chart_version.clone()),
            last_command,
            last_exit_code,
        })
        .unwrap_or_else(|_| Value::Null)
    }
}

#[async_trait]
impl Operations for HelmOperations {
    async fn deploy(&self, _ctx: &OperationContext) -> ActionResult {
        self.upgrade_install().await
    }

    async fn check_applied(&self, _ctx: &OperationContext) -> CheckResult {
        let args = [
            "status".to_owned(),
            self.config.release_name.clone(),
            "--namespace".to_owned(),
            self.config.namespace.clone(),
            "--output".to_owned(),
            "json".to_owned(),
        ];
        match self.run_helm(&args).await {
            Ok(output) if output.status.success() => {
                match parse_release_status(&output.stdout) {
                    Some(status) if status == "deployed" => CheckResult::Success {
                        updated_status: self.status_value(None, Some("status".to_owned()), output.status.code()),
                        details: Some("release deployed".to_owned()),
                    },
                    Some(status) if status == "failed" => CheckResult::PermanentError {
                        updated_status: self.status_value(None, Some("status".to_owned()), output.status.code()),
                        err: format!("release status: {status}"),
                    },
                    Some(status) => CheckResult::InProgress {
                        updated_status: self.status_value(None, Some("status".to_owned()), output.status.code()),
                        details: Some(format!("release status: {status}")),
                    },
                    None => CheckResult::TransientError {
                        updated_status: self.status_value(None, Some("status".to_owned()), output.status.code()),
                        err: "could not parse helm status output".to_owned(),
                    },
                }
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                CheckResult::TransientError {
                    updated_status: self.status_value(None, Some("status".to_owned()), output.status.code()),
                    err: stderr,
                }
            }
            Err(e) => CheckResult::TransientError {
                updated_status: self.status_value(None, Some("status".to_owned()), None),
                err: format!("failed to spawn helm: {e}"),
            },
        }
    }

    async fn upgrade(&self, _ctx: &OperationContext) -> ActionResult {
        self.upgrade_install().await
    }

    async fn delete(&self, _ctx: &OperationContext) -> ActionResult {
        let args = [
            "uninstall".to_owned(),
            self.config.release_name.clone(),
            "--namespace".to_owned(),
            self.config.namespace.clone(),
        ];
        match self.run_helm(&args).await {
            Ok(output) if output.status.success() => ActionResult::Success {
                updated_status: self.status_value(None, Some("uninstall".to_owned()), output.status.code()),
                details: Some("release uninstalled".to_owned()),
            },
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                if stderr.contains("release: not found") {
                    // Idempotent delete: already gone is success (spec §4.3).
                    ActionResult::Success {
                        updated_status: self.status_value(None, Some("uninstall".to_owned()), output.status.code()),
                        details: Some("release already absent".to_owned()),
                    }
                } else if is_transient_helm_error(&stderr) {
                    ActionResult::TransientError {
                        updated_status: self.status_value(None, Some("uninstall".to_owned()), output.status.code()),
                        err: stderr,
                    }
                } else {
                    ActionResult::PermanentError {
                        updated_status: self.status_value(None, Some("uninstall".to_owned()), output.status.code()),
                        err: stderr,
                    }
                }
            }
            Err(e) => ActionResult::TransientError {
                updated_status: self.status_value(None, Some("uninstall".to_owned()), None),
                err: format!("failed to spawn helm: {e}"),
            },
        }
    }

    async fn check_deleted(&self, _ctx: &OperationContext) -> CheckResult {
        let args = [
            "status".to_owned(),
            self.config.release_name.clone(),
            "--namespace".to_owned(),
            self.config.namespace.clone(),
            "--output".to_owned(),
            "json".to_owned(),
        ];
        match self.run_helm(&args).await {
            Ok(output) if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                if stderr.contains("release: not found") {
                    CheckResult::Success {
                        updated_status: self.status_value(None, Some("status".to_owned()), output.status.code()),
                        details: Some("release removed".to_owned()),
                    }
                } else {
                    CheckResult::TransientError {
                        updated_status: self.status_value(None, Some("status".to_owned()), output.status.code()),
                        err: stderr,
                    }
                }
            }
            Ok(output) => CheckResult::InProgress {
                updated_status: self.status_value(None, Some("status".to_owned()), output.status.code()),
                details: Some("release still present".to_owned()),
            },
            Err(e) => CheckResult::TransientError {
                updated_status: self.status_value(None, Some("status".to_owned()), None),
                err: format!("failed to spawn helm: {e}"),
            },
        }
    }
}

fn action_error_from_chart_source(status: &HelmProviderStatus, err: ChartSourceError) -> ActionResult {
    let updated_status = serde_json::to_value(status.clone()).unwrap_or(Value::Null);
    if err.is_transient() {
        ActionResult::TransientError {
            updated_status,
            err: err.to_string(),
        }
    } else {
        ActionResult::PermanentError {
            updated_status,
            err: err.to_string(),
        }
    }
}

fn is_transient_helm_error(stderr: &str) -> bool {
    stderr.contains("another operation (install/upgrade/rollback) is in progress")
        || stderr.contains("timed out waiting for the condition")
        || stderr.contains("connection refused")
}

fn parse_release_status(stdout: &[u8]) -> Option<String> {
    let parsed: Value = serde_json::from_slice(stdout).ok()?;
    parsed
        .get("info")?
        .get("status")?
        .as_str()
        .map(str::to_owned)
}

async fn write_values_file(values: &Value) -> std::io::Result<tempfile::NamedTempFile> {
    let yaml = serde_yaml::to_string(values)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let file = tempfile::NamedTempFile::new()?;
    tokio::fs::write(file.path(), yaml).await?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_known_transient_helm_errors() {
        assert!(is_transient_helm_error(
            "Error: another operation (install/upgrade/rollback) is in progress"
        ));
        assert!(is_transient_helm_error("Error: timed out waiting for the condition"));
        assert!(!is_transient_helm_error("Error: execution error at (my-chart/templates/x.yaml:3:4)"));
    }

    #[test]
    fn parses_release_status_from_helm_status_json() {
        let stdout = br#"{"name":"my-release","info":{"status":"deployed"}}"#;
        assert_eq!(parse_release_status(stdout), Some("deployed".to_owned()));
    }

    #[test]
    fn missing_info_status_parses_to_none() {
        assert_eq!(parse_release_status(b"{}"), None);
        assert_eq!(parse_release_status(b"not json"), None);
    }
}
