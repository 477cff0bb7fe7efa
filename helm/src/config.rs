//! Wire shape of a Helm-provider Component's `spec.config` and the
//! opaque `status.providerStatus` this provider persists back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct HelmConfig {
    #[serde(rename = "releaseName")]
    pub release_name: String,
    pub namespace: String,
    pub chart: HelmChartConfig,
    #[serde(default)]
    pub values: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelmChartConfig {
    pub source: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelmProviderStatus {
    pub release_name: String,
    pub chart_version: Option<String>,
    pub last_command: Option<String>,
    pub last_exit_code: Option<i32>,
}
