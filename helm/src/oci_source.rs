//! OCI registry chart source (spec §4.8 "OCI registry source"). Parses
//! an `oci://<registry>/<path>:<version>` reference, optionally logs in
//! using credentials read from a cluster Secret, and pulls the chart
//! archive layer into the shared cache under a per-ref lock.

use crate::chart_source::{ChartSource, ChartSourceContext, ChartSourceFactory};
use crate::error::ChartSourceError;
use crate::locking::with_lock;
use async_trait::async_trait;
use oci_client::client::{Client, ClientConfig};
use oci_client::secrets::RegistryAuth;
use oci_client::Reference;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Media type Helm uses when storing charts as OCI artifacts.
const HELM_CHART_CONTENT_MEDIA_TYPE: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";

#[derive(Debug, Clone, Deserialize)]
struct OciSourceConfig {
    #[serde(rename = "ref")]
    reference: String,
    auth: Option<OciAuthRef>,
}

#[derive(Debug, Clone, Deserialize)]
struct OciAuthRef {
    #[serde(rename = "secretName")]
    secret_name: String,
    #[serde(rename = "secretNamespace")]
    secret_namespace: String,
}

/// Reads the credential Secret referenced by an OCI source. A trait so
/// tests can supply fixed credentials without a live API server.
#[async_trait]
pub trait SecretReader: Send + Sync {
    async fn read(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<std::collections::BTreeMap<String, Vec<u8>>, ChartSourceError>;
}

pub struct KubeSecretReader {
    client: kube::Client,
}

impl KubeSecretReader {
    pub fn new(client: kube::Client) -> Self {
        KubeSecretReader { client }
    }
}

#[async_trait]
impl SecretReader for KubeSecretReader {
    async fn read(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<std::collections::BTreeMap<String, Vec<u8>>, ChartSourceError> {
        use k8s_openapi::api::core::v1::Secret;
        use kube::Api;

        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get(name)
            .await
            .map_err(|e| ChartSourceError::Transient(format!("reading secret {namespace}/{name}: {e}")))?;
        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect())
    }
}

pub struct OciChartSourceFactory {
    secrets: Arc<dyn SecretReader>,
    cache_dir: PathBuf,
    lock_timeout: Duration,
}

impl OciChartSourceFactory {
    pub fn new(secrets: Arc<dyn SecretReader>, cache_dir: PathBuf) -> Self {
        OciChartSourceFactory {
            secrets,
            cache_dir,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

#[async_trait]
impl ChartSourceFactory for OciChartSourceFactory {
    fn source_type(&self) -> &'static str {
        "oci"
    }

    async fn new_source(
        &self,
        raw_source: &Value,
    ) -> Result<Box<dyn ChartSource>, ChartSourceError> {
        let config: OciSourceConfig = serde_json::from_value(raw_source.clone())
            .map_err(|e| ChartSourceError::Configuration(format!("invalid oci source: {e}")))?;
        let (registry, repository, version) = parse_oci_reference(&config.reference)?;
        Ok(Box::new(OciChartSource {
            reference: config.reference.clone(),
            registry,
            repository,
            version,
            auth: config.auth,
            secrets: self.secrets.clone(),
            cache_dir: self.cache_dir.clone(),
            lock_timeout: self.lock_timeout,
        }))
    }
}

pub struct OciChartSource {
    reference: String,
    registry: String,
    repository: String,
    version: String,
    auth: Option<OciAuthRef>,
    secrets: Arc<dyn SecretReader>,
    cache_dir: PathBuf,
    lock_timeout: Duration,
}

#[async_trait]
impl ChartSource for OciChartSource {
    async fn locate_chart(&self, _ctx: &ChartSourceContext) -> Result<PathBuf, ChartSourceError> {
        let dest = self
            .cache_dir
            .join("repository")
            .join(format!(
                "{}-{}.tgz",
                self.repository.replace('/', "_"),
                self.version
            ));
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            return Ok(dest);
        }

        let lock_path = self.cache_dir.join("repository").join(format!(
            "{}-{}-{}.lock",
            self.registry.replace(':', "_"),
            self.repository.replace('/', "_"),
            self.version
        ));

        let auth = self.resolve_auth().await?;
        let reference = Reference::try_from(self.reference.trim_start_matches("oci://"))
            .map_err(|e| ChartSourceError::Configuration(format!("invalid oci reference: {e}")))?;

        let dest_for_lock = dest.clone();
        with_lock(&lock_path, self.lock_timeout, move || async move {
            if tokio::fs::try_exists(&dest_for_lock).await.unwrap_or(false) {
                return Ok(());
            }
            let client = Client::new(ClientConfig::default());
            let data = client
                .pull(&reference, &auth, vec![HELM_CHART_CONTENT_MEDIA_TYPE])
                .await
                .map_err(|e| ChartSourceError::Oci(e.to_string()))?;
            let layer = data
                .layers
                .into_iter()
                .next()
                .ok_or_else(|| ChartSourceError::Oci("manifest has no chart layer".to_owned()))?;
            if let Some(parent) = dest_for_lock.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest_for_lock, &layer.data).await?;
            Ok(())
        })
        .await
        .map_err(ChartSourceError::from)??;
        Ok(dest)
    }

    fn version(&self) -> &str {
        &self.version
    }
}

impl OciChartSource {
    async fn resolve_auth(&self) -> Result<RegistryAuth, ChartSourceError> {
        let Some(auth_ref) = &self.auth else {
            return Ok(RegistryAuth::Anonymous);
        };
        let data = self
            .secrets
            .read(&auth_ref.secret_namespace, &auth_ref.secret_name)
            .await?;
        if let Some(token) = data.get("token") {
            return Ok(RegistryAuth::Bearer(
                String::from_utf8_lossy(token).into_owned(),
            ));
        }
        let username = data
            .get("username")
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .ok_or_else(|| {
                ChartSourceError::Configuration(
                    "oci auth secret must contain token or username/password".to_owned(),
                )
            })?;
        let password = data
            .get("password")
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .unwrap_or_default();
        Ok(RegistryAuth::Basic(username, password))
    }
}

/// Parses `oci://<registry>/<path>:<version>`. `path` must contain at
/// least one slash and `version` must be present (spec §4.8).
fn parse_oci_reference(raw: &str) -> Result<(String, String, String), ChartSourceError> {
    let stripped = raw.strip_prefix("oci://").ok_or_else(|| {
        ChartSourceError::Configuration(format!("oci reference must start with oci://: {raw:?}"))
    })?;
    let (registry_and_path, version) = stripped.rsplit_once(':').ok_or_else(|| {
        ChartSourceError::Configuration(format!("oci reference missing :version suffix: {raw:?}"))
    })?;
    if version.is_empty() {
        return Err(ChartSourceError::Configuration(format!(
            "oci reference missing version: {raw:?}"
        )));
    }
    let (registry, path) = registry_and_path.split_once('/').ok_or_else(|| {
        ChartSourceError::Configuration(format!(
            "oci reference path must contain at least one slash: {raw:?}"
        ))
    })?;
    if path.is_empty() {
        return Err(ChartSourceError::Configuration(format!(
            "oci reference path is empty: {raw:?}"
        )));
    }
    Ok((registry.to_owned(), path.to_owned(), version.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_reference() {
        let (registry, path, version) =
            parse_oci_reference("oci://registry.example.com/charts/nginx:1.2.3").unwrap();
        assert_eq!(registry, "registry.example.com");
        assert_eq!(path, "charts/nginx");
        assert_eq!(version, "1.2.3");
    }

    #[test]
    fn rejects_missing_version() {
        assert!(parse_oci_reference("oci://registry.example.com/charts/nginx").is_err());
    }

    #[test]
    fn rejects_path_without_slash() {
        assert!(parse_oci_reference("oci://registry.example.com/nginx:1.2.3").is_err());
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(parse_oci_reference("registry.example.com/charts/nginx:1.2.3").is_err());
    }
}
