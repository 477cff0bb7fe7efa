//! C9 — the polymorphic chart-source contract. A registry maps a
//! `source.type` discriminator to a factory, which validates its slice
//! of config and returns an immutable chart-source value. Per-reconcile
//! immutability eliminates shared-mutable-state races between
//! concurrent reconciles (spec §4.8).

use crate::error::ChartSourceError;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Shared parameters every chart source needs at retrieval time: where
/// the on-disk cache lives and how long to wait for an advisory lock.
#[derive(Debug, Clone)]
pub struct ChartSourceContext {
    pub cache_dir: PathBuf,
    pub lock_timeout: Duration,
}

#[async_trait]
pub trait ChartSource: Send + Sync {
    /// Retrieves (downloading if necessary) the chart archive and
    /// returns its path on disk, ready for the Helm action library.
    async fn locate_chart(&self, ctx: &ChartSourceContext) -> Result<PathBuf, ChartSourceError>;

    /// The resolved chart version, for status reporting.
    fn version(&self) -> &str;
}

#[async_trait]
pub trait ChartSourceFactory: Send + Sync {
    /// The `source.type` discriminator this factory handles, e.g. `"http"`.
    fn source_type(&self) -> &'static str;

    async fn new_source(
        &self,
        raw_source: &Value,
    ) -> Result<Box<dyn ChartSource>, ChartSourceError>;
}

/// Extracts the discriminator from a raw `source` config section and
/// delegates to the matching registered factory. Unknown `type` is a
/// permanent configuration error (spec §4.8 "Factory registry").
#[derive(Default)]
pub struct CompositeChartSourceFactory {
    factories: std::collections::HashMap<&'static str, Arc<dyn ChartSourceFactory>>,
}

impl CompositeChartSourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn ChartSourceFactory>) {
        self.factories.insert(factory.source_type(), factory);
    }

    pub async fn create_source(
        &self,
        raw_source: &Value,
    ) -> Result<Box<dyn ChartSource>, ChartSourceError> {
        let discriminator = raw_source
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ChartSourceError::Configuration("source.type is required".to_owned()))?;
        let factory = self
            .factories
            .get(discriminator)
            .ok_or_else(|| ChartSourceError::UnknownType(discriminator.to_owned()))?;
        factory.new_source(raw_source).await
    }
}

/// Resolves a possibly-relative chart archive URL against a repository
/// base URL, the way Helm's own index resolution does.
pub fn resolve_chart_url(repo_base: &str, maybe_relative: &str) -> Result<String, ChartSourceError> {
    if maybe_relative.starts_with("http://") || maybe_relative.starts_with("https://") {
        return Ok(maybe_relative.to_owned());
    }
    let base = reqwest::Url::parse(repo_base)
        .map_err(|e| ChartSourceError::Configuration(format!("invalid repository url: {e}")))?;
    base.join(maybe_relative)
        .map(|u| u.to_string())
        .map_err(|e| ChartSourceError::Configuration(format!("cannot resolve chart url: {e}")))
}

pub fn cached_archive_path(cache_dir: &Path, repo_name: &str, chart: &str, version: &str) -> PathBuf {
    cache_dir
        .join("repository")
        .join(format!("{repo_name}-{chart}-{version}.tgz"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_chart_url_passes_through_absolute_urls() {
        let url = resolve_chart_url("https://charts.example.com/stable/", "https://cdn.example.com/a-1.0.0.tgz").unwrap();
        assert_eq!(url, "https://cdn.example.com/a-1.0.0.tgz");
    }

    #[test]
    fn resolve_chart_url_joins_relative_urls_against_repo_base() {
        let url = resolve_chart_url("https://charts.example.com/stable/", "a-1.0.0.tgz").unwrap();
        assert_eq!(url, "https://charts.example.com/stable/a-1.0.0.tgz");
    }

    #[test]
    fn cached_archive_path_is_namespaced_by_repo_chart_version() {
        let path = cached_archive_path(Path::new("/cache"), "bitnami", "nginx", "1.2.3");
        assert_eq!(path, PathBuf::from("/cache/repository/bitnami-nginx-1.2.3.tgz"));
    }

    #[tokio::test]
    async fn unknown_source_type_is_a_configuration_error() {
        let registry = CompositeChartSourceFactory::new();
        let err = registry
            .create_source(&serde_json::json!({ "type": "s3" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ChartSourceError::UnknownType(t) if t == "s3"));
    }

    #[tokio::test]
    async fn missing_type_discriminator_is_a_configuration_error() {
        let registry = CompositeChartSourceFactory::new();
        let err = registry.create_source(&serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ChartSourceError::Configuration(_)));
    }
}
