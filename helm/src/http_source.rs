//! HTTP repository chart source (spec §4.8 "HTTP repository source").
//! Resolves a chart's download URL through a two-level index cache —
//! an in-memory LRU keyed by repository name, backed by an on-disk
//! `<name>-index.yaml` snapshot — and downloads the archive under a
//! per-chart-version lock so concurrent replicas collapse to one
//! download instead of racing.

use crate::chart_source::{
    cached_archive_path, resolve_chart_url, ChartSource, ChartSourceContext, ChartSourceFactory,
};
use crate::error::ChartSourceError;
use crate::locking::{self, with_lock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
const INDEX_CACHE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Deserialize)]
struct HttpSourceConfig {
    #[serde(rename = "repoName")]
    repo_name: String,
    #[serde(rename = "repoUrl")]
    repo_url: String,
    chart: String,
    version: String,
    #[serde(rename = "refreshIntervalSecs")]
    refresh_interval_secs: Option<u64>,
}

/// `repositories.yaml` — aggregated HTTP repository configuration, in
/// the format Helm's own CLI reads and writes.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RepositoryFile {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    api_version: String,
    #[serde(default)]
    repositories: Vec<RepositoryEntry>,
}

fn default_api_version() -> String {
    "v1".to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct RepositoryEntry {
    name: String,
    url: String,
}

/// A repository index (`<name>-index.yaml`), trimmed to the fields the
/// chart source actually consumes.
#[derive(Debug, Clone, Deserialize, Serialize)]
struct IndexFile {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    api_version: String,
    entries: HashMap<String, Vec<ChartVersionEntry>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct ChartVersionEntry {
    version: String,
    urls: Vec<String>,
}

struct CachedIndex {
    index: IndexFile,
    fetched_at: DateTime<Utc>,
}

/// Shared state for every chart sourced from HTTP repositories;
/// constructed once per process and handed to each `HttpChartSource`.
pub struct HttpChartSourceFactory {
    cache_dir: PathBuf,
    lock_timeout: Duration,
    http: reqwest::Client,
    index_cache: Arc<Mutex<LruCache<String, CachedIndex>>>,
}

impl HttpChartSourceFactory {
    pub fn new(cache_dir: PathBuf) -> Self {
        HttpChartSourceFactory {
            cache_dir,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            http: reqwest::Client::new(),
            index_cache: Arc::new(Mutex::new(LruCache::new(
                NonZeroUsize::new(INDEX_CACHE_CAPACITY).unwrap(),
            ))),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

#[async_trait]
impl ChartSourceFactory for HttpChartSourceFactory {
    fn source_type(&self) -> &'static str {
        "http"
    }

    async fn new_source(
        &self,
        raw_source: &Value,
    ) -> Result<Box<dyn ChartSource>, ChartSourceError> {
        let config: HttpSourceConfig = serde_json::from_value(raw_source.clone())
            .map_err(|e| ChartSourceError::Configuration(format!("invalid http source: {e}")))?;
        Ok(Box::new(HttpChartSource {
            config,
            cache_dir: self.cache_dir.clone(),
            lock_timeout: self.lock_timeout,
            http: self.http.clone(),
            index_cache: self.index_cache.clone(),
        }))
    }
}

pub struct HttpChartSource {
    config: HttpSourceConfig,
    cache_dir: PathBuf,
    lock_timeout: Duration,
    http: reqwest::Client,
    index_cache: Arc<Mutex<LruCache<String, CachedIndex>>>,
}

#[async_trait]
impl ChartSource for HttpChartSource {
    async fn locate_chart(&self, _ctx: &ChartSourceContext) -> Result<PathBuf, ChartSourceError> {
        self.ensure_repository_registered().await?;
        let index = self.resolve_index().await?;
        let entry = self.resolve_version(&index)?;
        let archive_url = resolve_chart_url(
            &self.config.repo_url,
            entry.urls.first().ok_or_else(|| {
                ChartSourceError::Transient(format!(
                    "index entry for {}@{} has no URLs",
                    self.config.chart, self.config.version
                ))
            })?,
        )?;
        self.download_archive(&archive_url).await
    }

    fn version(&self) -> &str {
        &self.config.version
    }
}

impl HttpChartSource {
    async fn ensure_repository_registered(&self) -> Result<(), ChartSourceError> {
        let path = self.cache_dir.join("repositories.yaml");
        let lock_path = locking::repositories_lock(&self.cache_dir);
        let repo_name = self.config.repo_name.clone();
        let repo_url = self.config.repo_url.clone();
        with_lock(&lock_path, self.lock_timeout, || async move {
            let mut file: RepositoryFile = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_yaml::from_slice(&bytes)
                    .map_err(ChartSourceError::from)
                    .unwrap_or_default(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => RepositoryFile::default(),
                Err(e) => return Err(ChartSourceError::Io(e)),
            };
            if let Some(existing) = file.repositories.iter_mut().find(|r| r.name == repo_name) {
                existing.url = repo_url;
            } else {
                file.repositories.push(RepositoryEntry {
                    name: repo_name,
                    url: repo_url,
                });
            }
            let serialized = serde_yaml::to_vec(&file)?;
            tokio::fs::write(&path, serialized).await?;
            Ok(())
        })
        .await
        .map_err(ChartSourceError::from)?
    }

    async fn resolve_index(&self) -> Result<IndexFile, ChartSourceError> {
        let refresh_interval = self
            .config
            .refresh_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REFRESH_INTERVAL);

        if let Some(cached) = self.index_cache.lock().await.get(&self.config.repo_name) {
            if Utc::now() - cached.fetched_at < chrono::Duration::from_std(refresh_interval).unwrap() {
                return Ok(cached.index.clone());
            }
        }

        let disk_path = self
            .cache_dir
            .join("repository")
            .join(format!("{}-index.yaml", self.config.repo_name));
        if let Ok(bytes) = tokio::fs::read(&disk_path).await {
            if let Ok(meta) = tokio::fs::metadata(&disk_path).await {
                let age = meta
                    .modified()
                    .ok()
                    .and_then(|m| m.elapsed().ok())
                    .unwrap_or(Duration::MAX);
                if age < refresh_interval {
                    if let Ok(index) = serde_yaml::from_slice::<IndexFile>(&bytes) {
                        self.index_cache.lock().await.put(
                            self.config.repo_name.clone(),
                            CachedIndex {
                                index: index.clone(),
                                fetched_at: Utc::now(),
                            },
                        );
                        return Ok(index);
                    }
                }
            }
        }

        // Miss: acquire the per-repo lock and re-check freshness
        // (double-checked locking) before downloading.
        let lock_path = locking::repo_index_lock(&self.cache_dir, &self.config.repo_name);
        let repo_url = self.config.repo_url.clone();
        let repo_name = self.config.repo_name.clone();
        let http = self.http.clone();
        let index_cache = self.index_cache.clone();
        let cache_dir = self.cache_dir.clone();
        with_lock(&lock_path, self.lock_timeout, move || async move {
            let disk_path = cache_dir.join("repository").join(format!("{repo_name}-index.yaml"));
            if let Ok(bytes) = tokio::fs::read(&disk_path).await {
                if let Ok(meta) = tokio::fs::metadata(&disk_path).await {
                    let age = meta
                        .modified()
                        .ok()
                        .and_then(|m| m.elapsed().ok())
                        .unwrap_or(Duration::MAX);
                    if age < refresh_interval {
                        if let Ok(index) = serde_yaml::from_slice::<IndexFile>(&bytes) {
                            return Ok(index);
                        }
                    }
                }
            }

            let url = format!("{}/index.yaml", repo_url.trim_end_matches('/'));
            let response = http.get(&url).send().await?;
            let body = response
                .error_for_status()
                .map_err(ChartSourceError::from)?
                .bytes()
                .await?;
            let index: IndexFile = serde_yaml::from_slice(&body)?;
            if let Some(parent) = disk_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&disk_path, &body).await?;
            index_cache.lock().await.put(
                repo_name,
                CachedIndex {
                    index: index.clone(),
                    fetched_at: Utc::now(),
                },
            );
            Ok(index)
        })
        .await
        .map_err(ChartSourceError::from)?
    }

    fn resolve_version(&self, index: &IndexFile) -> Result<ChartVersionEntry, ChartSourceError> {
        let versions = index.entries.get(&self.config.chart).ok_or_else(|| {
            ChartSourceError::Configuration(format!(
                "chart {:?} not found in repository {:?}",
                self.config.chart, self.config.repo_name
            ))
        })?;
        versions
            .iter()
            .find(|v| v.version == self.config.version)
            .cloned()
            .ok_or_else(|| {
                ChartSourceError::Configuration(format!(
                    "version {:?} of chart {:?} not found in repository {:?}",
                    self.config.version, self.config.chart, self.config.repo_name
                ))
            })
    }

    async fn download_archive(&self, url: &str) -> Result<PathBuf, ChartSourceError> {
        let dest = cached_archive_path(
            &self.cache_dir,
            &self.config.repo_name,
            &self.config.chart,
            &self.config.version,
        );
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            return Ok(dest);
        }

        let lock_path = locking::chart_lock(
            &self.cache_dir,
            &self.config.repo_name,
            &self.config.chart,
            &self.config.version,
        );
        let http = self.http.clone();
        let url = url.to_owned();
        let dest_for_lock = dest.clone();
        with_lock(&lock_path, self.lock_timeout, move || async move {
            if tokio::fs::try_exists(&dest_for_lock).await.unwrap_or(false) {
                return Ok(());
            }
            let bytes = http
                .get(&url)
                .send()
                .await?
                .error_for_status()
                .map_err(ChartSourceError::from)?
                .bytes()
                .await?;
            if let Some(parent) = dest_for_lock.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest_for_lock, &bytes).await?;
            Ok(())
        })
        .await
        .map_err(ChartSourceError::from)??;
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_file_round_trips_through_yaml() {
        let file = RepositoryFile {
            api_version: "v1".to_owned(),
            repositories: vec![RepositoryEntry {
                name: "stable".to_owned(),
                url: "https://charts.example.com".to_owned(),
            }],
        };
        let yaml = serde_yaml::to_string(&file).unwrap();
        let parsed: RepositoryFile = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.repositories, file.repositories);
    }
}
