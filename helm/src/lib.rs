//! componentkit-helm: the Helm chart-source plugin layer (polymorphic
//! source factories over a shared on-disk cache) and the reference
//! `HelmOperations` provider built on top of it.

pub mod chart_source;
pub mod config;
pub mod error;
pub mod http_source;
pub mod locking;
pub mod oci_source;
pub mod operations;

pub use chart_source::{
    ChartSource, ChartSourceContext, ChartSourceFactory, CompositeChartSourceFactory,
};
pub use config::{HelmChartConfig, HelmConfig, HelmProviderStatus};
pub use error::{ChartSourceError, LockError};
pub use http_source::HttpChartSourceFactory;
pub use oci_source::{KubeSecretReader, OciChartSourceFactory, SecretReader};
pub use operations::{HelmOperations, HelmOperationsFactory};

use std::path::PathBuf;
use std::sync::Arc;

/// Builds the composite chart-source factory with both stock source
/// types registered, the way a caller typically wants it (spec §4.8).
pub fn default_chart_sources(
    cache_dir: PathBuf,
    secrets: Arc<dyn SecretReader>,
) -> CompositeChartSourceFactory {
    let mut registry = CompositeChartSourceFactory::new();
    registry.register(Arc::new(HttpChartSourceFactory::new(cache_dir.clone())));
    registry.register(Arc::new(OciChartSourceFactory::new(secrets, cache_dir)));
    registry
}
