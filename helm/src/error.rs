use std::path::PathBuf;

/// Failure acquiring an advisory file lock within its bounded timeout
/// (spec §4.8 "Locking semantics"). Always a transient condition at the
/// call site — never a configuration problem.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("timed out acquiring lock on {0:?}")]
    Timeout(PathBuf),
    #[error("io error acquiring lock on {0:?}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
}

/// Failure retrieving a chart, from either the polymorphic source layer
/// or the reference `HelmOperations` provider built on top of it.
#[derive(Debug, thiserror::Error)]
pub enum ChartSourceError {
    #[error("unknown chart source type {0:?}")]
    UnknownType(String),
    #[error("invalid chart source configuration: {0}")]
    Configuration(String),
    #[error("{0}")]
    Transient(String),
    #[error("lock acquisition failed: {0}")]
    Lock(#[from] LockError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("oci registry error: {0}")]
    Oci(String),
}

impl ChartSourceError {
    /// Whether the engine's `Operations` layer should classify this as
    /// retryable. Configuration and unknown-type errors are permanent;
    /// everything network- or lock-shaped is transient.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            ChartSourceError::UnknownType(_) | ChartSourceError::Configuration(_)
        )
    }
}
