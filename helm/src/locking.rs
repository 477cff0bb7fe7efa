//! Advisory cross-process file locking for the shared chart cache
//! directory (spec §4.8). `with_lock` is the only permitted way to
//! acquire one of these locks: it polls a non-blocking `try_write`
//! until the lock is free or `timeout` elapses, then runs `f` while
//! holding the guard, releasing it on scope exit regardless of how `f`
//! returns.

use crate::error::LockError;
use std::fs::OpenOptions;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub async fn with_lock<T, F, Fut>(path: &Path, timeout: Duration, f: F) -> Result<T, LockError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LockError::Io(path.to_owned(), e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .map_err(|e| LockError::Io(path.to_owned(), e))?;
    let mut lock = fd_lock::RwLock::new(file);
    let deadline = Instant::now() + timeout;

    loop {
        match lock.try_write() {
            Ok(_guard) => {
                // `_guard` is held across the await below and released
                // when it drops at the end of this match arm.
                return Ok(f().await);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(LockError::Timeout(path.to_owned()));
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            Err(e) => return Err(LockError::Io(path.to_owned(), e)),
        }
    }
}

/// Joins a base cache directory with a lock file name under `repository/`.
pub fn repo_index_lock(cache_dir: &Path, repo_name: &str) -> PathBuf {
    cache_dir.join("repository").join(format!("{repo_name}-index.lock"))
}

pub fn chart_lock(cache_dir: &Path, repo_name: &str, chart: &str, version: &str) -> PathBuf {
    cache_dir
        .join("repository")
        .join(format!("{repo_name}-{chart}-{version}.lock"))
}

pub fn repositories_lock(cache_dir: &Path) -> PathBuf {
    cache_dir.join("repositories.lock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_closure_and_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");
        let result = with_lock(&path, Duration::from_secs(1), || async { 42 })
            .await
            .unwrap();
        assert_eq!(result, 42);
        // A second acquisition must succeed promptly now that the first
        // guard has dropped.
        with_lock(&path, Duration::from_secs(1), || async {})
            .await
            .unwrap();
    }
}
