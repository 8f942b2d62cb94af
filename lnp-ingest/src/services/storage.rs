//! File storage backends
//!
//! Paths are relative, `/`-separated and content addressed. Writes of the same
//! path always carry the same bytes, so a retried `put` is harmless.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ApiError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid storage path: {0}")]
    InvalidPath(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),

    #[error("all storage backends failed: {0}")]
    Unavailable(String),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(path) => ApiError::NotFound(format!("file {} not found", path)),
            StorageError::InvalidPath(msg) => ApiError::BadRequest(msg),
            other => ApiError::TransientStorageFailure(other.to_string()),
        }
    }
}

#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Backend label for logs
    fn name(&self) -> &str;
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError>;
    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError>;
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;
    /// Remove an object; deleting a missing path succeeds
    async fn delete(&self, path: &str) -> Result<(), StorageError>;
}

/// Directory-backed storage under the tenant root
pub struct LocalStorage {
    name: String,
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(name: &str, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            root: root.into(),
        }
    }

    /// Resolve a relative storage path, refusing anything that escapes the root
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        if path.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Temp file + rename: readers never see a partial object
        let tmp = target.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(backend = %self.name, path, size = bytes.len(), "Stored object");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let target = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&target).await?)
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {
                debug!(backend = %self.name, path, "Removed object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Primary backend with a secondary tried before giving up
///
/// Every backend call is bounded by `timeout`.
pub struct FallbackStorage {
    primary: Arc<dyn FileStorage>,
    secondary: Arc<dyn FileStorage>,
    timeout: Duration,
}

impl FallbackStorage {
    pub fn new(primary: Arc<dyn FileStorage>, secondary: Arc<dyn FileStorage>, timeout: Duration) -> Self {
        Self {
            primary,
            secondary,
            timeout,
        }
    }
}

async fn bounded<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T, StorageError>>,
) -> Result<T, StorageError> {
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or(Err(StorageError::Timeout(timeout)))
}

#[async_trait]
impl FileStorage for FallbackStorage {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let primary_err = match bounded(self.timeout, self.primary.put(path, bytes)).await {
            Ok(()) => return Ok(()),
            Err(StorageError::InvalidPath(p)) => return Err(StorageError::InvalidPath(p)),
            Err(e) => e,
        };

        warn!(
            backend = self.primary.name(),
            path,
            error = %primary_err,
            "Primary storage write failed, trying {}",
            self.secondary.name()
        );

        bounded(self.timeout, self.secondary.put(path, bytes))
            .await
            .map_err(|secondary_err| {
                StorageError::Unavailable(format!(
                    "{}: {}; {}: {}",
                    self.primary.name(),
                    primary_err,
                    self.secondary.name(),
                    secondary_err
                ))
            })
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        match bounded(self.timeout, self.primary.get(path)).await {
            Ok(bytes) => Ok(bytes),
            Err(StorageError::InvalidPath(p)) => Err(StorageError::InvalidPath(p)),
            Err(e) => {
                debug!(backend = self.primary.name(), path, error = %e, "Primary read failed, trying secondary");
                bounded(self.timeout, self.secondary.get(path)).await
            }
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        if bounded(self.timeout, self.primary.exists(path)).await.unwrap_or(false) {
            return Ok(true);
        }
        bounded(self.timeout, self.secondary.exists(path)).await
    }

    /// Removes the object from both backends, since a write may have landed on either
    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let primary = bounded(self.timeout, self.primary.delete(path)).await;
        let secondary = bounded(self.timeout, self.secondary.delete(path)).await;
        primary.and(secondary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct BrokenStorage;

    #[async_trait]
    impl FileStorage for BrokenStorage {
        fn name(&self) -> &str {
            "broken"
        }
        async fn put(&self, _path: &str, _bytes: &[u8]) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::other("disk offline")))
        }
        async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
            Err(StorageError::NotFound(path.to_string()))
        }
        async fn exists(&self, _path: &str) -> Result<bool, StorageError> {
            Ok(false)
        }
        async fn delete(&self, _path: &str) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::other("disk offline")))
        }
    }

    struct SlowStorage;

    #[async_trait]
    impl FileStorage for SlowStorage {
        fn name(&self) -> &str {
            "slow"
        }
        async fn put(&self, _path: &str, _bytes: &[u8]) -> Result<(), StorageError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
        async fn get(&self, _path: &str) -> Result<Vec<u8>, StorageError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![])
        }
        async fn exists(&self, _path: &str) -> Result<bool, StorageError> {
            Ok(false)
        }
        async fn delete(&self, _path: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_local_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new("primary", dir.path());

        storage.put("lesson-notes/2024/1/week-1/7/abc.pdf", b"%PDF-1.4").await.unwrap();
        assert!(storage.exists("lesson-notes/2024/1/week-1/7/abc.pdf").await.unwrap());
        assert_eq!(
            storage.get("lesson-notes/2024/1/week-1/7/abc.pdf").await.unwrap(),
            b"%PDF-1.4"
        );
        assert!(matches!(
            storage.get("lesson-notes/missing.pdf").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_local_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new("primary", dir.path());

        storage.put("staging/7/abc", b"%PDF-1.4").await.unwrap();
        storage.delete("staging/7/abc").await.unwrap();
        assert!(!storage.exists("staging/7/abc").await.unwrap());
        storage.delete("staging/7/abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_fallback_delete_reports_backend_failure() {
        let dir = TempDir::new().unwrap();
        let primary = Arc::new(LocalStorage::new("primary", dir.path()));
        primary.put("a/b.pdf", b"data").await.unwrap();
        let storage = FallbackStorage::new(primary.clone(), Arc::new(BrokenStorage), Duration::from_secs(5));

        assert!(storage.delete("a/b.pdf").await.is_err());
        // The healthy backend still removed its copy
        assert!(!primary.exists("a/b.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_rejects_escaping_paths() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new("primary", dir.path());
        for bad in ["../etc/passwd", "/etc/passwd", "a/../../b", ""] {
            assert!(matches!(
                storage.put(bad, b"x").await,
                Err(StorageError::InvalidPath(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_fallback_used_when_primary_fails() {
        let dir = TempDir::new().unwrap();
        let secondary = Arc::new(LocalStorage::new("secondary", dir.path()));
        let storage = FallbackStorage::new(Arc::new(BrokenStorage), secondary.clone(), Duration::from_secs(5));

        storage.put("a/b.pdf", b"data").await.unwrap();
        assert!(secondary.exists("a/b.pdf").await.unwrap());
        assert_eq!(storage.get("a/b.pdf").await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_both_backends_failing_is_transient() {
        let storage = FallbackStorage::new(
            Arc::new(SlowStorage),
            Arc::new(BrokenStorage),
            Duration::from_millis(50),
        );
        let err = storage.put("a/b.pdf", b"data").await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
        assert!(ApiError::from(err).is_transient());
    }
}
