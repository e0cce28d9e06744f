//! Blob storage for review images.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
    #[error("storage I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Where a blob ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub key: String,
    pub url: String,
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<StoredBlob, StorageError>;

    /// Deleting a key that does not exist succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Files under a local directory, served back under `public_base`.
pub struct LocalStorage {
    root: PathBuf,
    public_base: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            public_base: public_base.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Only plain relative keys are accepted; `..`, absolute paths and empty
    /// keys are refused.
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let plain = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

/// Public URL for `key` under `base`.
pub fn resolve_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}

#[async_trait]
impl BlobStorage for LocalStorage {
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<StoredBlob, StorageError> {
        let path = self.path_for(key)?;
        let io_err = |source| StorageError::Io {
            key: key.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&path, bytes).await.map_err(io_err)?;

        Ok(StoredBlob {
            key: key.to_string(),
            url: resolve_url(&self.public_base, key),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url() {
        assert_eq!(resolve_url("/uploads", "r/1_a.png"), "/uploads/r/1_a.png");
        assert_eq!(
            resolve_url("https://cdn.example.com/img/", "r/1_a.png"),
            "https://cdn.example.com/img/r/1_a.png"
        );
    }

    #[tokio::test]
    async fn test_save_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "/uploads").unwrap();

        let blob = storage.save("review/1_dish.png", b"png").await.unwrap();
        assert_eq!(blob.url, "/uploads/review/1_dish.png");
        let on_disk = std::fs::read(dir.path().join("review/1_dish.png")).unwrap();
        assert_eq!(on_disk, b"png");

        storage.delete("review/1_dish.png").await.unwrap();
        assert!(!dir.path().join("review/1_dish.png").exists());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "/uploads").unwrap();
        storage.delete("nope/never.png").await.unwrap();
    }

    #[tokio::test]
    async fn test_traversal_keys_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "/uploads").unwrap();
        for key in ["../escape.png", "/etc/passwd", "", "a/../../b"] {
            assert!(matches!(
                storage.save(key, b"x").await,
                Err(StorageError::InvalidKey(_))
            ));
        }
    }
}
