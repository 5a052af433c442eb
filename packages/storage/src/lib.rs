//! Object storage for the documents a submission needs.
//!
//! - S3-compatible storage in production/staging
//! - On-disk storage for local dev
//! - In-memory storage for tests
//!
//! [`Storage`] is a thin wrapper around `object_store`; [`DocumentStore`]
//! lays resumes and applicant profiles out on top of it.

mod config;
mod documents;

use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{ObjectStore, ObjectStoreExt, PutPayload};
use serde::Serialize;
use serde::de::DeserializeOwned;
use submission_core::ConfigError;

pub use config::{S3Config, StorageBackendConfig, StorageConfig, StorageKind};
pub use documents::{DocumentStore, ResumeMetadata};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid object key {0:?}")]
    InvalidKey(String),

    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(object_store::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StorageError::NotFound { key: path },
            other => StorageError::ObjectStore(other),
        }
    }
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// A key/value view over one object-store backend, scoped by an optional
/// key prefix.
#[derive(Clone)]
pub struct Storage {
    kind: StorageKind,
    backend: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("kind", &self.kind)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl Storage {
    pub async fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let kind = cfg.backend.kind();
        let backend: Arc<dyn ObjectStore> = match cfg.backend {
            StorageBackendConfig::S3(s3) => Arc::new(s3.build_store()?),
            StorageBackendConfig::Filesystem { root } => {
                std::fs::create_dir_all(&root)?;
                Arc::new(object_store::local::LocalFileSystem::new_with_prefix(&root)?)
            }
            StorageBackendConfig::Memory => Arc::new(object_store::memory::InMemory::new()),
        };

        let prefix = cfg
            .prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        tracing::info!(backend = kind.as_str(), prefix = ?prefix, "Document storage ready");

        Ok(Self {
            kind,
            backend,
            prefix,
        })
    }

    pub async fn from_env() -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env()?).await
    }

    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    fn object_path(&self, key: &str) -> Result<Path, StorageError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(match &self.prefix {
            Some(prefix) => Path::from(format!("{prefix}/{key}")),
            None => Path::from(key),
        })
    }

    pub async fn put_bytes(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        self.backend.put(&path, PutPayload::from(bytes)).await?;
        tracing::debug!(%path, "Stored object");
        Ok(())
    }

    pub async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.object_path(key)?;
        Ok(self.backend.get(&path).await?.bytes().await?)
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.backend.delete(&self.object_path(key)?).await?;
        Ok(())
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let encoded = serde_json::to_vec(value)?;
        self.put_bytes(key, Bytes::from(encoded)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, StorageError> {
        let raw = self.get_bytes(key).await?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[tokio::test]
    async fn prefix_is_applied_to_keys() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory().with_prefix("/tenant-a/")).await?;
        assert_eq!(storage.object_path("/cv.pdf")?.as_ref(), "tenant-a/cv.pdf");
        assert!(matches!(
            storage.object_path("/"),
            Err(StorageError::InvalidKey(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn missing_object_is_not_found() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory()).await?;
        let err = storage.get_bytes("nope.bin").await;
        assert!(matches!(err, Err(ref e) if e.is_not_found()));
        Ok(())
    }

    #[tokio::test]
    async fn filesystem_backend_creates_root_and_deletes() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("documents");
        let storage = Storage::new(StorageConfig::filesystem(&root)).await?;
        assert_eq!(storage.kind(), StorageKind::Filesystem);
        assert!(root.is_dir());

        let profile = serde_json::json!({ "full_name": "Sam Rivera", "email": "sam@example.com" });
        storage.put_json("profiles/u1.json", &profile).await?;
        let stored: serde_json::Value = storage.get_json("profiles/u1.json").await?;
        assert_eq!(stored, profile);

        storage.delete("profiles/u1.json").await?;
        let gone = storage.get_bytes("profiles/u1.json").await;
        assert!(matches!(gone, Err(ref e) if e.is_not_found()));
        Ok(())
    }
}
