//! Object storage backend for blob payloads (S3/MinIO/Azure/local filesystem/memory).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::buffered::BufWriter;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use common::blob::BlobKey;
use common::error::BlobStoreError;
use common::store::{storage_path, BlobStore};

use crate::error::{Result, StorageError};

/// Probed by health checks. Never written.
const HEALTH_PROBE_PATH: &str = "_health/probe";

/// Configuration for the object storage backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    /// In-memory storage (for testing)
    #[default]
    Memory,

    /// Local filesystem storage
    Local {
        /// Path to the storage directory
        path: PathBuf,
    },

    /// S3-compatible storage (AWS S3, MinIO, etc.)
    S3 {
        /// S3 endpoint URL (e.g., "http://localhost:9000" for MinIO)
        endpoint: String,
        access_key: String,
        secret_key: String,
        bucket: String,
        /// Optional region (defaults to "us-east-1")
        region: Option<String>,
    },

    /// Azure Blob Storage
    Azure {
        account: String,
        access_key: String,
        container: String,
        /// Custom endpoint (e.g. "http://127.0.0.1:10000/devstoreaccount1" for Azurite)
        endpoint: Option<String>,
    },
}

/// [`BlobStore`] over any `object_store` backend.
#[derive(Debug, Clone)]
pub struct ObjectBlobStore {
    inner: Arc<dyn ObjectStore>,
    /// Base directory of the local backend
    local_root: Option<PathBuf>,
}

impl ObjectBlobStore {
    /// Create a new storage backend from configuration.
    pub async fn new(config: ObjectStoreConfig) -> Result<Self> {
        let mut local_root = None;
        let inner: Arc<dyn ObjectStore> = match &config {
            ObjectStoreConfig::Memory => Arc::new(InMemory::new()),

            ObjectStoreConfig::Local { path } => {
                tokio::fs::create_dir_all(path).await?;
                local_root = Some(path.clone());
                Arc::new(
                    LocalFileSystem::new_with_prefix(path)
                        .map_err(|e| StorageError::InvalidConfig(e.to_string()))?,
                )
            }

            ObjectStoreConfig::S3 {
                endpoint,
                access_key,
                secret_key,
                bucket,
                region,
            } => {
                let store: Arc<dyn ObjectStore> = Arc::new(
                    AmazonS3Builder::new()
                        .with_endpoint(endpoint)
                        .with_access_key_id(access_key)
                        .with_secret_access_key(secret_key)
                        .with_bucket_name(bucket)
                        .with_region(region.as_deref().unwrap_or("us-east-1"))
                        .with_allow_http(endpoint.starts_with("http://"))
                        .build()
                        .map_err(|e| StorageError::InvalidConfig(e.to_string()))?,
                );
                verify_bucket(store.as_ref(), bucket).await?;
                store
            }

            ObjectStoreConfig::Azure {
                account,
                access_key,
                container,
                endpoint,
            } => {
                let mut builder = MicrosoftAzureBuilder::new()
                    .with_account(account)
                    .with_access_key(access_key)
                    .with_container_name(container);
                if let Some(endpoint) = endpoint {
                    builder = builder
                        .with_endpoint(endpoint.clone())
                        .with_allow_http(endpoint.starts_with("http://"));
                }
                let store: Arc<dyn ObjectStore> = Arc::new(
                    builder
                        .build()
                        .map_err(|e| StorageError::InvalidConfig(e.to_string()))?,
                );
                verify_bucket(store.as_ref(), container).await?;
                store
            }
        };

        tracing::info!(backend = %inner, "blob store ready");
        Ok(Self { inner, local_root })
    }

    /// Fully in-memory store.
    pub fn memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
            local_root: None,
        }
    }

    fn object_path(key: &BlobKey) -> ObjectPath {
        ObjectPath::from(storage_path(key))
    }
}

/// List the bucket root so a missing bucket fails at startup instead of on
/// the first write.
async fn verify_bucket(store: &dyn ObjectStore, bucket: &str) -> Result<()> {
    let mut stream = store.list(None);
    match stream.try_next().await {
        Ok(_) => Ok(()),
        Err(object_store::Error::NotFound { .. }) => {
            Err(StorageError::BucketNotFound(bucket.to_string()))
        }
        Err(e) => {
            let msg = e.to_string();
            if msg.contains("NoSuchBucket") || msg.contains("ContainerNotFound") {
                return Err(StorageError::BucketNotFound(bucket.to_string()));
            }
            Err(e.into())
        }
    }
}

fn store_err(key: &BlobKey, err: object_store::Error) -> BlobStoreError {
    match err {
        object_store::Error::NotFound { .. } => BlobStoreError::NotFound(key.clone()),
        err => BlobStoreError::backend(err),
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn save(
        &self,
        key: &BlobKey,
        contents: &mut (dyn AsyncRead + Send + Unpin),
    ) -> std::result::Result<(), BlobStoreError> {
        let path = Self::object_path(key);
        let mut writer = BufWriter::new(self.inner.clone(), path);

        let copied = match tokio::io::copy(contents, &mut writer).await {
            Ok(copied) => copied,
            Err(e) => {
                if let Err(abort) = writer.abort().await {
                    tracing::warn!(key = %key, error = %abort, "failed to abort partial upload");
                }
                return Err(e.into());
            }
        };
        writer.shutdown().await?;

        tracing::debug!(key = %key, size = copied, "saved blob payload");
        Ok(())
    }

    async fn read(
        &self,
        key: &BlobKey,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> std::result::Result<(), BlobStoreError> {
        let path = Self::object_path(key);
        let result = self
            .inner
            .get(&path)
            .await
            .map_err(|e| store_err(key, e))?;

        let mut chunks = result.into_stream();
        while let Some(chunk) = chunks.try_next().await.map_err(|e| store_err(key, e))? {
            writer.write_all(&chunk).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    async fn delete(&self, key: &BlobKey) -> std::result::Result<(), BlobStoreError> {
        let path = Self::object_path(key);
        // Ignore NotFound errors - the payload may already be deleted
        match self.inner.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(BlobStoreError::backend(e)),
        }
    }

    async fn health_check(&self) -> std::result::Result<(), BlobStoreError> {
        // LocalFileSystem reports a deleted root as NotFound on the probe
        if let Some(root) = &self.local_root {
            match tokio::fs::metadata(root).await {
                Ok(meta) if meta.is_dir() => {}
                _ => {
                    tracing::warn!(path = %root.display(), "blob store directory is missing");
                    return Err(BlobStoreError::Unavailable);
                }
            }
        }

        match self.inner.head(&ObjectPath::from(HEALTH_PROBE_PATH)).await {
            Ok(_) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "blob store health check failed");
                Err(BlobStoreError::Unavailable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn save_bytes(store: &ObjectBlobStore, key: &BlobKey, data: &[u8]) {
        let mut reader = data;
        store.save(key, &mut reader).await.unwrap();
    }

    async fn read_bytes(
        store: &ObjectBlobStore,
        key: &BlobKey,
    ) -> std::result::Result<Vec<u8>, BlobStoreError> {
        let mut out = Vec::new();
        store.read(key, &mut out).await?;
        Ok(out)
    }

    #[tokio::test]
    async fn test_memory_storage() {
        let store = ObjectBlobStore::memory();
        let key = BlobKey::generate("subject-1");

        save_bytes(&store, &key, b"hello world").await;
        assert_eq!(read_bytes(&store, &key).await.unwrap(), b"hello world");

        store.delete(&key).await.unwrap();
        assert!(matches!(
            read_bytes(&store, &key).await,
            Err(BlobStoreError::NotFound(k)) if k == key
        ));

        // deleting again is fine
        store.delete(&key).await.unwrap();
        store.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_local_storage() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = ObjectStoreConfig::Local {
            path: temp_dir.path().join("blobs"),
        };
        let store = ObjectBlobStore::new(config).await.unwrap();
        let key = BlobKey::generate("../escape");

        save_bytes(&store, &key, b"test data").await;
        assert_eq!(read_bytes(&store, &key).await.unwrap(), b"test data");

        // the payload lands under the encoded subject, inside the prefix
        let file_path = temp_dir.path().join("blobs").join(storage_path(&key));
        assert!(file_path.exists());
        store.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_local_health_needs_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("blobs");
        let store = ObjectBlobStore::new(ObjectStoreConfig::Local { path: root.clone() })
            .await
            .unwrap();
        store.health_check().await.unwrap();

        tokio::fs::remove_dir_all(&root).await.unwrap();
        assert!(matches!(
            store.health_check().await,
            Err(BlobStoreError::Unavailable)
        ));
    }

    #[tokio::test]
    async fn test_large_payload_is_streamed() {
        let store = ObjectBlobStore::memory();
        let key = BlobKey::generate("big");
        let data: Vec<u8> = (0..(12 * 1024 * 1024)).map(|i| (i % 251) as u8).collect();

        save_bytes(&store, &key, &data).await;
        assert_eq!(read_bytes(&store, &key).await.unwrap(), data);
    }

    #[test]
    fn test_config_serde() {
        let config: ObjectStoreConfig =
            serde_json::from_str(r#"{"type":"local","path":"/tmp/blobs"}"#).unwrap();
        assert_eq!(
            config,
            ObjectStoreConfig::Local {
                path: PathBuf::from("/tmp/blobs")
            }
        );
        let config: ObjectStoreConfig = serde_json::from_str(r#"{"type":"memory"}"#).unwrap();
        assert_eq!(config, ObjectStoreConfig::Memory);
        let config: ObjectStoreConfig = serde_json::from_str(
            r#"{"type":"azure","account":"acct","access_key":"a2V5","container":"blobs","endpoint":null}"#,
        )
        .unwrap();
        assert_eq!(
            config,
            ObjectStoreConfig::Azure {
                account: "acct".into(),
                access_key: "a2V5".into(),
                container: "blobs".into(),
                endpoint: None,
            }
        );
    }
}
