use std::sync::Arc;

use common::error::{BlobStoreError, IndexError};
use common::index::MetadataIndex;
use common::store::BlobStore;
use stash_object_store::{ObjectBlobStore, SqliteIndex, StorageError};

use super::config::Config;

/// Main service state - the metadata index and the payload store
#[derive(Clone)]
pub struct State {
    index: Arc<dyn MetadataIndex>,
    store: Arc<dyn BlobStore>,
}

impl State {
    pub fn new(index: Arc<dyn MetadataIndex>, store: Arc<dyn BlobStore>) -> Self {
        Self { index, store }
    }

    pub async fn from_config(config: &Config) -> Result<Self, StateSetupError> {
        // 1. Setup metadata index
        let index = match config.sqlite_path {
            Some(ref path) => {
                tracing::info!(path = %path.display(), "opening metadata index");
                SqliteIndex::open(path).await?
            }
            // otherwise just set up an in-memory database
            None => {
                tracing::warn!("no database path configured, metadata will not survive a restart");
                SqliteIndex::in_memory().await?
            }
        };

        // 2. Setup payload store
        let store = ObjectBlobStore::new(config.storage.clone()).await?;

        Ok(Self::new(Arc::new(index), Arc::new(store)))
    }

    pub fn index(&self) -> &dyn MetadataIndex {
        self.index.as_ref()
    }

    pub fn store(&self) -> &dyn BlobStore {
        self.store.as_ref()
    }

    /// Both backends answer their health checks.
    pub async fn health_check(&self) -> Result<(), HealthError> {
        let (index, store) = tokio::join!(self.index.health_check(), self.store.health_check());
        index?;
        store?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("metadata index setup error: {0}")]
    Index(#[from] IndexError),
    #[error("blob store setup error: {0}")]
    Store(#[from] StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("metadata index unhealthy: {0}")]
    Index(#[from] IndexError),
    #[error("blob store unhealthy: {0}")]
    Store(#[from] BlobStoreError),
}
