//! SQLite + Object Storage Backends
//!
//! This crate provides the production implementations of the two storage
//! contracts in `common`: a [`SqliteIndex`] for blob metadata and an
//! [`ObjectBlobStore`] that keeps payloads in pluggable object storage
//! (S3/MinIO/local filesystem/memory).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use stash_object_store::{ObjectBlobStore, ObjectStoreConfig, SqliteIndex};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let index = SqliteIndex::open(Path::new("/tmp/stash/index.db")).await?;
//! let store = ObjectBlobStore::new(ObjectStoreConfig::Local {
//!     path: "/tmp/stash/blobs".into(),
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

mod database;
mod error;
mod storage;

pub use database::{SqliteIndex, SUPPORTED_SCHEMA_VERSION};
pub use error::{Result, StorageError};
pub use storage::{ObjectBlobStore, ObjectStoreConfig};
