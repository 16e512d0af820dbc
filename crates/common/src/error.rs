//! Error types shared by the metadata index, byte stores and the collector.

use crate::blob::BlobKey;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Rejected tag input. Always the caller's fault.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("{0}")]
    InvalidTag(String),

    #[error("{0}")]
    InvalidSubject(String),

    #[error("invalid time-to-live '{value}': {reason}")]
    InvalidTimeToLive { value: String, reason: String },
}

impl TagError {
    /// Machine-readable code reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            TagError::InvalidSubject(_) => "InvalidSubject",
            TagError::InvalidTag(_) | TagError::InvalidTimeToLive { .. } => "InvalidTag",
        }
    }
}

/// Errors surfaced by a [`crate::index::MetadataIndex`].
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// No complete, visible record for the key.
    #[error("record not found")]
    RecordNotFound,

    /// complete/revert called without a matching staged record
    #[error("staged record not found - was stage() called beforehand?")]
    StagedRecordNotFound,

    #[error("invalid continuation token")]
    InvalidContinuationToken,

    #[error("a record for {0} already exists")]
    KeyConflict(BlobKey),

    /// The index was written by a newer release and must not be interpreted.
    #[error("existing index schema version {found} is newer than the supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    #[error("metadata index unavailable")]
    Unavailable,

    #[error("metadata index error: {0}")]
    Backend(#[source] BoxError),
}

impl IndexError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        IndexError::Backend(Box::new(err))
    }

    /// Whether the error only says the record is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            IndexError::RecordNotFound | IndexError::StagedRecordNotFound
        )
    }
}

/// Errors surfaced by a [`crate::store::BlobStore`].
#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("the blob {0} was not found in the store")]
    NotFound(BlobKey),

    #[error("error accessing storage")]
    Unavailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Backend(#[source] BoxError),
}

impl BlobStoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        BlobStoreError::Backend(Box::new(err))
    }
}

/// A garbage collection pass aborted.
#[derive(Debug, thiserror::Error)]
pub enum GcError {
    #[error("garbage collection failed on the metadata index: {0}")]
    Index(#[from] IndexError),

    #[error("garbage collection failed on the blob store: {0}")]
    Store(#[from] BlobStoreError),
}
