//! Garbage collection of abandoned and expired blobs.
//!
//! A write stages metadata, saves the payload, then completes the metadata.
//! A crash between those steps leaves a staged record (and possibly a
//! payload) behind. Expired records linger the same way until removed.
//! The collector removes both, payload first, so an interrupted pass leaves
//! the record in place for the next one to find.

use chrono::{DateTime, Utc};

use crate::blob::BlobKey;
use crate::error::GcError;
use crate::index::{MetadataIndex, SCAN_PAGE_LIMIT};
use crate::store::BlobStore;

/// Outcome of a completed pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Records whose metadata this pass deleted.
    pub removed: u64,
    /// Records another collector deleted first.
    pub skipped: u64,
}

/// Remove every record staged before `older_than` or expired before it,
/// together with its payload.
///
/// "Not found" from the metadata delete means a concurrent collector won the
/// race for that key and is not an error. Any other failure aborts the pass.
pub async fn collect_garbage(
    index: &dyn MetadataIndex,
    store: &dyn BlobStore,
    older_than: DateTime<Utc>,
) -> Result<GcReport, GcError> {
    let mut report = GcReport::default();

    loop {
        let keys = index
            .scan_stale_or_expired(older_than, SCAN_PAGE_LIMIT)
            .await?;
        if keys.is_empty() {
            return Ok(report);
        }

        for key in &keys {
            if remove_key(index, store, key).await? {
                report.removed += 1;
            } else {
                report.skipped += 1;
            }
        }
    }
}

async fn remove_key(
    index: &dyn MetadataIndex,
    store: &dyn BlobStore,
    key: &BlobKey,
) -> Result<bool, GcError> {
    tracing::info!(key = %key, "removing expired blob");
    store.delete(key).await?;

    match index.delete(key).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => {
            tracing::debug!(key = %key, "blob already collected");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
