use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::blob::{BlobInfo, BlobKey, BlobTags};
use crate::continuation::ContinuationToken;
use crate::error::IndexError;
use crate::tags::TagMap;

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const MAX_PAGE_SIZE: usize = 100;

/// Keys returned per [`MetadataIndex::scan_stale_or_expired`] call by the collector.
pub const SCAN_PAGE_LIMIT: usize = 200;

/// Any requested page size outside `1..=MAX_PAGE_SIZE` falls back to the default.
pub fn clamp_page_size(requested: Option<i64>) -> usize {
    match requested {
        Some(size) if size >= 1 && size <= MAX_PAGE_SIZE as i64 => size as usize,
        _ => DEFAULT_PAGE_SIZE,
    }
}

/// A tag search.
///
/// Every `(name, values)` pair of `filter` must be carried by a record, with
/// every listed value present for that name.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub filter: TagMap,
    /// Only records created at or before this instant. Expiration is also
    /// judged at this instant when set, otherwise at the current time.
    pub at: Option<DateTime<Utc>>,
    pub continuation: Option<ContinuationToken>,
    pub page_size: usize,
}

impl SearchQuery {
    pub fn new(filter: TagMap) -> Self {
        Self {
            filter,
            at: None,
            continuation: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = Some(at);
        self
    }

    pub fn continuation(mut self, token: ContinuationToken) -> Self {
        self.continuation = Some(token);
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Page size actually used: out of range values fall back to the default.
    pub fn effective_page_size(&self) -> usize {
        clamp_page_size(i64::try_from(self.page_size).ok())
    }
}

/// One page of search results, newest first.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub items: Vec<BlobInfo>,
    /// Set when more results follow.
    pub next: Option<ContinuationToken>,
}

/// Persists blob metadata and owns every record state transition.
///
/// Records start out staged and invisible; they become visible once
/// completed. Each transition is atomic against the backing store.
#[async_trait]
pub trait MetadataIndex: Send + Sync {
    /// Create a staged record, stamped with the current time.
    async fn stage(&self, key: &BlobKey, tags: &BlobTags) -> Result<BlobInfo, IndexError>;

    /// Promote a staged record to complete.
    async fn complete(&self, key: &BlobKey) -> Result<(), IndexError>;

    /// Remove a staged record and its tags.
    async fn revert(&self, key: &BlobKey) -> Result<(), IndexError>;

    /// Remove a record in any state and its tags.
    async fn delete(&self, key: &BlobKey) -> Result<(), IndexError>;

    /// A complete record that has not expired as of `visible_as_of`.
    async fn get(&self, key: &BlobKey, visible_as_of: DateTime<Utc>) -> Result<BlobInfo, IndexError>;

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, IndexError>;

    /// Keys of records staged before `older_than`, or expired before it
    /// whatever their state.
    async fn scan_stale_or_expired(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<BlobKey>, IndexError>;

    async fn health_check(&self) -> Result<(), IndexError>;
}
