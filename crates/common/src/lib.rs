/**
 * Blob identity, tags and the record shape
 *  returned by the metadata index.
 */
pub mod blob;
/**
 * Opaque search cursors handed to clients.
 */
pub mod continuation;
pub mod error;
/**
 * Removal of abandoned staged records and
 *  expired blobs, payload first.
 */
pub mod gc;
/**
 * The metadata index contract: staging,
 *  completion, lookup, tag search and
 *  the collector's scan.
 */
pub mod index;
/**
 * The byte store contract for blob payloads.
 */
pub mod store;
/**
 * Tag normalization and validation rules
 *  applied before anything is written.
 */
pub mod tags;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub mod prelude {
    pub use crate::blob::{BlobInfo, BlobKey, BlobTags, NULL_SUBJECT};
    pub use crate::continuation::{Continuation, ContinuationToken};
    pub use crate::error::{BlobStoreError, GcError, IndexError, TagError};
    pub use crate::gc::{collect_garbage, GcReport};
    pub use crate::index::{MetadataIndex, SearchPage, SearchQuery};
    pub use crate::store::{storage_path, BlobStore};
    pub use crate::tags::{normalize_tag_map, parse_blob_tags, ParsedTags, TagMap};
    pub use crate::version::build_info;
}
