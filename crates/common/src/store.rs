use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::blob::BlobKey;
use crate::error::BlobStoreError;

/// Durable storage for blob payloads, addressed by [`BlobKey`].
///
/// Payloads are opaque to the store. Implementations must be safe for
/// concurrent use.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write the full contents of `contents` under `key`.
    async fn save(
        &self,
        key: &BlobKey,
        contents: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), BlobStoreError>;

    /// Copy the payload of `key` into `writer`.
    async fn read(
        &self,
        key: &BlobKey,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), BlobStoreError>;

    /// Remove the payload. Deleting an absent key is not an error.
    async fn delete(&self, key: &BlobKey) -> Result<(), BlobStoreError>;

    async fn health_check(&self) -> Result<(), BlobStoreError>;
}

/// Relative storage location of a payload: `<base64url(subject)>/<id>`.
///
/// The subject is encoded so it cannot contain separators or `..`.
pub fn storage_path(key: &BlobKey) -> String {
    format!(
        "{}/{}",
        URL_SAFE_NO_PAD.encode(key.subject.as_bytes()),
        key.id
    )
}
