use async_trait::async_trait;
use bytes::Bytes;

use crate::error::BlobError;
use crate::types::{BlobMetadata, ResolvedBlob};

/// Pluggable object-store backend for attachment blobs.
///
/// Implementors provide the actual storage mechanism (e.g. S3, filesystem).
/// The store validates every write against the declared digest and size, so
/// corrupted transfers are rejected at the storage boundary independently of
/// any earlier descriptor check.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a blob under `key`, verifying the content against the declared
    /// digest and size.
    ///
    /// Returns [`BlobError::ContentMismatch`] or [`BlobError::SizeMismatch`]
    /// without storing anything when validation fails.
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        declared_md5: &str,
        declared_size: u64,
        content_type: &str,
    ) -> Result<BlobMetadata, BlobError>;

    /// Retrieve a blob by key, returning both metadata and content.
    /// Returns `None` if the blob does not exist.
    async fn get(&self, key: &str) -> Result<Option<ResolvedBlob>, BlobError>;

    /// Retrieve only the metadata for a blob.
    async fn head(&self, key: &str) -> Result<Option<BlobMetadata>, BlobError>;

    /// List keys starting with the given prefix. Used to discover legacy
    /// `{hash}/{filename}` entries whatever their filename.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, BlobError>;

    /// Copy a blob to a new key, leaving the original in place. Returns
    /// `false` if the source does not exist. Used for legacy-to-canonical
    /// key migration.
    async fn copy(&self, from: &str, to: &str) -> Result<bool, BlobError>;

    /// Delete a blob by key. Returns `true` if the blob existed.
    async fn delete(&self, key: &str) -> Result<bool, BlobError>;
}
