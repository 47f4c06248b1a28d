use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for a stored blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobMetadata {
    /// The store key the blob lives under (hash-only or legacy layout).
    pub key: String,
    /// Hex MD5 digest of the content.
    pub md5: String,
    /// Size in bytes.
    pub size: u64,
    /// MIME content type recorded at upload time.
    pub content_type: String,
    /// When the blob was stored.
    pub created_at: DateTime<Utc>,
}

/// A fully resolved blob: metadata plus the binary content.
#[derive(Debug, Clone)]
pub struct ResolvedBlob {
    /// Blob metadata.
    pub metadata: BlobMetadata,
    /// The raw binary content.
    pub data: bytes::Bytes,
}
