//! In-memory [`BlobStore`] backend.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;

use carrel_core::fingerprint::md5_bytes;

use crate::error::BlobError;
use crate::store::BlobStore;
use crate::types::{BlobMetadata, ResolvedBlob};

/// Dashmap-backed object store used by the reference server and tests.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, ResolvedBlob>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes currently stored, across all keys.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.blobs
            .iter()
            .map(|entry| entry.value().metadata.size)
            .sum()
    }

    /// Seed a blob without digest validation. Test helper for placing
    /// legacy-layout blobs directly.
    pub fn seed(&self, key: &str, data: &[u8], content_type: &str) {
        let metadata = BlobMetadata {
            key: key.to_owned(),
            md5: md5_bytes(data),
            size: data.len() as u64,
            content_type: content_type.to_owned(),
            created_at: Utc::now(),
        };
        self.blobs.insert(
            key.to_owned(),
            ResolvedBlob {
                metadata,
                data: Bytes::copy_from_slice(data),
            },
        );
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        declared_md5: &str,
        declared_size: u64,
        content_type: &str,
    ) -> Result<BlobMetadata, BlobError> {
        let actual_size = data.len() as u64;
        if actual_size != declared_size {
            return Err(BlobError::SizeMismatch {
                declared: declared_size,
                actual: actual_size,
            });
        }

        let actual_md5 = md5_bytes(&data);
        if !actual_md5.eq_ignore_ascii_case(declared_md5) {
            return Err(BlobError::ContentMismatch {
                expected: declared_md5.to_lowercase(),
                actual: actual_md5,
            });
        }

        let metadata = BlobMetadata {
            key: key.to_owned(),
            md5: actual_md5,
            size: actual_size,
            content_type: content_type.to_owned(),
            created_at: Utc::now(),
        };
        self.blobs.insert(
            key.to_owned(),
            ResolvedBlob {
                metadata: metadata.clone(),
                data,
            },
        );
        Ok(metadata)
    }

    async fn get(&self, key: &str) -> Result<Option<ResolvedBlob>, BlobError> {
        Ok(self.blobs.get(key).map(|entry| entry.value().clone()))
    }

    async fn head(&self, key: &str) -> Result<Option<BlobMetadata>, BlobError> {
        Ok(self
            .blobs
            .get(key)
            .map(|entry| entry.value().metadata.clone()))
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        Ok(self
            .blobs
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<bool, BlobError> {
        let Some(source) = self.blobs.get(from).map(|entry| entry.value().clone()) else {
            return Ok(false);
        };
        let mut copied = source;
        copied.metadata.key = to.to_owned();
        self.blobs.insert(to.to_owned(), copied);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, BlobError> {
        Ok(self.blobs.remove(key).is_some())
    }
}
