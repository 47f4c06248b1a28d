use thiserror::Error;

/// Errors that can occur during blob storage operations.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The requested blob was not found.
    #[error("blob not found: {0}")]
    NotFound(String),

    /// The content's digest does not match the declared hash.
    #[error("content digest mismatch: expected {expected}, got {actual}")]
    ContentMismatch {
        /// Declared hex digest.
        expected: String,
        /// Digest of the bytes received.
        actual: String,
    },

    /// The byte count does not match the declared size.
    #[error("size mismatch: declared {declared} bytes, got {actual}")]
    SizeMismatch {
        /// Declared size.
        declared: u64,
        /// Bytes received.
        actual: u64,
    },

    /// A storage backend error occurred.
    #[error("blob storage error: {0}")]
    Storage(String),
}
