use thiserror::Error;

use crate::types::OwnerId;

/// Protocol-level failures for file attachment operations.
///
/// Each variant maps to a distinct HTTP status so clients can tell apart
/// failures that need new input (quota, precondition, mismatch) from plain
/// malformed requests. None of these are retryable as-is; only transport
/// failures warrant redoing the upload sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FileError {
    /// Malformed or missing request fields, invalid or consumed upload key,
    /// or a file operation against the wrong attachment kind.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A mutating call was made without a conditional header.
    #[error("If-Match or If-None-Match must be provided for this request")]
    PreconditionRequired,

    /// The supplied conditional header does not match the item's current state.
    #[error("the supplied precondition does not match the current file state")]
    PreconditionFailed,

    /// The projected storage total would exceed the owner's quota ceiling.
    #[error("storage quota of {ceiling_bytes} bytes exceeded for owner {owner}")]
    QuotaExceeded {
        /// Quota ceiling in bytes for the responsible owner.
        ceiling_bytes: u64,
        /// The identity whose quota applies (the group owner for group libraries).
        owner: OwnerId,
    },

    /// No such item, or the item has no associated file.
    #[error("not found")]
    NotFound,

    /// The transferred content's digest does not match the declared hash.
    #[error("content digest mismatch: expected {expected}, got {actual}")]
    ContentMismatch {
        /// Declared hex digest.
        expected: String,
        /// Digest of the bytes actually received.
        actual: String,
    },

    /// The transferred byte count does not match the declared size.
    #[error("size mismatch: declared {declared} bytes, got {actual}")]
    SizeMismatch {
        /// Declared size in bytes.
        declared: u64,
        /// Byte count actually received.
        actual: u64,
    },

    /// Linked-attachment or permission violation.
    #[error("forbidden: {0}")]
    Forbidden(String),
}
