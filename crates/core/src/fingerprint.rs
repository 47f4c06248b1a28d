//! Content fingerprinting.
//!
//! Blobs are identified by the MD5 digest of their unencoded content. The
//! digest doubles as the idempotency key for the store: two files with the
//! same digest are the same blob, whatever their filenames.

use std::io::Read;
use std::path::Path;

use md5::{Digest, Md5};

/// Compute the MD5 digest of a byte slice as a 32-char lowercase hex string.
#[must_use]
pub fn md5_bytes(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute the MD5 digest of a file, reading in 64 KiB chunks.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn md5_file(path: &Path) -> Result<String, std::io::Error> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Md5Hasher::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher.finish_hex())
}

/// Streaming MD5 hasher for incremental digesting, e.g. while assembling
/// an upload body.
pub struct Md5Hasher {
    inner: Md5,
}

impl Md5Hasher {
    /// Create a new streaming hasher.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Md5::new() }
    }

    /// Feed additional bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finalize and return the digest as a 32-char hex string.
    #[must_use]
    pub fn finish_hex(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

impl Default for Md5Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Check that a string looks like an MD5 hex digest (32 lowercase-insensitive
/// hex chars).
#[must_use]
pub fn is_md5_hex(s: &str) -> bool {
    s.len() == 32 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
