use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::error::FileError;
use crate::fingerprint::{is_md5_hex, md5_bytes, md5_file};

/// Metadata describing a local file to be stored.
///
/// The `md5` field always digests the unencoded file content, never a
/// container wrapping it. `mtime` is an epoch timestamp in **milliseconds**;
/// older client generations sent seconds and the server stores whatever it
/// was given, so [`FileDescriptor::mtime_from_seconds`] is the one place a
/// caller converts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Hex MD5 digest of the file content (32 chars).
    pub md5: String,
    /// File size in bytes.
    pub size: u64,
    /// Display filename; may contain non-ASCII characters.
    pub filename: String,
    /// Modification time, epoch milliseconds.
    pub mtime: i64,
    /// MIME content type.
    #[serde(default)]
    pub content_type: String,
    /// Optional character set for text content.
    #[serde(default)]
    pub charset: Option<String>,
}

impl FileDescriptor {
    /// Build a descriptor for an in-memory buffer.
    #[must_use]
    pub fn for_bytes(data: &[u8], filename: impl Into<String>, mtime_ms: i64) -> Self {
        Self {
            md5: md5_bytes(data),
            size: data.len() as u64,
            filename: filename.into(),
            mtime: mtime_ms,
            content_type: String::new(),
            charset: None,
        }
    }

    /// Build a descriptor by hashing a file on disk, capturing its size and
    /// modification time from filesystem metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or has no filename
    /// component.
    pub fn for_file(path: &Path) -> Result<Self, std::io::Error> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no filename")
            })?
            .to_owned();
        let metadata = std::fs::metadata(path)?;
        let mtime = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
        Ok(Self {
            md5: md5_file(path)?,
            size: metadata.len(),
            filename,
            mtime,
            content_type: String::new(),
            charset: None,
        })
    }

    /// Set the MIME content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Set the character set.
    #[must_use]
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    /// Convert a seconds-based modification time to the canonical
    /// milliseconds unit. This is the conversion boundary for
    /// older-generation clients.
    #[must_use]
    pub fn mtime_from_seconds(seconds: i64) -> i64 {
        seconds.saturating_mul(1000)
    }

    /// Validate the fields required before any quota or existence check.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::BadRequest`] naming the offending field.
    pub fn validate(&self) -> Result<(), FileError> {
        if self.md5.is_empty() {
            return Err(FileError::BadRequest("md5 not provided".into()));
        }
        if !is_md5_hex(&self.md5) {
            return Err(FileError::BadRequest(format!(
                "invalid md5 value '{}'",
                self.md5
            )));
        }
        if self.filename.is_empty() {
            return Err(FileError::BadRequest("filename not provided".into()));
        }
        Ok(())
    }
}

/// Descriptor variant for attachments stored as a zip container (e.g. a
/// snapshotted web page).
///
/// The logical file's digest and filename drive equality and exists checks;
/// the container is what is actually transferred and stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZipDescriptor {
    /// The logical file inside the container.
    pub file: FileDescriptor,
    /// Hex MD5 digest of the zip container itself.
    pub zip_md5: String,
    /// Filename of the zip container.
    pub zip_filename: String,
    /// Size of the zip container in bytes.
    pub zip_size: u64,
}

impl ZipDescriptor {
    /// Validate both the logical descriptor and the container fields.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::BadRequest`] naming the offending field.
    pub fn validate(&self) -> Result<(), FileError> {
        self.file.validate()?;
        if !is_md5_hex(&self.zip_md5) {
            return Err(FileError::BadRequest(format!(
                "invalid zipMD5 value '{}'",
                self.zip_md5
            )));
        }
        if self.zip_filename.is_empty() {
            return Err(FileError::BadRequest("zipFilename not provided".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> FileDescriptor {
        FileDescriptor::for_bytes(b"hello world", "notes.txt", 1_700_000_000_000)
            .with_content_type("text/plain")
            .with_charset("utf-8")
    }

    #[test]
    fn for_bytes_computes_digest_and_size() {
        let desc = descriptor();
        assert_eq!(desc.md5, md5_bytes(b"hello world"));
        assert_eq!(desc.size, 11);
        assert_eq!(desc.content_type, "text/plain");
        assert_eq!(desc.charset.as_deref(), Some("utf-8"));
    }

    #[test]
    fn validate_accepts_complete_descriptor() {
        assert!(descriptor().validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_md5() {
        let mut desc = descriptor();
        desc.md5 = "not-a-digest".into();
        assert!(matches!(desc.validate(), Err(FileError::BadRequest(_))));

        desc.md5 = String::new();
        assert!(matches!(desc.validate(), Err(FileError::BadRequest(_))));
    }

    #[test]
    fn validate_rejects_empty_filename() {
        let mut desc = descriptor();
        desc.filename = String::new();
        assert!(matches!(desc.validate(), Err(FileError::BadRequest(_))));
    }

    #[test]
    fn for_file_matches_for_bytes() {
        let dir = std::env::temp_dir().join("carrel-descriptor-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("notes.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let desc = FileDescriptor::for_file(&path).unwrap();
        assert_eq!(desc.md5, md5_bytes(b"hello world"));
        assert_eq!(desc.size, 11);
        assert_eq!(desc.filename, "notes.txt");
        assert!(desc.mtime > 0);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn mtime_seconds_conversion() {
        assert_eq!(
            FileDescriptor::mtime_from_seconds(1_700_000_000),
            1_700_000_000_000
        );
    }

    #[test]
    fn zip_descriptor_validates_container_fields() {
        let zip = ZipDescriptor {
            file: descriptor(),
            zip_md5: "bad".into(),
            zip_filename: "page.zip".into(),
            zip_size: 128,
        };
        assert!(matches!(zip.validate(), Err(FileError::BadRequest(_))));
    }

    #[test]
    fn descriptor_serde_roundtrip() {
        let desc = descriptor();
        let json = serde_json::to_string(&desc).unwrap();
        let back: FileDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, desc);
    }
}
