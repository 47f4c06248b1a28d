use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::descriptor::FileDescriptor;
use crate::types::{ItemKey, LibraryId};

/// How an attachment item references its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    /// The file is imported into managed storage. File operations apply.
    Imported,
    /// The item points at an external path. File operations are rejected.
    Linked,
}

/// Per-item mutable file state.
///
/// `file` is the descriptor of the last successfully registered upload, or
/// `None` when nothing was uploaded yet or a metadata change invalidated the
/// association. The stored blob itself is never deleted by invalidation;
/// reads simply behave as "no file".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentItem {
    /// Item key, unique within the library.
    pub key: ItemKey,
    /// Owning library.
    pub library: LibraryId,
    /// Imported or linked.
    pub kind: AttachmentKind,
    /// Monotonic per-library version counter, bumped on every mutation.
    pub version: u64,
    /// The currently associated file descriptor, if any.
    pub file: Option<FileDescriptor>,
    /// Whether the associated blob is a zip container (fixed archive content
    /// type on download).
    #[serde(default)]
    pub zipped: bool,
    /// When the item was created.
    pub created_at: DateTime<Utc>,
}

impl AttachmentItem {
    /// Create a new attachment item with no file state.
    #[must_use]
    pub fn new(key: ItemKey, library: LibraryId, kind: AttachmentKind) -> Self {
        Self {
            key,
            library,
            kind,
            version: 1,
            file: None,
            zipped: false,
            created_at: Utc::now(),
        }
    }

    /// The digest of the currently associated file, if any.
    #[must_use]
    pub fn current_md5(&self) -> Option<&str> {
        self.file.as_ref().map(|d| d.md5.as_str())
    }

    /// Associate a registered descriptor with this item.
    pub fn associate(&mut self, descriptor: FileDescriptor, zipped: bool) {
        self.file = Some(descriptor);
        self.zipped = zipped;
    }

    /// Dissociate the stored blob after a metadata change. Subsequent reads
    /// behave as "no file" even though the blob is not deleted.
    pub fn dissociate(&mut self) {
        self.file = None;
        self.zipped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> AttachmentItem {
        AttachmentItem::new(
            ItemKey::new("ABCD2345"),
            LibraryId::new("lib-1"),
            AttachmentKind::Imported,
        )
    }

    #[test]
    fn new_item_has_no_file() {
        let item = item();
        assert_eq!(item.version, 1);
        assert!(item.file.is_none());
        assert!(item.current_md5().is_none());
    }

    #[test]
    fn associate_and_dissociate() {
        let mut item = item();
        let desc = FileDescriptor::for_bytes(b"data", "a.txt", 0);
        let md5 = desc.md5.clone();

        item.associate(desc, false);
        assert_eq!(item.current_md5(), Some(md5.as_str()));

        item.dissociate();
        assert!(item.current_md5().is_none());
        assert!(!item.zipped);
    }

    #[test]
    fn item_serde_roundtrip() {
        let mut item = item();
        item.associate(FileDescriptor::for_bytes(b"data", "a.txt", 0), true);
        let json = serde_json::to_string(&item).unwrap();
        let back: AttachmentItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back.key, item.key);
        assert_eq!(back.current_md5(), item.current_md5());
        assert!(back.zipped);
    }
}
