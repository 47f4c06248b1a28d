use serde::{Deserialize, Serialize};

/// Addressing scheme for a blob in the object store.
///
/// Two layouts coexist: the canonical hash-only layout and the legacy
/// hash/filename layout left behind by earlier client generations. A blob
/// found under either layout is the same blob for existence checks, so
/// lookups always try the canonical key first and fall back to legacy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyLayout {
    /// Canonical layout: the bare content hash.
    HashOnly,
    /// Legacy layout: `{hash}/{filename}`.
    HashFilename,
}

impl KeyLayout {
    /// Render an object-store key for the given digest and filename under
    /// this layout.
    #[must_use]
    pub fn render(self, md5: &str, filename: &str) -> String {
        match self {
            Self::HashOnly => md5.to_owned(),
            Self::HashFilename => format!("{md5}/{filename}"),
        }
    }
}

/// A fully rendered object-store key together with the layout it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobKey {
    /// The rendered store key.
    pub key: String,
    /// The layout the key was rendered under.
    pub layout: KeyLayout,
}

impl BlobKey {
    /// Build the canonical hash-only key.
    #[must_use]
    pub fn canonical(md5: &str) -> Self {
        Self {
            key: KeyLayout::HashOnly.render(md5, ""),
            layout: KeyLayout::HashOnly,
        }
    }

    /// Build the legacy hash/filename key.
    #[must_use]
    pub fn legacy(md5: &str, filename: &str) -> Self {
        Self {
            key: KeyLayout::HashFilename.render(md5, filename),
            layout: KeyLayout::HashFilename,
        }
    }

    /// The prefix under which all legacy keys for a digest live.
    #[must_use]
    pub fn legacy_prefix(md5: &str) -> String {
        format!("{md5}/")
    }
}

impl std::fmt::Display for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MD5: &str = "900150983cd24fb0d6963f7d28e17f72";

    #[test]
    fn canonical_key_is_bare_hash() {
        let key = BlobKey::canonical(MD5);
        assert_eq!(key.key, MD5);
        assert_eq!(key.layout, KeyLayout::HashOnly);
    }

    #[test]
    fn legacy_key_includes_filename() {
        let key = BlobKey::legacy(MD5, "paper.pdf");
        assert_eq!(key.key, format!("{MD5}/paper.pdf"));
        assert_eq!(key.layout, KeyLayout::HashFilename);
    }

    #[test]
    fn legacy_prefix_matches_legacy_keys() {
        let key = BlobKey::legacy(MD5, "paper.pdf");
        assert!(key.key.starts_with(&BlobKey::legacy_prefix(MD5)));
        assert!(!BlobKey::canonical(MD5)
            .key
            .starts_with(&BlobKey::legacy_prefix(MD5)));
    }
}
