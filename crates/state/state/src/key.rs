use serde::{Deserialize, Serialize};

use carrel_core::LibraryId;

/// The kind of state being stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// Attachment item rows.
    Item,
    /// Pending upload tickets.
    Ticket,
    /// Per-owner storage usage counters.
    QuotaUsage,
    /// Per-owner quota ceiling overrides.
    QuotaPolicy,
    Custom(String),
}

impl KeyKind {
    /// Return a string representation of the key kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Item => "item",
            Self::Ticket => "ticket",
            Self::QuotaUsage => "quota_usage",
            Self::QuotaPolicy => "quota_policy",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key used to address state entries in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pub library: LibraryId,
    pub kind: KeyKind,
    pub id: String,
}

impl StateKey {
    /// Create a new state key.
    #[must_use]
    pub fn new(library: impl Into<LibraryId>, kind: KeyKind, id: impl Into<String>) -> Self {
        Self {
            library: library.into(),
            kind,
            id: id.into(),
        }
    }

    /// Return a canonical string representation: `library:kind:id`
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}:{}:{}", self.library, self.kind, self.id)
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}
