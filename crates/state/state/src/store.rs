use std::time::Duration;

use async_trait::async_trait;

use crate::error::StateError;
use crate::key::{KeyKind, StateKey};

/// A stored value together with its monotonic version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    /// The stored value.
    pub value: String,
    /// Version counter, starting at 1 on first write.
    pub version: u64,
}

/// Result of a compare-and-swap operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult {
    /// The swap succeeded and the new version is stored.
    Ok {
        /// The version now stored.
        new_version: u64,
    },
    /// The swap failed because the current version didn't match.
    Conflict {
        current_value: Option<String>,
        current_version: u64,
    },
}

/// Trait for persisting protocol state.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
/// The three atomic primitives carry the protocol's concurrency weight:
/// `check_and_set` issues single-use tickets, `take` consumes them exactly
/// once when registrations race, and `increment` reserves quota bytes so
/// two authorizations cannot jointly oversubscribe an owner's ceiling.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Check if a key exists; if not, set it atomically with an optional TTL.
    /// Returns `true` if the key was newly set, `false` if it already existed.
    async fn check_and_set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StateError>;

    /// Get the value for a key. Returns `None` if not found or expired.
    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError>;

    /// Get the value and version for a key.
    async fn get_versioned(&self, key: &StateKey) -> Result<Option<Versioned>, StateError>;

    /// Set a value with an optional TTL, overwriting any previous value and
    /// bumping its version.
    async fn set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StateError>;

    /// Delete a key. Returns `true` if the key existed.
    async fn delete(&self, key: &StateKey) -> Result<bool, StateError>;

    /// Atomically remove and return the value for a key.
    ///
    /// Of two concurrent callers, exactly one observes the value.
    async fn take(&self, key: &StateKey) -> Result<Option<String>, StateError>;

    /// Atomically increment a counter by `delta`. Returns the new value.
    /// Creates the counter at 0 if it doesn't exist before incrementing.
    async fn increment(&self, key: &StateKey, delta: i64) -> Result<i64, StateError>;

    /// Compare-and-swap: update the value only if the current version
    /// matches. `expected_version` 0 means "the key must not exist yet".
    async fn compare_and_swap(
        &self,
        key: &StateKey,
        expected_version: u64,
        new_value: &str,
    ) -> Result<CasResult, StateError>;

    /// Scan all keys of a given kind across all libraries.
    ///
    /// Returns `(canonical_key, value)` pairs. May be expensive on some
    /// backends; used for ticket reaping, not on request paths.
    async fn scan_kind(&self, kind: KeyKind) -> Result<Vec<(String, String)>, StateError>;
}
