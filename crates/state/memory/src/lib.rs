//! In-memory [`StateStore`] backend.
//!
//! Backs the reference server and the test suites. Atomicity comes from
//! `DashMap`'s per-entry locking: every compound operation happens inside a
//! single `entry()` or `remove()` call.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use carrel_state::error::StateError;
use carrel_state::key::{KeyKind, StateKey};
use carrel_state::store::{CasResult, StateStore, Versioned};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    version: u64,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Dashmap-backed state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: DashMap<String, MemoryEntry>,
    counters: DashMap<String, i64>,
}

impl MemoryStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn render(key: &StateKey) -> String {
        key.canonical()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn check_and_set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StateError> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        match self.entries.entry(Self::render(key)) {
            Entry::Occupied(mut occupied) if occupied.get().expired() => {
                occupied.insert(MemoryEntry {
                    value: value.to_owned(),
                    version: 1,
                    expires_at,
                });
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry {
                    value: value.to_owned(),
                    version: 1,
                    expires_at,
                });
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError> {
        Ok(self.get_versioned(key).await?.map(|v| v.value))
    }

    async fn get_versioned(&self, key: &StateKey) -> Result<Option<Versioned>, StateError> {
        match self.entries.get(&Self::render(key)) {
            Some(entry) if !entry.expired() => Ok(Some(Versioned {
                value: entry.value.clone(),
                version: entry.version,
            })),
            _ => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StateError> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        match self.entries.entry(Self::render(key)) {
            Entry::Occupied(mut occupied) => {
                let version = if occupied.get().expired() {
                    1
                } else {
                    occupied.get().version + 1
                };
                occupied.insert(MemoryEntry {
                    value: value.to_owned(),
                    version,
                    expires_at,
                });
            }
            Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry {
                    value: value.to_owned(),
                    version: 1,
                    expires_at,
                });
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &StateKey) -> Result<bool, StateError> {
        Ok(self.entries.remove(&Self::render(key)).is_some())
    }

    async fn take(&self, key: &StateKey) -> Result<Option<String>, StateError> {
        Ok(self
            .entries
            .remove(&Self::render(key))
            .and_then(|(_, entry)| (!entry.expired()).then_some(entry.value)))
    }

    async fn increment(&self, key: &StateKey, delta: i64) -> Result<i64, StateError> {
        let mut counter = self.counters.entry(Self::render(key)).or_insert(0);
        *counter += delta;
        Ok(*counter)
    }

    async fn compare_and_swap(
        &self,
        key: &StateKey,
        expected_version: u64,
        new_value: &str,
    ) -> Result<CasResult, StateError> {
        match self.entries.entry(Self::render(key)) {
            Entry::Occupied(mut occupied) if !occupied.get().expired() => {
                let current = occupied.get();
                if current.version == expected_version {
                    let new_version = expected_version + 1;
                    occupied.insert(MemoryEntry {
                        value: new_value.to_owned(),
                        version: new_version,
                        expires_at: None,
                    });
                    Ok(CasResult::Ok { new_version })
                } else {
                    Ok(CasResult::Conflict {
                        current_value: Some(current.value.clone()),
                        current_version: current.version,
                    })
                }
            }
            entry => {
                if expected_version == 0 {
                    let fresh = MemoryEntry {
                        value: new_value.to_owned(),
                        version: 1,
                        expires_at: None,
                    };
                    match entry {
                        Entry::Occupied(mut occupied) => {
                            occupied.insert(fresh);
                        }
                        Entry::Vacant(vacant) => {
                            vacant.insert(fresh);
                        }
                    }
                    Ok(CasResult::Ok { new_version: 1 })
                } else {
                    Ok(CasResult::Conflict {
                        current_value: None,
                        current_version: 0,
                    })
                }
            }
        }
    }

    async fn scan_kind(&self, kind: KeyKind) -> Result<Vec<(String, String)>, StateError> {
        let marker = format!(":{}:", kind.as_str());
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.key().contains(&marker) && !entry.value().expired())
            .map(|entry| (entry.key().clone(), entry.value().value.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> StateKey {
        StateKey::new("lib-1", KeyKind::Item, id)
    }

    #[tokio::test]
    async fn set_and_get_versioned() {
        let store = MemoryStateStore::new();
        let k = key("a");

        store.set(&k, "one", None).await.unwrap();
        let v = store.get_versioned(&k).await.unwrap().unwrap();
        assert_eq!(v.value, "one");
        assert_eq!(v.version, 1);

        store.set(&k, "two", None).await.unwrap();
        let v = store.get_versioned(&k).await.unwrap().unwrap();
        assert_eq!(v.value, "two");
        assert_eq!(v.version, 2);
    }

    #[tokio::test]
    async fn check_and_set_only_once() {
        let store = MemoryStateStore::new();
        let k = key("ticket");

        assert!(store.check_and_set(&k, "v1", None).await.unwrap());
        assert!(!store.check_and_set(&k, "v2", None).await.unwrap());
        assert_eq!(store.get(&k).await.unwrap().as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn take_consumes_exactly_once() {
        let store = MemoryStateStore::new();
        let k = key("ticket");
        store.set(&k, "payload", None).await.unwrap();

        assert_eq!(store.take(&k).await.unwrap().as_deref(), Some("payload"));
        assert_eq!(store.take(&k).await.unwrap(), None);
        assert_eq!(store.get(&k).await.unwrap(), None);
    }

    #[tokio::test]
    async fn increment_is_cumulative() {
        let store = MemoryStateStore::new();
        let k = StateKey::new("lib-1", KeyKind::QuotaUsage, "owner");

        assert_eq!(store.increment(&k, 100).await.unwrap(), 100);
        assert_eq!(store.increment(&k, 50).await.unwrap(), 150);
        assert_eq!(store.increment(&k, -150).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cas_creates_and_conflicts() {
        let store = MemoryStateStore::new();
        let k = key("row");

        assert_eq!(
            store.compare_and_swap(&k, 0, "v1").await.unwrap(),
            CasResult::Ok { new_version: 1 }
        );
        assert_eq!(
            store.compare_and_swap(&k, 1, "v2").await.unwrap(),
            CasResult::Ok { new_version: 2 }
        );
        assert_eq!(
            store.compare_and_swap(&k, 1, "v3").await.unwrap(),
            CasResult::Conflict {
                current_value: Some("v2".into()),
                current_version: 2,
            }
        );
        assert_eq!(
            store
                .compare_and_swap(&key("missing"), 3, "v")
                .await
                .unwrap(),
            CasResult::Conflict {
                current_value: None,
                current_version: 0,
            }
        );
    }

    #[tokio::test]
    async fn ttl_expiry_hides_entries() {
        let store = MemoryStateStore::new();
        let k = key("short-lived");
        store
            .set(&k, "v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(store.get(&k).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get(&k).await.unwrap(), None);
        assert_eq!(store.take(&k).await.unwrap(), None);
        assert!(store.check_and_set(&k, "fresh", None).await.unwrap());
    }

    #[tokio::test]
    async fn scan_kind_filters_by_kind() {
        let store = MemoryStateStore::new();
        store.set(&key("a"), "1", None).await.unwrap();
        store
            .set(&StateKey::new("lib-1", KeyKind::Ticket, "t1"), "2", None)
            .await
            .unwrap();

        let items = store.scan_kind(KeyKind::Item).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].1, "1");

        let tickets = store.scan_kind(KeyKind::Ticket).await.unwrap();
        assert_eq!(tickets.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_takes_yield_single_winner() {
        let store = std::sync::Arc::new(MemoryStateStore::new());
        let k = key("contended");
        store.set(&k, "prize", None).await.unwrap();

        let (a, b) = tokio::join!(store.take(&k), store.take(&k));
        let winners = [a.unwrap(), b.unwrap()]
            .into_iter()
            .flatten()
            .count();
        assert_eq!(winners, 1);
    }
}
