//! Key-value store contract and the in-memory implementation.
//!
//! The cache layer talks to a remote durable key-value service through the
//! [`KeyValueStore`] trait: string get/set with optional expiry, key
//! deletion, set membership for tag indexes, expiry extension, and prefix
//! enumeration. Production deployments plug in a client for their managed
//! store; [`MemoryStore`] backs tests and single-node setups.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use time::{Duration, OffsetDateTime};

use crate::error::StoreError;

/// Contract with the underlying durable key-value service.
///
/// Implementations must serialize conflicting writes themselves; callers
/// treat every method as a suspension point.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch a string value. `None` on miss or expiry.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store a string value, replacing any previous value and expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Add a member to the set stored under `key`, creating it if absent.
    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Read all members of the set under `key`. Empty on miss or expiry.
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Replace the expiry of an existing key. No-op on absent keys.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Enumerate live keys starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

// ============================================================================
// In-memory store
// ============================================================================

enum StoredKind {
    Value(String),
    Set(HashSet<String>),
}

struct StoredEntry {
    kind: StoredKind,
    expires_at: Option<OffsetDateTime>,
}

impl StoredEntry {
    fn value(value: &str, ttl: Option<Duration>, now: OffsetDateTime) -> Self {
        Self {
            kind: StoredKind::Value(value.to_string()),
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    fn empty_set() -> Self {
        Self {
            kind: StoredKind::Set(HashSet::new()),
            expires_at: None,
        }
    }

    fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local [`KeyValueStore`] over a concurrent map.
///
/// Expiry is lazy: an expired entry is dropped when it is next read or
/// scanned, mirroring how a remote store's TTL appears to clients.
pub struct MemoryStore {
    entries: DashMap<String, StoredEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of live entries, expired ones excluded.
    pub fn len(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = OffsetDateTime::now_utc();
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if entry.is_expired(now) {
            drop(entry);
            self.entries.remove(key);
            return Ok(None);
        }
        match &entry.kind {
            StoredKind::Value(value) => Ok(Some(value.clone())),
            StoredKind::Set(_) => Err(StoreError::wrong_kind(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = OffsetDateTime::now_utc();
        self.entries
            .insert(key.to_string(), StoredEntry::value(value, ttl, now));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let now = OffsetDateTime::now_utc();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(StoredEntry::empty_set);
        if entry.is_expired(now) {
            *entry = StoredEntry::empty_set();
        }
        match &mut entry.kind {
            StoredKind::Set(members) => {
                members.insert(member.to_string());
                Ok(())
            }
            StoredKind::Value(_) => Err(StoreError::wrong_kind(key)),
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let now = OffsetDateTime::now_utc();
        let Some(entry) = self.entries.get(key) else {
            return Ok(Vec::new());
        };
        if entry.is_expired(now) {
            drop(entry);
            self.entries.remove(key);
            return Ok(Vec::new());
        }
        match &entry.kind {
            StoredKind::Set(members) => Ok(members.iter().cloned().collect()),
            StoredKind::Value(_) => Err(StoreError::wrong_kind(key)),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = OffsetDateTime::now_utc();
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && !entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect())
    }
}
