//! Namespaced, tag-aware cache manager.
//!
//! Wraps the key-value store with JSON serialization, key namespacing, and
//! tag membership bookkeeping for bulk invalidation. The cache is
//! best-effort: store failures are logged and degrade to a miss or a
//! no-op, never to a caller-visible error. Only the compute closures of
//! [`CacheManager::remember`] and [`CacheManager::remember_forever`]
//! propagate their failures.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

use crate::store::KeyValueStore;

/// Options for a cache write.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Entry lifetime; `None` keeps the entry until invalidated.
    pub ttl: Option<Duration>,
    /// Tags grouping this entry for bulk invalidation.
    pub tags: Vec<String>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Tag-aware cache over one namespace of the shared store.
///
/// Keys live at `"<namespace>:<key>"`; the membership set of tag `t` lives
/// at `"<namespace>:tag:<t>"` and holds fully namespaced member keys.
pub struct CacheManager {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
    tag_ttl_slack: Duration,
}

impl CacheManager {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        namespace: impl Into<String>,
        tag_ttl_slack: Duration,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            tag_ttl_slack,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn entry_key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}:tag:{tag}", self.namespace)
    }

    /// Fetch and deserialize a cached value. Read and decode failures are
    /// logged and reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry_key = self.entry_key(key);
        match self.store.get(&entry_key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(error) => {
                    warn!(
                        key = %entry_key,
                        error = %error,
                        "Cache entry failed to deserialize; treating as miss"
                    );
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                warn!(key = %entry_key, error = %error, "Cache read failed; treating as miss");
                None
            }
        }
    }

    /// Serialize and store a value, registering it under each tag. The tag
    /// set's own expiry is pushed out past the member's TTL so the tag
    /// index outlives the shortest-lived member.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, opts: &CacheOptions) {
        let entry_key = self.entry_key(key);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(key = %entry_key, error = %error, "Cache value failed to serialize; skipping write");
                return;
            }
        };
        if let Err(error) = self.store.set(&entry_key, &raw, opts.ttl).await {
            warn!(key = %entry_key, error = %error, "Cache write failed");
            return;
        }
        for tag in &opts.tags {
            let tag_key = self.tag_key(tag);
            if let Err(error) = self.store.set_add(&tag_key, &entry_key).await {
                warn!(tag = %tag_key, error = %error, "Tag registration failed");
                continue;
            }
            if let Some(ttl) = opts.ttl
                && let Err(error) = self.store.expire(&tag_key, ttl + self.tag_ttl_slack).await
            {
                warn!(tag = %tag_key, error = %error, "Tag expiry extension failed");
            }
        }
    }

    /// Remove a single entry.
    pub async fn delete(&self, key: &str) {
        let entry_key = self.entry_key(key);
        if let Err(error) = self.store.delete(&entry_key).await {
            warn!(key = %entry_key, error = %error, "Cache delete failed");
        }
    }

    /// Delete every entry registered under `tag`, then the tag set itself.
    /// No-op when the tag set is empty or absent.
    pub async fn invalidate_tag(&self, tag: &str) {
        let tag_key = self.tag_key(tag);
        let members = match self.store.set_members(&tag_key).await {
            Ok(members) => members,
            Err(error) => {
                warn!(tag = %tag_key, error = %error, "Tag membership read failed; skipping invalidation");
                return;
            }
        };
        if members.is_empty() {
            return;
        }
        for member in &members {
            if let Err(error) = self.store.delete(member).await {
                warn!(key = %member, error = %error, "Tagged entry delete failed");
            }
        }
        if let Err(error) = self.store.delete(&tag_key).await {
            warn!(tag = %tag_key, error = %error, "Tag set delete failed");
        }
        debug!(
            namespace = %self.namespace,
            tag,
            invalidated = members.len(),
            "Tag invalidated"
        );
    }

    /// Delete every key under this namespace's prefix. Administrative and
    /// test use only.
    pub async fn clear(&self) {
        let prefix = format!("{}:", self.namespace);
        let keys = match self.store.scan_prefix(&prefix).await {
            Ok(keys) => keys,
            Err(error) => {
                warn!(namespace = %self.namespace, error = %error, "Namespace scan failed; clear skipped");
                return;
            }
        };
        for key in &keys {
            if let Err(error) = self.store.delete(key).await {
                warn!(key = %key, error = %error, "Cache delete failed during clear");
            }
        }
        debug!(namespace = %self.namespace, cleared = keys.len(), "Namespace cleared");
    }

    /// Get-or-compute: on a hit the compute closure is never invoked; on a
    /// miss its result is stored under `opts` and returned. Only the
    /// compute failure propagates.
    pub async fn remember<T, E, F, Fut>(&self, key: &str, opts: &CacheOptions, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get::<T>(key).await {
            return Ok(hit);
        }
        let value = compute().await?;
        self.set(key, &value, opts).await;
        Ok(value)
    }

    /// Cache without expiry, recomputing when `refresh_interval` has
    /// elapsed since the last successful compute. A failed recompute falls
    /// back to the stale cached value when one exists; the failure only
    /// propagates on a cold cache.
    pub async fn remember_forever<T, E, F, Fut>(
        &self,
        key: &str,
        refresh_interval: Duration,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let refresh_key = format!("{key}:refresh");
        let now = OffsetDateTime::now_utc().unix_timestamp();

        if let Some(cached) = self.get::<T>(key).await {
            let refreshed_at = self.get::<i64>(&refresh_key).await;
            if refreshed_at.is_some_and(|at| now - at < refresh_interval.whole_seconds()) {
                return Ok(cached);
            }
            return match compute().await {
                Ok(fresh) => {
                    self.set(key, &fresh, &CacheOptions::new()).await;
                    self.set(&refresh_key, &now, &CacheOptions::new()).await;
                    Ok(fresh)
                }
                Err(error) => {
                    warn!(
                        key = %self.entry_key(key),
                        error = %error,
                        "Recompute failed; serving stale cached value"
                    );
                    Ok(cached)
                }
            };
        }

        let fresh = compute().await?;
        self.set(key, &fresh, &CacheOptions::new()).await;
        self.set(&refresh_key, &now, &CacheOptions::new()).await;
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::StoreError;
    use crate::store::MemoryStore;

    fn manager_over(store: Arc<MemoryStore>) -> CacheManager {
        CacheManager::new(store, "patients", Duration::seconds(300))
    }

    #[tokio::test]
    async fn set_get_roundtrip() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_over(store);

        assert_eq!(cache.get::<String>("p1").await, None);

        cache.set("p1", &"record".to_string(), &CacheOptions::new()).await;
        assert_eq!(cache.get::<String>("p1").await, Some("record".to_string()));

        cache.delete("p1").await;
        assert_eq!(cache.get::<String>("p1").await, None);
    }

    #[tokio::test]
    async fn tag_invalidation_deletes_members_and_tag_set() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_over(store.clone());
        let opts = CacheOptions::new().with_tags(["model:Patient"]);

        for key in ["p1", "p2", "p3"] {
            cache.set(key, &key.to_string(), &opts).await;
        }

        cache.invalidate_tag("model:Patient").await;

        for key in ["p1", "p2", "p3"] {
            assert_eq!(cache.get::<String>(key).await, None);
        }
        // The membership set itself is gone, not just emptied.
        assert!(
            store
                .set_members("patients:tag:model:Patient")
                .await
                .expect("members")
                .is_empty()
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn invalidating_an_absent_tag_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_over(store);

        cache.set("p1", &1u32, &CacheOptions::new()).await;
        cache.invalidate_tag("never-used").await;

        assert_eq!(cache.get::<u32>("p1").await, Some(1));
    }

    #[tokio::test]
    async fn undecodable_entry_reads_as_miss() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("patients:p1", "not json at all", None)
            .await
            .expect("raw set");
        let cache = manager_over(store);

        assert_eq!(cache.get::<u32>("p1").await, None);
    }

    #[tokio::test]
    async fn clear_empties_only_this_namespace() {
        let store = Arc::new(MemoryStore::new());
        let patients = manager_over(store.clone());
        let reports = CacheManager::new(store.clone(), "reports", Duration::seconds(300));

        patients.set("p1", &1u32, &CacheOptions::new()).await;
        reports.set("r1", &2u32, &CacheOptions::new()).await;

        patients.clear().await;

        assert_eq!(patients.get::<u32>("p1").await, None);
        assert_eq!(reports.get::<u32>("r1").await, Some(2));
    }

    #[tokio::test]
    async fn remember_skips_compute_on_hit() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_over(store);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Result<u32, &str> = cache
                .remember("expensive", &CacheOptions::new(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await;
            assert_eq!(value, Ok(7));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remember_propagates_compute_failure() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_over(store);

        let value: Result<u32, &str> = cache
            .remember("broken", &CacheOptions::new(), || async { Err("boom") })
            .await;
        assert_eq!(value, Err("boom"));
    }

    #[tokio::test]
    async fn remember_forever_serves_stale_on_recompute_failure() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_over(store);
        let calls = AtomicUsize::new(0);
        let compute = || async {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(41u32),
                _ => Err("origin down"),
            }
        };

        let first = cache.remember_forever("stats", Duration::ZERO, compute).await;
        assert_eq!(first, Ok(41));

        // Interval of zero forces a recompute, which now fails.
        let second = cache.remember_forever("stats", Duration::ZERO, compute).await;
        assert_eq!(second, Ok(41));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn remember_forever_propagates_failure_on_cold_cache() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_over(store);

        let value: Result<u32, &str> = cache
            .remember_forever("stats", Duration::seconds(60), || async { Err("origin down") })
            .await;
        assert_eq!(value, Err("origin down"));
    }

    #[tokio::test]
    async fn remember_forever_skips_recompute_within_interval() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_over(store);
        let calls = AtomicUsize::new(0);
        let compute = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(1u32)
        };

        cache
            .remember_forever("stats", Duration::seconds(60), compute)
            .await
            .expect("populate");
        cache
            .remember_forever("stats", Duration::seconds(60), compute)
            .await
            .expect("cached");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct BrokenStore;

    #[async_trait]
    impl crate::store::KeyValueStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::backend("connection refused"))
        }
        async fn set(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Option<Duration>,
        ) -> Result<(), StoreError> {
            Err(StoreError::backend("connection refused"))
        }
        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::backend("connection refused"))
        }
        async fn set_add(&self, _key: &str, _member: &str) -> Result<(), StoreError> {
            Err(StoreError::backend("connection refused"))
        }
        async fn set_members(&self, _key: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::backend("connection refused"))
        }
        async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), StoreError> {
            Err(StoreError::backend("connection refused"))
        }
        async fn scan_prefix(&self, _prefix: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::backend("connection refused"))
        }
    }

    #[tokio::test]
    async fn store_failures_degrade_to_miss() {
        let cache = CacheManager::new(Arc::new(BrokenStore), "patients", Duration::seconds(300));

        cache.set("p1", &1u32, &CacheOptions::new()).await;
        assert_eq!(cache.get::<u32>("p1").await, None);
        cache.delete("p1").await;
        cache.invalidate_tag("model:Patient").await;
        cache.clear().await;

        // remember still computes and returns despite the dead store.
        let value: Result<u32, &str> = cache
            .remember("p1", &CacheOptions::new(), || async { Ok(9) })
            .await;
        assert_eq!(value, Ok(9));
    }
}
