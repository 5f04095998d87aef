//! Distributed, cache-backed session management.
//!
//! The cache store is the source of truth: records live under
//! `"session:<id>"` in the sessions namespace, tagged `"sessions"` and
//! `"user:<user_id>"`, with a per-user index of active ids at
//! `"user_sessions:<user_id>"`. A session is destroyed by explicit logout,
//! idle-timeout detection on read, or a cascading user invalidation; a
//! destroyed id is never reused.

use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

use crate::config::SessionSettings;
use crate::manager::{CacheManager, CacheOptions};

const SESSION_KEY_PREFIX: &str = "session";
const USER_INDEX_PREFIX: &str = "user_sessions";
const SESSIONS_TAG: &str = "sessions";
const SESSION_ID_BYTES: usize = 32;

/// A live session. Mutated only through [`SessionManager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub created_at: OffsetDateTime,
    pub last_activity: OffsetDateTime,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<Value>,
}

/// Input for creating a session at login.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<Value>,
}

/// Partial update merged into a record by [`SessionManager::touch_session`].
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub email: Option<String>,
    pub role: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<Value>,
}

/// Session store with per-user enumeration and a concurrency cap.
///
/// The cap bounds per-user resource usage and limits the blast radius of a
/// leaked token; eviction is oldest-first because the index is
/// append-ordered. The index read-modify-write is not transactional: two
/// concurrent logins for one user can race and the last write wins.
pub struct SessionManager {
    cache: Arc<CacheManager>,
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(cache: Arc<CacheManager>, settings: SessionSettings) -> Self {
        Self { cache, settings }
    }

    fn session_key(session_id: &str) -> String {
        format!("{SESSION_KEY_PREFIX}:{session_id}")
    }

    fn index_key(user_id: &str) -> String {
        format!("{USER_INDEX_PREFIX}:{user_id}")
    }

    fn user_tag(user_id: &str) -> String {
        format!("user:{user_id}")
    }

    /// 256 bits from the OS generator, hex-encoded.
    fn generate_session_id() -> String {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    fn record_options(&self, user_id: &str, max_age: Duration) -> CacheOptions {
        CacheOptions::new()
            .with_ttl(max_age)
            .with_tags([SESSIONS_TAG.to_string(), Self::user_tag(user_id)])
    }

    fn index_options(&self, max_age: Duration) -> CacheOptions {
        CacheOptions::new()
            .with_ttl(max_age)
            .with_tags([SESSIONS_TAG])
    }

    /// Create a session and register it in the user's index, evicting the
    /// oldest session first when the concurrency cap is reached. Returns
    /// the new session id.
    pub async fn create_session(&self, data: NewSession, max_age: Option<Duration>) -> String {
        let max_age = max_age.unwrap_or_else(|| self.settings.max_age());
        let now = OffsetDateTime::now_utc();
        let session_id = Self::generate_session_id();
        let record = SessionRecord {
            session_id: session_id.clone(),
            user_id: data.user_id,
            email: data.email,
            role: data.role,
            created_at: now,
            last_activity: now,
            ip_address: data.ip_address,
            user_agent: data.user_agent,
            metadata: data.metadata,
        };
        self.cache
            .set(
                &Self::session_key(&session_id),
                &record,
                &self.record_options(&record.user_id, max_age),
            )
            .await;
        self.add_user_session(&record.user_id, &session_id, max_age).await;
        info!(user_id = %record.user_id, "Session created");
        session_id
    }

    /// Fetch a session. A record idle past the max age is destroyed and
    /// reported as absent, independent of the store's own TTL.
    pub async fn get_session(&self, session_id: &str) -> Option<SessionRecord> {
        let record = self
            .cache
            .get::<SessionRecord>(&Self::session_key(session_id))
            .await?;
        let idle = OffsetDateTime::now_utc() - record.last_activity;
        if idle > self.settings.max_age() {
            debug!(user_id = %record.user_id, "Session idle past max age; destroying");
            self.destroy_session(session_id).await;
            return None;
        }
        Some(record)
    }

    /// Refresh a session's activity stamp, merging an optional patch.
    /// Returns false when the session does not exist.
    pub async fn touch_session(&self, session_id: &str, patch: Option<SessionPatch>) -> bool {
        let key = Self::session_key(session_id);
        let Some(mut record) = self.cache.get::<SessionRecord>(&key).await else {
            return false;
        };
        if let Some(patch) = patch {
            if let Some(email) = patch.email {
                record.email = email;
            }
            if let Some(role) = patch.role {
                record.role = role;
            }
            if let Some(ip_address) = patch.ip_address {
                record.ip_address = Some(ip_address);
            }
            if let Some(user_agent) = patch.user_agent {
                record.user_agent = Some(user_agent);
            }
            if let Some(metadata) = patch.metadata {
                record.metadata = Some(metadata);
            }
        }
        record.last_activity = OffsetDateTime::now_utc();
        let opts = self.record_options(&record.user_id, self.settings.max_age());
        self.cache.set(&key, &record, &opts).await;
        true
    }

    /// Destroy a session and drop it from its owner's index. Idempotent:
    /// returns false without side effects when the session is gone.
    pub async fn destroy_session(&self, session_id: &str) -> bool {
        let key = Self::session_key(session_id);
        let Some(record) = self.cache.get::<SessionRecord>(&key).await else {
            return false;
        };
        self.cache.delete(&key).await;
        let mut ids = self.read_index(&record.user_id).await;
        let before = ids.len();
        ids.retain(|id| id != session_id);
        if ids.len() != before {
            self.write_index(&record.user_id, ids).await;
        }
        debug!(user_id = %record.user_id, "Session destroyed");
        true
    }

    /// Destroy every session in the user's index, then the index itself.
    /// Returns the number of live sessions destroyed.
    pub async fn destroy_user_sessions(&self, user_id: &str) -> usize {
        let ids = self.read_index(user_id).await;
        let mut destroyed = 0;
        for id in &ids {
            let key = Self::session_key(id);
            if self.cache.get::<SessionRecord>(&key).await.is_some() {
                self.cache.delete(&key).await;
                destroyed += 1;
            }
        }
        self.cache.delete(&Self::index_key(user_id)).await;
        info!(user_id, destroyed, "Destroyed all sessions for user");
        destroyed
    }

    /// Enumerate the user's live session ids, pruning ids that no longer
    /// resolve to a record and rewriting the index when pruning changed
    /// it. Self-healing, though the index may be stale between calls.
    pub async fn get_user_sessions(&self, user_id: &str) -> Vec<String> {
        let ids = self.read_index(user_id).await;
        if ids.is_empty() {
            return ids;
        }
        let mut live = Vec::with_capacity(ids.len());
        for id in &ids {
            if self
                .cache
                .get::<SessionRecord>(&Self::session_key(id))
                .await
                .is_some()
            {
                live.push(id.clone());
            }
        }
        if live.len() != ids.len() {
            debug!(
                user_id,
                pruned = ids.len() - live.len(),
                "Pruned stale session ids from index"
            );
            self.write_index(user_id, live.clone()).await;
        }
        live
    }

    async fn add_user_session(&self, user_id: &str, session_id: &str, max_age: Duration) {
        let mut ids = self.read_index(user_id).await;
        while ids.len() >= self.settings.max_sessions_per_user {
            let evicted = ids.remove(0);
            self.cache.delete(&Self::session_key(&evicted)).await;
            debug!(user_id, "Session cap reached; evicted oldest session");
        }
        ids.push(session_id.to_string());
        self.cache
            .set(&Self::index_key(user_id), &ids, &self.index_options(max_age))
            .await;
    }

    async fn read_index(&self, user_id: &str) -> Vec<String> {
        self.cache
            .get::<Vec<String>>(&Self::index_key(user_id))
            .await
            .unwrap_or_default()
    }

    async fn write_index(&self, user_id: &str, ids: Vec<String>) {
        let key = Self::index_key(user_id);
        if ids.is_empty() {
            self.cache.delete(&key).await;
            return;
        }
        self.cache
            .set(&key, &ids, &self.index_options(self.settings.max_age()))
            .await;
    }
}
