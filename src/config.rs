//! Runtime settings for the cache and session layers.
//!
//! Designed to be embedded in the host application's TOML configuration:
//!
//! ```toml
//! [cache]
//! tag_ttl_slack_secs = 300
//! drain_interval_ms = 1000
//!
//! [sessions]
//! max_age_secs = 86400
//! max_sessions_per_user = 10
//! ```

use serde::Deserialize;
use time::Duration;

// Default values for cache configuration
const DEFAULT_TAG_TTL_SLACK_SECS: i64 = 300;
const DEFAULT_DRAIN_INTERVAL_MS: u64 = 1000;

// Default values for session configuration
const DEFAULT_SESSION_MAX_AGE_SECS: i64 = 86_400;
const DEFAULT_MAX_SESSIONS_PER_USER: usize = 10;

/// Cache layer configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Extra lifetime granted to a tag membership set beyond its members'
    /// TTL, so the tag index outlives the shortest-lived member.
    pub tag_ttl_slack_secs: i64,
    /// Interval of the background queue drain that catches lost wake-ups.
    pub drain_interval_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            tag_ttl_slack_secs: DEFAULT_TAG_TTL_SLACK_SECS,
            drain_interval_ms: DEFAULT_DRAIN_INTERVAL_MS,
        }
    }
}

impl CacheSettings {
    pub fn tag_ttl_slack(&self) -> Duration {
        Duration::seconds(self.tag_ttl_slack_secs)
    }

    pub fn drain_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.drain_interval_ms)
    }
}

/// Session layer configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Session lifetime and idle timeout, in seconds.
    pub max_age_secs: i64,
    /// Concurrent session cap per user; the oldest session is evicted
    /// first when the cap is exceeded.
    pub max_sessions_per_user: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_age_secs: DEFAULT_SESSION_MAX_AGE_SECS,
            max_sessions_per_user: DEFAULT_MAX_SESSIONS_PER_USER,
        }
    }
}

impl SessionSettings {
    pub fn max_age(&self) -> Duration {
        Duration::seconds(self.max_age_secs)
    }
}
