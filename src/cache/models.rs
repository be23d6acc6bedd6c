//! Cache entry, configuration and statistics models.

// Author: kelexine (https://github.com/kelexine)

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Payload returned by an origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub data: Bytes,
    pub content_type: String,
    /// When the origin produced the content, if it said so.
    pub origin_timestamp: Option<DateTime<Utc>>,
}

impl Blob {
    pub fn new(data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            content_type: content_type.into(),
            origin_timestamp: None,
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// A cached blob plus its lifetime metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedContent {
    pub id: String,
    #[serde(with = "base64_bytes")]
    pub data: Bytes,
    pub content_type: String,
    pub size: u64,
    pub origin_timestamp: DateTime<Utc>,
    pub cached_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub pinned: bool,
}

impl CachedContent {
    pub fn from_blob(id: &str, blob: Blob, cached_at: DateTime<Utc>, ttl_seconds: u64, pinned: bool) -> Self {
        Self {
            id: id.to_string(),
            size: blob.size(),
            origin_timestamp: blob.origin_timestamp.unwrap_or(cached_at),
            data: blob.data,
            content_type: blob.content_type,
            cached_at,
            ttl_seconds,
            pinned,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX);
        self.cached_at
            .checked_add_signed(chrono::Duration::seconds(ttl.min(i64::MAX / 1000)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Pinned entries never expire; others expire once `now` passes
    /// `cached_at + ttl_seconds`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.pinned && now > self.expires_at()
    }

    /// Time left before expiry; `None` for pinned entries.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.pinned {
            return None;
        }
        Some((self.expires_at() - now).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Configuration for the tiered content cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied to entries populated from an origin.
    pub default_ttl_seconds: u64,
    /// Local tier entry bound; pinned entries are exempt from eviction.
    pub max_entries: usize,
    /// Local tier payload bound in bytes; pinned entries are exempt.
    pub max_bytes: u64,
    /// Upper bound for each distributed backing call.
    pub backing_timeout: Duration,
}

impl Default for CacheConfig {
    /// Provides default values for cache configuration.
    ///
    /// - `default_ttl_seconds`: 3600
    /// - `max_entries`: 10000
    /// - `max_bytes`: 512 MiB
    /// - `backing_timeout`: 250ms
    fn default() -> Self {
        Self {
            default_ttl_seconds: 3600,
            max_entries: 10_000,
            max_bytes: 512 * 1024 * 1024,
            backing_timeout: Duration::from_millis(250),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            default_ttl_seconds: settings.default_ttl_seconds,
            max_entries: settings.max_entries,
            max_bytes: settings.max_bytes,
            backing_timeout: Duration::from_millis(settings.backing_timeout_ms),
        }
    }
}

/// Statistics for the local tier and the backing connection.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_size_bytes: u64,
    pub pinned_count: usize,
    pub distributed_backing_reachable: bool,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
