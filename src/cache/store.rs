// Tiered content store - process-local LRU tier plus optional shared backing
// Author: kelexine (https://github.com/kelexine)

use super::backing::{BackingError, DistributedBacking};
use super::models::{Blob, CacheConfig, CacheStats, CachedContent};
use crate::metrics::{MetricsRegistry, CACHE_BACKING_ERRORS};
use crate::utils::Clock;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Process-local tier with byte accounting.
struct LocalTier {
    entries: LruCache<String, CachedContent>,
    total_bytes: u64,
    pinned: usize,
}

impl LocalTier {
    fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            total_bytes: 0,
            pinned: 0,
        }
    }

    fn remove(&mut self, id: &str) -> Option<CachedContent> {
        let removed = self.entries.pop(id)?;
        self.total_bytes = self.total_bytes.saturating_sub(removed.size);
        if removed.pinned {
            self.pinned -= 1;
        }
        Some(removed)
    }

    fn insert(&mut self, entry: CachedContent) {
        self.remove(&entry.id);
        self.total_bytes += entry.size;
        if entry.pinned {
            self.pinned += 1;
        }
        self.entries.put(entry.id.clone(), entry);
    }

    fn set_pinned(&mut self, id: &str, pinned: bool) -> Option<CachedContent> {
        let entry = self.entries.get_mut(id)?;
        if entry.pinned != pinned {
            entry.pinned = pinned;
            if pinned {
                self.pinned += 1;
            } else {
                self.pinned -= 1;
            }
        }
        Some(entry.clone())
    }

    /// Evicts least-recently-used unpinned entries until both bounds hold,
    /// never touching `keep`. Returns the number of evictions.
    fn enforce_bounds(&mut self, max_entries: usize, max_bytes: u64, keep: &str) -> usize {
        let mut evicted = 0;
        while self.entries.len() > max_entries || self.total_bytes > max_bytes {
            let victim = self
                .entries
                .iter()
                .rev()
                .find(|(id, entry)| !entry.pinned && id.as_str() != keep)
                .map(|(id, _)| id.clone());

            match victim {
                Some(id) => {
                    self.remove(&id);
                    evicted += 1;
                }
                // Only pinned entries (or the fresh one) left.
                None => break,
            }
        }
        evicted
    }
}

/// Tiered cache for blob content.
///
/// Reads check the local tier, then the distributed backing (promoting hits
/// into the local tier). Writes go through to both. TTL expiry is evaluated
/// lazily on read in whichever tier the entry is found. Backing failures are
/// logged, counted in `cache_backing_errors_total` and absorbed; on an
/// outage the store behaves as local-only. A corrupt entry is treated as a
/// miss and leaves the reachability flag alone.
pub struct CacheStore {
    config: CacheConfig,
    local: Mutex<LocalTier>,
    backing: Option<Arc<dyn DistributedBacking>>,
    backing_reachable: AtomicBool,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl CacheStore {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            local: Mutex::new(LocalTier::new()),
            backing: None,
            backing_reachable: AtomicBool::new(false),
            clock,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_backing(mut self, backing: Arc<dyn DistributedBacking>) -> Self {
        self.backing = Some(backing);
        // Optimistic until the first call says otherwise.
        self.backing_reachable = AtomicBool::new(true);
        self
    }

    pub fn has_backing(&self) -> bool {
        self.backing.is_some()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn get(&self, id: &str) -> Option<CachedContent> {
        let now = self.clock.now();

        {
            let mut local = self.local.lock();
            if let Some(entry) = local.entries.get(id) {
                if !entry.is_expired_at(now) {
                    return Some(entry.clone());
                }
                debug!(id, "Local entry expired, evicting");
                local.remove(id);
            }
        }

        let backing = self.backing.as_ref()?;
        let entry = self.call_backing("get", backing.get(id)).await.flatten()?;

        if entry.is_expired_at(now) {
            debug!(id, "Backing entry expired, evicting");
            self.call_backing("delete", backing.delete(id)).await;
            return None;
        }

        debug!(id, "Promoting backing entry into local tier");
        self.insert_local(entry.clone());
        Some(entry)
    }

    /// Stores `blob` under `id` in both tiers and returns the entry.
    pub async fn set(&self, id: &str, blob: Blob, ttl_seconds: u64, pinned: bool) -> CachedContent {
        let entry = CachedContent::from_blob(id, blob, self.clock.now(), ttl_seconds, pinned);
        self.insert_local(entry.clone());

        if let Some(backing) = &self.backing {
            self.call_backing("set", backing.set(&entry)).await;
        }
        entry
    }

    /// Removes `id` from both tiers. Returns whether either tier held it.
    pub async fn delete(&self, id: &str) -> bool {
        let removed_local = self.local.lock().remove(id).is_some();

        let removed_backing = match &self.backing {
            Some(backing) => self.call_backing("delete", backing.delete(id)).await.unwrap_or(false),
            None => false,
        };
        removed_local || removed_backing
    }

    pub async fn pin(&self, id: &str) -> bool {
        self.set_pinned(id, true).await
    }

    pub async fn unpin(&self, id: &str) -> bool {
        self.set_pinned(id, false).await
    }

    async fn set_pinned(&self, id: &str, pinned: bool) -> bool {
        let now = self.clock.now();

        let local_hit = {
            let mut local = self.local.lock();
            match local.entries.peek(id).map(|entry| entry.is_expired_at(now)) {
                Some(true) => {
                    local.remove(id);
                    None
                }
                Some(false) => local.set_pinned(id, pinned),
                None => None,
            }
        };

        let updated = match local_hit {
            Some(entry) => entry,
            None => {
                let Some(backing) = &self.backing else {
                    return false;
                };
                match self.call_backing("get", backing.get(id)).await.flatten() {
                    Some(entry) if !entry.is_expired_at(now) => {
                        let entry = CachedContent { pinned, ..entry };
                        self.insert_local(entry.clone());
                        entry
                    }
                    _ => return false,
                }
            }
        };

        if let Some(backing) = &self.backing {
            self.call_backing("set", backing.set(&updated)).await;
        }
        true
    }

    pub fn stats(&self) -> CacheStats {
        let local = self.local.lock();
        CacheStats {
            entry_count: local.entries.len(),
            total_size_bytes: local.total_bytes,
            pinned_count: local.pinned,
            distributed_backing_reachable: self.backing.is_some() && self.backing_reachable.load(Ordering::Relaxed),
        }
    }

    /// Pings the backing and refreshes the reachability flag.
    pub async fn probe(&self) -> bool {
        match &self.backing {
            Some(backing) => self.call_backing("ping", backing.ping()).await.is_some(),
            None => false,
        }
    }

    fn insert_local(&self, entry: CachedContent) {
        let id = entry.id.clone();
        let mut local = self.local.lock();
        local.insert(entry);
        let evicted = local.enforce_bounds(self.config.max_entries, self.config.max_bytes, &id);
        if evicted > 0 {
            debug!(evicted, "Evicted least-recently-used entries");
        }
    }

    /// Runs a backing call under the configured timeout. Failures are
    /// logged, counted and come back as `None`; outages also flip the
    /// reachability flag.
    async fn call_backing<T, F>(&self, op: &str, call: F) -> Option<T>
    where
        F: Future<Output = Result<T, BackingError>>,
    {
        let result = match tokio::time::timeout(self.config.backing_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(BackingError::Timeout(self.config.backing_timeout)),
        };

        match result {
            Ok(value) => {
                self.backing_reachable.store(true, Ordering::Relaxed);
                Some(value)
            }
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.counter(CACHE_BACKING_ERRORS, 1.0, &[("kind", e.kind()), ("operation", op)]);
                }
                if !e.is_outage() {
                    warn!(op, "Ignoring unusable distributed cache entry: {}", e);
                    return None;
                }
                if self.backing_reachable.swap(false, Ordering::Relaxed) {
                    warn!(op, "Distributed cache unreachable, serving local-only: {}", e);
                } else {
                    debug!(op, "Distributed cache still unreachable: {}", e);
                }
                None
            }
        }
    }
}
