// Analytics tracker - per-identifier and global request statistics
// Author: kelexine (https://github.com/kelexine)

use super::models::{ContentStats, GlobalStats};
use crate::utils::Clock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct Totals {
    requests: u64,
    hits: u64,
    misses: u64,
    bytes_served: u64,
    latency_ms: f64,
}

#[derive(Default)]
struct Inner {
    per_id: HashMap<String, ContentStats>,
    totals: Totals,
    seq: u64,
}

/// Tracks request, hit and latency statistics.
///
/// Each `record_fetch` applies all of its updates under one lock, so the
/// per-id and global views never disagree.
pub struct AnalyticsTracker {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl AnalyticsTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    pub fn record_fetch(&self, id: &str, hit: bool, latency_ms: f64, size_bytes: u64, geo: Option<&str>) {
        let now = self.clock.now();
        let latency_ms = if latency_ms.is_finite() { latency_ms.max(0.0) } else { 0.0 };

        let mut inner = self.inner.lock();
        inner.seq += 1;
        let seq = inner.seq;

        let stats = inner
            .per_id
            .entry(id.to_string())
            .or_insert_with(|| ContentStats::new(id, now));
        stats.total_requests += 1;
        if hit {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        stats.total_bytes_served += size_bytes;
        stats.total_latency_ms += latency_ms;
        stats.average_latency_ms = stats.total_latency_ms / stats.total_requests as f64;
        if now > stats.last_accessed_at {
            stats.last_accessed_at = now;
        }
        stats.last_access_seq = seq;
        if let Some(region) = geo.filter(|r| !r.is_empty()) {
            *stats.geography.entry(region.to_string()).or_insert(0) += 1;
        }

        let totals = &mut inner.totals;
        totals.requests += 1;
        if hit {
            totals.hits += 1;
        } else {
            totals.misses += 1;
        }
        totals.bytes_served += size_bytes;
        totals.latency_ms += latency_ms;

        debug!(id, hit, latency_ms, size_bytes, "Recorded fetch");
    }

    pub fn get_stats(&self, id: &str) -> Option<ContentStats> {
        self.inner.lock().per_id.get(id).cloned()
    }

    /// Ids ordered by request count, most recently accessed first on ties.
    pub fn get_top_n(&self, k: usize) -> Vec<String> {
        self.top_n(k).into_iter().map(|s| s.id).collect()
    }

    /// Same ordering as [`get_top_n`](Self::get_top_n), with full stats.
    pub fn top_n(&self, k: usize) -> Vec<ContentStats> {
        let inner = self.inner.lock();
        let mut all: Vec<&ContentStats> = inner.per_id.values().collect();
        all.sort_by(|a, b| {
            b.total_requests
                .cmp(&a.total_requests)
                .then_with(|| b.last_accessed_at.cmp(&a.last_accessed_at))
                .then_with(|| b.last_access_seq.cmp(&a.last_access_seq))
        });
        all.into_iter().take(k).cloned().collect()
    }

    pub fn get_global_stats(&self) -> GlobalStats {
        let inner = self.inner.lock();
        let t = &inner.totals;
        let ratio = |n: f64| if t.requests == 0 { 0.0 } else { n / t.requests as f64 };

        GlobalStats {
            total_requests: t.requests,
            total_hits: t.hits,
            total_misses: t.misses,
            total_bytes_served: t.bytes_served,
            average_latency_ms: ratio(t.latency_ms),
            unique_ids: inner.per_id.len() as u64,
            hit_rate: ratio(t.hits as f64),
        }
    }

    /// Drops every per-id record and zeroes the global counters.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;

    fn tracker() -> (AnalyticsTracker, ManualClock) {
        let clock = ManualClock::default();
        (AnalyticsTracker::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_record_updates_both_views() {
        let (tracker, _) = tracker();
        tracker.record_fetch("abc", false, 40.0, 100, Some("eu-west"));
        tracker.record_fetch("abc", true, 0.0, 100, Some("eu-west"));

        let stats = tracker.get_stats("abc").unwrap();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_bytes_served, 200);
        assert_eq!(stats.average_latency_ms, 20.0);
        assert_eq!(stats.geography.get("eu-west"), Some(&2));

        let global = tracker.get_global_stats();
        assert_eq!(global.total_requests, 2);
        assert_eq!(global.unique_ids, 1);
        assert_eq!(global.hit_rate, 0.5);
    }

    #[test]
    fn test_unknown_id_has_no_stats() {
        let (tracker, _) = tracker();
        assert!(tracker.get_stats("missing").is_none());
    }

    #[test]
    fn test_reset_clears_everything() {
        let (tracker, _) = tracker();
        tracker.record_fetch("abc", true, 0.0, 1, None);
        tracker.reset();
        assert!(tracker.get_stats("abc").is_none());
        assert_eq!(tracker.get_global_stats(), GlobalStats::default());
    }
}
