// Retrieval pipeline: cache, then primary origin, then fallbacks
// Author: kelexine (https://github.com/kelexine)

use super::events::{CacheEvent, EventBus, EventKind};
use crate::analytics::AnalyticsTracker;
use crate::cache::{Blob, CacheStore, CachedContent};
use crate::error::{GatewayError, Result};
use crate::metrics::MetricsRegistry;
use crate::origin::Origin;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("Invalid regex pattern"));

pub const CACHE_SOURCE: &str = "cache";

/// Rejects identifiers outside `[A-Za-z0-9_-]{1,128}`.
pub fn validate_id(id: &str) -> Result<()> {
    if ID_PATTERN.is_match(id) {
        Ok(())
    } else {
        Err(GatewayError::InvalidIdentifier(id.chars().take(140).collect()))
    }
}

/// Result of one pipeline execution.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub id: String,
    pub data: Bytes,
    pub content_type: String,
    pub size: u64,
    pub hit: bool,
    /// `cache`, or the name of the origin that served the content.
    pub source: String,
    pub cached_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    /// Time left before expiry; `None` when pinned.
    pub ttl_remaining: Option<Duration>,
    pub pinned: bool,
    /// Time spent in the origin scan; zero on a hit.
    pub fetch_time: Duration,
}

impl FetchOutcome {
    fn from_entry(entry: CachedContent, hit: bool, source: String, now: DateTime<Utc>, fetch_time: Duration) -> Self {
        let ttl_remaining = entry.remaining_ttl(now);
        Self {
            id: entry.id,
            data: entry.data,
            content_type: entry.content_type,
            size: entry.size,
            hit,
            source,
            cached_at: entry.cached_at,
            ttl_seconds: entry.ttl_seconds,
            ttl_remaining,
            pinned: entry.pinned,
            fetch_time,
        }
    }
}

/// The retrieval pipeline.
///
/// Origins are scanned sequentially: primary first, then fallbacks in
/// declared order, stopping at the first one that returns content. Cache
/// population, analytics and metrics are applied only once the scan has a
/// definitive result, so a fetch that is dropped mid-scan leaves no trace.
pub struct FetchOrchestrator {
    cache: Arc<CacheStore>,
    primary: Arc<dyn Origin>,
    fallbacks: Vec<Arc<dyn Origin>>,
    analytics: Arc<AnalyticsTracker>,
    metrics: Arc<MetricsRegistry>,
    events: EventBus,
    pipeline_deadline: Option<Duration>,
}

impl FetchOrchestrator {
    pub fn new(
        cache: Arc<CacheStore>,
        primary: Arc<dyn Origin>,
        analytics: Arc<AnalyticsTracker>,
        metrics: Arc<MetricsRegistry>,
        events: EventBus,
    ) -> Self {
        Self {
            cache,
            primary,
            fallbacks: Vec::new(),
            analytics,
            metrics,
            events,
            pipeline_deadline: None,
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<Arc<dyn Origin>>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Bounds the whole origin scan, on top of each origin's own timeout.
    pub fn with_pipeline_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.pipeline_deadline = deadline;
        self
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Origins in scan order.
    pub fn origins(&self) -> impl Iterator<Item = &Arc<dyn Origin>> {
        std::iter::once(&self.primary).chain(self.fallbacks.iter())
    }

    pub async fn fetch(&self, id: &str) -> Result<FetchOutcome> {
        self.fetch_from_region(id, None, None).await
    }

    /// Same as [`fetch`](Self::fetch), attributing the request to `region`
    /// in the analytics geography breakdown. Every origin tried for this
    /// fetch receives `correlation_id`, or one fresh id when none is given.
    pub async fn fetch_from_region(
        &self,
        id: &str,
        region: Option<&str>,
        correlation_id: Option<&str>,
    ) -> Result<FetchOutcome> {
        validate_id(id)?;

        if let Some(entry) = self.cache.get(id).await {
            return Ok(self.serve_hit(entry, region));
        }
        self.metrics.record_cache_operation("miss");

        let correlation_id = correlation_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let started = Instant::now();
        let scan = self.scan_origins(id, &correlation_id);
        let result = match self.pipeline_deadline {
            Some(deadline) => match tokio::time::timeout(deadline, scan).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(id, correlation_id = %correlation_id, ?deadline, "Origin scan exceeded pipeline deadline");
                    Err(GatewayError::upstream_unavailable("pipeline deadline exceeded", None))
                }
            },
            None => scan.await,
        };
        let elapsed = started.elapsed();
        let latency_ms = elapsed.as_secs_f64() * 1000.0;

        match result {
            Ok((source, blob)) => {
                let entry = self
                    .cache
                    .set(id, blob, self.cache.config().default_ttl_seconds, false)
                    .await;
                self.analytics.record_fetch(id, false, latency_ms, entry.size, region);
                self.metrics.record_fetch("miss", &source, elapsed);
                self.metrics.record_bytes_served(&source, entry.size);
                self.refresh_cache_gauges();
                self.publish(EventKind::Miss, id, Some(source.clone()));

                info!(id, correlation_id = %correlation_id, source = %source, size = entry.size, ?elapsed, "Served from origin");
                Ok(FetchOutcome::from_entry(entry, false, source, self.cache.now(), elapsed))
            }
            Err(e) => {
                self.analytics.record_fetch(id, false, latency_ms, 0, region);
                self.metrics.record_fetch(e.code(), "none", elapsed);
                self.publish(EventKind::Miss, id, None);
                Err(e)
            }
        }
    }

    fn serve_hit(&self, entry: CachedContent, region: Option<&str>) -> FetchOutcome {
        debug!(id = %entry.id, "Cache hit");
        self.analytics.record_fetch(&entry.id, true, 0.0, entry.size, region);
        self.metrics.record_fetch("hit", CACHE_SOURCE, Duration::ZERO);
        self.metrics.record_cache_operation("hit");
        self.metrics.record_bytes_served(CACHE_SOURCE, entry.size);
        self.publish(EventKind::Hit, &entry.id, Some(CACHE_SOURCE.to_string()));

        FetchOutcome::from_entry(entry, true, CACHE_SOURCE.to_string(), self.cache.now(), Duration::ZERO)
    }

    /// Walks the origins in order. `NotFound` only when every origin
    /// answered with absence; any transient failure makes the overall
    /// result `UpstreamUnavailable`.
    async fn scan_origins(&self, id: &str, correlation_id: &str) -> Result<(String, Blob)> {
        let mut all_absent = true;
        let mut retry_after: Option<Duration> = None;

        for origin in self.origins() {
            match origin.fetch_blob(id, correlation_id).await {
                Ok(Some(blob)) => {
                    self.metrics.record_origin_attempt(origin.name(), "ok");
                    return Ok((origin.name().to_string(), blob));
                }
                Ok(None) => {
                    self.metrics.record_origin_attempt(origin.name(), "not_found");
                    debug!(id, origin = origin.name(), "Origin reported absence");
                }
                Err(e) => {
                    self.metrics.record_origin_attempt(origin.name(), e.outcome());
                    all_absent = false;
                    if let Some(hint) = e.retry_after() {
                        retry_after = Some(retry_after.map_or(hint, |current| current.min(hint)));
                    }
                    warn!(id, origin = origin.name(), "Origin attempt failed: {}", e);
                }
            }
        }

        if all_absent {
            Err(GatewayError::NotFound(id.to_string()))
        } else {
            Err(GatewayError::upstream_unavailable(
                "no origin could serve the content",
                retry_after,
            ))
        }
    }

    pub async fn pin(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        let found = self.cache.pin(id).await;
        if found {
            self.metrics.record_cache_operation("pin");
            self.refresh_cache_gauges();
            self.publish(EventKind::Pin, id, None);
        }
        Ok(found)
    }

    pub async fn unpin(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        let found = self.cache.unpin(id).await;
        if found {
            self.metrics.record_cache_operation("unpin");
            self.refresh_cache_gauges();
            self.publish(EventKind::Unpin, id, None);
        }
        Ok(found)
    }

    pub async fn evict(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        let removed = self.cache.delete(id).await;
        self.metrics.record_cache_operation("evict");
        self.refresh_cache_gauges();
        Ok(removed)
    }

    /// Stores new content on the primary origin.
    pub async fn upload(&self, data: Bytes, content_type: &str, correlation_id: Option<&str>) -> Result<String> {
        let correlation_id = correlation_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let id = self.primary.upload_blob(data, content_type, &correlation_id).await?;
        validate_id(&id).map_err(|_| GatewayError::Internal("origin assigned an unusable id".to_string()))?;
        info!(id = %id, origin = self.primary.name(), "Uploaded content");
        Ok(id)
    }

    /// Health of every origin, in scan order.
    pub async fn origin_health(&self) -> Vec<(String, bool)> {
        let checks = self.origins().map(|origin| async move {
            (origin.name().to_string(), origin.health_check().await)
        });
        futures::future::join_all(checks).await
    }

    fn refresh_cache_gauges(&self) {
        let stats = self.cache.stats();
        self.metrics.update_cache_size(stats.entry_count, stats.total_size_bytes);
    }

    fn publish(&self, kind: EventKind, id: &str, source: Option<String>) {
        self.events.publish(CacheEvent {
            kind,
            id: id.to_string(),
            at: self.cache.now(),
            source,
        });
    }
}
