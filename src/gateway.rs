//! Composition root.
//!
//! Every piece of process-scoped state (metrics registry, breaker map, cache,
//! analytics) is constructed here exactly once and handed to its consumers
//! by `Arc`. Nothing in the crate reaches for a global, so tests can build
//! as many isolated gateways as they like.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::analytics::AnalyticsTracker;
use crate::breaker::{BreakerConfig, BreakerRegistry};
use crate::cache::{CacheConfig, CacheStore, DistributedBacking, HttpBacking};
use crate::config::AppConfig;
use crate::error::{GatewayError, Result};
use crate::fetch::{EventBus, FetchOrchestrator};
use crate::metrics::MetricsRegistry;
use crate::origin::{HttpOrigin, Origin};
use crate::transport::{ResilientHttpClient, TransportSettings};
use crate::utils::clock::{system_clock, Clock};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// All long-lived components of one gateway process.
#[derive(Clone)]
pub struct Gateway {
    pub config: Arc<AppConfig>,
    pub metrics: Arc<MetricsRegistry>,
    pub analytics: Arc<AnalyticsTracker>,
    pub cache: Arc<CacheStore>,
    pub client: ResilientHttpClient,
    pub orchestrator: Arc<FetchOrchestrator>,
    pub events: EventBus,
}

impl Gateway {
    /// Builds the gateway from configuration, using the system clock and the
    /// HTTP backing named by `cache.backing_url`, if any.
    pub fn build(config: &AppConfig) -> Result<Self> {
        let backing = match &config.cache.backing_url {
            Some(url) => {
                let timeout = Duration::from_millis(config.cache.backing_timeout_ms);
                let backing = HttpBacking::new(url, timeout)
                    .map_err(|e| GatewayError::Config(format!("cache backing: {}", e)))?;
                Some(Arc::new(backing) as Arc<dyn DistributedBacking>)
            }
            None => None,
        };
        Self::build_with(config, system_clock(), backing)
    }

    pub fn build_with(
        config: &AppConfig,
        clock: Arc<dyn Clock>,
        backing: Option<Arc<dyn DistributedBacking>>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(MetricsRegistry::new(config.metrics.buckets.clone()));
        let analytics = Arc::new(AnalyticsTracker::new(clock.clone()));

        let mut cache = CacheStore::new(CacheConfig::from(&config.cache), clock).with_metrics(metrics.clone());
        if let Some(backing) = backing {
            info!(backing = backing.name(), "Distributed cache backing enabled");
            cache = cache.with_backing(backing);
        }
        let cache = Arc::new(cache);

        let breaker_config = BreakerConfig::new(
            config.breaker.failure_threshold,
            Duration::from_secs(config.breaker.recovery_timeout_seconds),
        );
        let client = ResilientHttpClient::new(
            TransportSettings::from(&config.performance),
            breaker_config,
            metrics.clone(),
        )?;

        let primary: Arc<dyn Origin> = Arc::new(HttpOrigin::new(&config.origins.primary, client.clone()));
        let fallbacks = config
            .origins
            .fallbacks
            .iter()
            .map(|origin| Arc::new(HttpOrigin::new(origin, client.clone())) as Arc<dyn Origin>)
            .collect::<Vec<_>>();

        info!(
            primary = %config.origins.primary.name,
            fallbacks = fallbacks.len(),
            "Configured origins"
        );

        let events = EventBus::new(config.performance.event_channel_capacity);
        let orchestrator = FetchOrchestrator::new(
            cache.clone(),
            primary,
            analytics.clone(),
            metrics.clone(),
            events.clone(),
        )
        .with_fallbacks(fallbacks)
        .with_pipeline_deadline(config.origins.pipeline_deadline());

        Ok(Self {
            config: Arc::new(config.clone()),
            metrics,
            analytics,
            cache,
            client,
            orchestrator: Arc::new(orchestrator),
            events,
        })
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        self.client.breakers()
    }
}
