//! Configuration data structures for the blobgate gateway.
//!
//! This module defines the schema for the application settings: the HTTP
//! surface, the origin chain, the cache tiers, circuit breaking, the outbound
//! transport pool and the observability stack.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The root configuration object for the application.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// HTTP server settings (host, port, workers).
    #[serde(default)]
    pub server: ServerConfig,

    /// Primary and fallback origins.
    #[serde(default)]
    pub origins: OriginsConfig,

    /// Local and distributed cache tiers.
    #[serde(default)]
    pub cache: CacheSettings,

    /// Per-origin circuit breaker settings.
    #[serde(default)]
    pub breaker: BreakerSettings,

    /// Logging and observability settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics registry and process sampler.
    #[serde(default)]
    pub metrics: MetricsSettings,

    /// Performance and resource management settings.
    #[serde(default)]
    pub performance: PerformanceConfig,
}

/// Settings for the built-in HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The IP address or hostname the server should bind to.
    /// Default: `127.0.0.1`
    #[serde(default = "default_host")]
    pub host: String,

    /// The port number the server should listen on.
    /// Default: `8080`
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads for the Tokio runtime.
    /// Default: Number of logical CPU cores.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// A single upstream origin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OriginConfig {
    /// Logical name, used for the `X-Source` header and as breaker key.
    pub name: String,

    /// Base URL; blobs are fetched from `<base_url>/v1/<id>`.
    pub base_url: String,

    /// Per-request timeout in milliseconds.
    /// Default: `10000`
    #[serde(default = "default_origin_timeout")]
    pub timeout_ms: u64,
}

impl OriginConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            timeout_ms: default_origin_timeout(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Settings for the origin chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginsConfig {
    /// The primary origin, tried first on every cache miss.
    #[serde(default = "default_primary_origin")]
    pub primary: OriginConfig,

    /// Fallback origins in priority order.
    /// Default: empty
    #[serde(default)]
    pub fallbacks: Vec<OriginConfig>,

    /// Optional deadline for the whole origin scan, in milliseconds.
    /// Default: unset (each attempt is bounded only by its own timeout)
    #[serde(default)]
    pub pipeline_deadline_ms: Option<u64>,
}

/// Settings for the tiered content cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// TTL applied to entries populated from an origin.
    /// Default: `3600`
    #[serde(default = "default_ttl")]
    pub default_ttl_seconds: u64,

    /// Maximum number of entries in the local tier (pinned entries exempt).
    /// Default: `10000`
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Maximum total payload bytes in the local tier (pinned entries exempt).
    /// Default: `536870912` (512 MiB)
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    /// Base URL of the distributed backing service. Unset means local-only.
    #[serde(default)]
    pub backing_url: Option<String>,

    /// Timeout for each distributed backing call, in milliseconds.
    /// Default: `250`
    #[serde(default = "default_backing_timeout")]
    pub backing_timeout_ms: u64,
}

/// Settings for per-origin circuit breakers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive qualifying failures that open the breaker.
    /// Default: `5`
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds an open breaker waits before allowing a probe.
    /// Default: `30`
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_seconds: u64,
}

/// Settings for application logging and output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    /// Default: `info`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for logs (`pretty`, `json`).
    /// Default: `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Whether to strip credentials and query strings from URLs in logs.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub sanitize_urls: bool,
}

/// Settings for the metrics registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Whether the periodic process sampler runs.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub sampler_enabled: bool,

    /// Process sampler interval in seconds.
    /// Default: `30`
    #[serde(default = "default_sample_interval")]
    pub sample_interval_seconds: u64,

    /// Histogram bucket upper bounds (seconds); `+Inf` is always appended.
    #[serde(default = "default_buckets")]
    pub buckets: Vec<f64>,
}

/// Settings for tuning application performance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Maximum number of idle connections per origin host.
    /// Default: `32`
    #[serde(default = "default_pool_size")]
    pub connection_pool_size: usize,

    /// Maximum number of concurrent in-flight requests (and so open sockets)
    /// per destination. Further requests wait for a slot; the wait counts
    /// against their own timeout.
    /// Default: `64`
    #[serde(default = "default_max_connections_per_host")]
    pub max_connections_per_host: usize,

    /// Seconds an idle pooled connection is kept.
    /// Default: `90`
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_seconds: u64,

    /// TCP connect timeout in seconds.
    /// Default: `5`
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Buffer size of the notification channel.
    /// Default: `1024`
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,
}

// Default trait implementations linking to custom logic

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
        }
    }
}

impl Default for OriginsConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_origin(),
            fallbacks: Vec::new(),
            pipeline_deadline_ms: None,
        }
    }
}

impl OriginsConfig {
    pub fn pipeline_deadline(&self) -> Option<Duration> {
        self.pipeline_deadline_ms.map(Duration::from_millis)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_seconds: default_ttl(),
            max_entries: default_max_entries(),
            max_bytes: default_max_bytes(),
            backing_url: None,
            backing_timeout_ms: default_backing_timeout(),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_seconds: default_recovery_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            sanitize_urls: true,
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            sampler_enabled: true,
            sample_interval_seconds: default_sample_interval(),
            buckets: default_buckets(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            connection_pool_size: default_pool_size(),
            max_connections_per_host: default_max_connections_per_host(),
            pool_idle_timeout_seconds: default_pool_idle_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            event_channel_capacity: default_event_capacity(),
        }
    }
}

// Helper functions for serde defaults and shared constants
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_primary_origin() -> OriginConfig {
    OriginConfig::new("primary", "http://127.0.0.1:31415")
}

fn default_origin_timeout() -> u64 {
    10_000
}

fn default_ttl() -> u64 {
    3600 // 1 hour
}

fn default_max_entries() -> usize {
    10_000
}

fn default_max_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_backing_timeout() -> u64 {
    250
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_sample_interval() -> u64 {
    30
}

pub(crate) fn default_buckets() -> Vec<f64> {
    vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
}

fn default_pool_size() -> usize {
    32
}

fn default_max_connections_per_host() -> usize {
    64
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_event_capacity() -> usize {
    1024
}
