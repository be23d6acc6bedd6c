// Metrics module for Prometheus observability
// Author: kelexine (https://github.com/kelexine)

mod registry;
pub mod sampler;

pub use registry::{
    normalize_name, BucketSnapshot, HistogramSnapshot, MetricKind, MetricsError, MetricsRegistry,
    MetricsSnapshot, SeriesSnapshot,
};
pub use sampler::ProcessSampler;

// Series names used by the pipeline
pub const FETCH_REQUESTS: &str = "fetch_requests_total";
pub const FETCH: &str = "fetch";
pub const CACHE_OPERATIONS: &str = "cache_operations_total";
pub const CACHE_ENTRIES: &str = "cache_entries";
pub const CACHE_BYTES: &str = "cache_size_bytes";
pub const CACHE_BACKING_ERRORS: &str = "cache_backing_errors_total";
pub const ORIGIN_ATTEMPTS: &str = "origin_attempts_total";
pub const UPSTREAM_REQUEST: &str = "upstream_request";
pub const CIRCUIT_STATE: &str = "circuit_state";
pub const CIRCUIT_TRANSITIONS: &str = "circuit_transitions_total";
pub const BYTES_SERVED: &str = "bytes_served_total";

impl MetricsRegistry {
    /// Helper to record the outcome of one pipeline execution
    pub fn record_fetch(&self, outcome: &str, source: &str, elapsed: std::time::Duration) {
        self.counter(FETCH_REQUESTS, 1.0, &[("outcome", outcome), ("source", source)]);
        self.observe_duration(FETCH, elapsed, &[("outcome", outcome)]);
    }

    pub fn record_cache_operation(&self, operation: &str) {
        self.counter(CACHE_OPERATIONS, 1.0, &[("operation", operation)]);
    }

    pub fn update_cache_size(&self, entries: usize, bytes: u64) {
        self.gauge(CACHE_ENTRIES, entries as f64, &[]);
        self.gauge(CACHE_BYTES, bytes as f64, &[]);
    }

    /// Helper to record a single origin attempt within the fallback chain
    pub fn record_origin_attempt(&self, origin: &str, outcome: &str) {
        self.counter(ORIGIN_ATTEMPTS, 1.0, &[("origin", origin), ("outcome", outcome)]);
    }

    /// Helper to record outbound transport latency
    pub fn record_upstream_request(&self, upstream: &str, outcome: &str, elapsed: std::time::Duration) {
        self.observe_duration(UPSTREAM_REQUEST, elapsed, &[("upstream", upstream), ("outcome", outcome)]);
    }

    /// Breaker state gauge: 0 closed, 1 half-open, 2 open.
    pub fn record_circuit_state(&self, upstream: &str, state: &str, level: f64) {
        self.gauge(CIRCUIT_STATE, level, &[("upstream", upstream)]);
        self.counter(CIRCUIT_TRANSITIONS, 1.0, &[("to", state), ("upstream", upstream)]);
    }

    pub fn record_bytes_served(&self, source: &str, bytes: u64) {
        self.counter(BYTES_SERVED, bytes as f64, &[("source", source)]);
    }
}
