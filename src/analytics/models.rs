//! Analytics statistics models.

// Author: kelexine (https://github.com/kelexine)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request statistics for a single content identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentStats {
    pub id: String,
    pub total_requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub total_bytes_served: u64,
    /// Sum of observed fetch latencies, in milliseconds.
    pub total_latency_ms: f64,
    pub average_latency_ms: f64,
    pub first_seen_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Request count per caller region, when the caller supplied one.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub geography: BTreeMap<String, u64>,
    /// Global access sequence of the most recent request; orders accesses
    /// that share a timestamp.
    #[serde(skip)]
    pub(crate) last_access_seq: u64,
}

impl ContentStats {
    pub(crate) fn new(id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            total_requests: 0,
            hits: 0,
            misses: 0,
            total_bytes_served: 0,
            total_latency_ms: 0.0,
            average_latency_ms: 0.0,
            first_seen_at: now,
            last_accessed_at: now,
            geography: BTreeMap::new(),
            last_access_seq: 0,
        }
    }

    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_requests as f64
        }
    }
}

/// Aggregate view across every identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_requests: u64,
    pub total_hits: u64,
    pub total_misses: u64,
    pub total_bytes_served: u64,
    pub average_latency_ms: f64,
    pub unique_ids: u64,
    pub hit_rate: f64,
}
