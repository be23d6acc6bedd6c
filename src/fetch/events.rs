// Fire-and-forget cache event bus
// Author: kelexine (https://github.com/kelexine)

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Hit,
    Miss,
    Pin,
    Unpin,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Hit => "hit",
            EventKind::Miss => "miss",
            EventKind::Pin => "pin",
            EventKind::Unpin => "unpin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEvent {
    pub kind: EventKind,
    pub id: String,
    pub at: DateTime<Utc>,
    /// Which tier or origin served the request, for hit/miss.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Broadcast channel for notification consumers.
///
/// Publishing never waits. With no subscribers the event is dropped; a
/// subscriber that falls behind by more than the capacity misses events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: CacheEvent) {
        let kind = event.kind.as_str();
        match self.tx.send(event) {
            Ok(receivers) => trace!(kind, receivers, "Published cache event"),
            Err(_) => trace!(kind, "No subscribers for cache event"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.tx.subscribe()
    }
}
