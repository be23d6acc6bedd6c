//! Distributed backing tier for the content cache.
//!
//! The backing is shared between gateway processes. It is strictly optional:
//! every call is bounded by a timeout in the store, and any failure degrades
//! the cache to local-only instead of failing the request.
//!
//! Two adapters are provided:
//! - [`MemoryBacking`]: an in-process map, for single-node setups and tests.
//! - [`HttpBacking`]: a remote key/value service speaking
//!   `GET/PUT/DELETE <base>/entries/<id>` with a JSON envelope and
//!   `GET <base>/ping`.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use super::models::CachedContent;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackingError {
    #[error("cache backend degraded: {0}")]
    Degraded(String),

    #[error("cache backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
}

impl BackingError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BackingError::Degraded(_) => "degraded",
            BackingError::Timeout(_) => "timeout",
            BackingError::Corrupt(_) => "corrupt",
        }
    }

    /// Whether the error says the backing itself is unreachable, as
    /// opposed to one bad entry.
    pub fn is_outage(&self) -> bool {
        !matches!(self, BackingError::Corrupt(_))
    }
}

#[async_trait]
pub trait DistributedBacking: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn get(&self, id: &str) -> Result<Option<CachedContent>, BackingError>;

    async fn set(&self, entry: &CachedContent) -> Result<(), BackingError>;

    /// Returns whether the backing held `id`.
    async fn delete(&self, id: &str) -> Result<bool, BackingError>;

    async fn ping(&self) -> Result<(), BackingError>;
}

/// In-process backing. Can be switched offline to exercise degradation.
#[derive(Default)]
pub struct MemoryBacking {
    entries: Mutex<HashMap<String, CachedContent>>,
    offline: AtomicBool,
}

impl MemoryBacking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Direct read that bypasses availability, for assertions.
    pub fn peek(&self, id: &str) -> Option<CachedContent> {
        self.entries.lock().get(id).cloned()
    }

    fn check(&self) -> Result<(), BackingError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(BackingError::Degraded("memory backing offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DistributedBacking for MemoryBacking {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, id: &str) -> Result<Option<CachedContent>, BackingError> {
        self.check()?;
        Ok(self.entries.lock().get(id).cloned())
    }

    async fn set(&self, entry: &CachedContent) -> Result<(), BackingError> {
        self.check()?;
        self.entries.lock().insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, BackingError> {
        self.check()?;
        Ok(self.entries.lock().remove(id).is_some())
    }

    async fn ping(&self) -> Result<(), BackingError> {
        self.check()
    }
}

/// Remote key/value backing over HTTP.
pub struct HttpBacking {
    http_client: Client,
    base_url: String,
}

impl HttpBacking {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackingError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .build()
            .map_err(|e| BackingError::Degraded(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn entry_url(&self, id: &str) -> String {
        format!("{}/entries/{}", self.base_url, urlencoding::encode(id))
    }
}

fn degraded(e: reqwest::Error) -> BackingError {
    BackingError::Degraded(e.without_url().to_string())
}

#[async_trait]
impl DistributedBacking for HttpBacking {
    fn name(&self) -> &str {
        "http"
    }

    async fn get(&self, id: &str) -> Result<Option<CachedContent>, BackingError> {
        let response = self
            .http_client
            .get(self.entry_url(id))
            .send()
            .await
            .map_err(degraded)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let entry: CachedContent = response
                    .json()
                    .await
                    .map_err(|e| BackingError::Corrupt(e.without_url().to_string()))?;
                if entry.id != id {
                    return Err(BackingError::Corrupt(format!("asked for {}, got {}", id, entry.id)));
                }
                Ok(Some(entry))
            }
            status => Err(BackingError::Degraded(format!("HTTP {}", status))),
        }
    }

    async fn set(&self, entry: &CachedContent) -> Result<(), BackingError> {
        let response = self
            .http_client
            .put(self.entry_url(&entry.id))
            .json(entry)
            .send()
            .await
            .map_err(degraded)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackingError::Degraded(format!("HTTP {}", response.status())))
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, BackingError> {
        let response = self
            .http_client
            .delete(self.entry_url(id))
            .send()
            .await
            .map_err(degraded)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            Ok(false)
        } else if status.is_success() {
            Ok(true)
        } else {
            Err(BackingError::Degraded(format!("HTTP {}", status)))
        }
    }

    async fn ping(&self) -> Result<(), BackingError> {
        let response = self
            .http_client
            .get(format!("{}/ping", self.base_url))
            .send()
            .await
            .map_err(degraded)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackingError::Degraded(format!("HTTP {}", response.status())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::models::Blob;
    use chrono::Utc;

    fn entry(id: &str) -> CachedContent {
        CachedContent::from_blob(id, Blob::new(&b"hello"[..], "text/plain"), Utc::now(), 60, false)
    }

    #[tokio::test]
    async fn test_memory_backing_offline() {
        let backing = MemoryBacking::new();
        backing.set(&entry("a")).await.unwrap();
        backing.set_available(false);
        assert!(backing.get("a").await.is_err());
        assert!(backing.ping().await.is_err());
        backing.set_available(true);
        assert!(backing.get("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_http_backing_roundtrip() {
        let mut server = mockito::Server::new_async().await;
        let stored = entry("abc");
        let body = serde_json::to_string(&stored).unwrap();

        let get = server
            .mock("GET", "/entries/abc")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;
        let missing = server
            .mock("GET", "/entries/gone")
            .with_status(404)
            .create_async()
            .await;

        let backing = HttpBacking::new(&server.url(), Duration::from_secs(2)).unwrap();
        assert_eq!(backing.get("abc").await.unwrap(), Some(stored));
        assert_eq!(backing.get("gone").await.unwrap(), None);

        get.assert_async().await;
        missing.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_backing_server_error_is_degraded() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/ping").with_status(503).create_async().await;

        let backing = HttpBacking::new(&server.url(), Duration::from_secs(2)).unwrap();
        assert!(matches!(backing.ping().await, Err(BackingError::Degraded(_))));
    }

    #[tokio::test]
    async fn test_http_backing_delete_reports_presence() {
        let mut server = mockito::Server::new_async().await;
        server.mock("DELETE", "/entries/abc").with_status(204).create_async().await;
        server.mock("DELETE", "/entries/gone").with_status(404).create_async().await;
        server.mock("DELETE", "/entries/oops").with_status(500).create_async().await;

        let backing = HttpBacking::new(&server.url(), Duration::from_secs(2)).unwrap();
        assert!(backing.delete("abc").await.unwrap());
        assert!(!backing.delete("gone").await.unwrap());
        assert!(matches!(backing.delete("oops").await, Err(BackingError::Degraded(_))));
    }

    #[test]
    fn test_only_corrupt_is_not_an_outage() {
        assert!(BackingError::Degraded("down".into()).is_outage());
        assert!(BackingError::Timeout(Duration::from_millis(5)).is_outage());
        assert!(!BackingError::Corrupt("bad json".into()).is_outage());
        assert_eq!(BackingError::Corrupt("x".into()).kind(), "corrupt");
    }
}
