// HTTP origin speaking GET <base>/v1/<id>
// Author: kelexine (https://github.com/kelexine)

use super::Origin;
use crate::cache::Blob;
use crate::config::OriginConfig;
use crate::transport::{HttpResponse, RequestOptions, ResilientHttpClient, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, LAST_MODIFIED};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
struct UploadResponse {
    id: String,
}

/// Origin reached over the shared resilient transport. Every call is gated
/// by the breaker keyed on this origin's name.
#[derive(Clone)]
pub struct HttpOrigin {
    name: String,
    base_url: String,
    timeout: Duration,
    client: ResilientHttpClient,
}

impl HttpOrigin {
    pub fn new(config: &OriginConfig, client: ResilientHttpClient) -> Self {
        Self {
            name: config.name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout(),
            client,
        }
    }

    fn blob_url(&self, id: &str) -> String {
        format!("{}/v1/{}", self.base_url, urlencoding::encode(id))
    }

    fn options(&self) -> RequestOptions {
        RequestOptions::upstream(&self.name).with_timeout(self.timeout)
    }

    fn unexpected(&self, response: &HttpResponse) -> TransportError {
        TransportError::InvalidResponse {
            upstream: self.name.clone(),
            message: format!("unexpected HTTP {}", response.status),
        }
    }
}

fn parse_last_modified(response: &HttpResponse) -> Option<DateTime<Utc>> {
    let raw = response.headers.get(LAST_MODIFIED)?.to_str().ok()?;
    DateTime::parse_from_rfc2822(raw).ok().map(|t| t.with_timezone(&Utc))
}

#[async_trait]
impl Origin for HttpOrigin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_blob(&self, id: &str, correlation_id: &str) -> Result<Option<Blob>, TransportError> {
        let response = self
            .client
            .get(&self.blob_url(id), self.options(), Some(correlation_id))
            .await?;

        if response.status == 404 || response.status == 410 {
            debug!(origin = %self.name, id, "Origin does not have content");
            return Ok(None);
        }
        if !response.is_success() {
            return Err(self.unexpected(&response));
        }

        let content_type = response.content_type().unwrap_or(DEFAULT_CONTENT_TYPE).to_string();
        let origin_timestamp = parse_last_modified(&response);

        Ok(Some(Blob {
            data: response.body,
            content_type,
            origin_timestamp,
        }))
    }

    async fn upload_blob(&self, data: Bytes, content_type: &str, correlation_id: &str) -> Result<String, TransportError> {
        let url = format!("{}/v1/blobs", self.base_url);
        let options = self
            .options()
            .with_header(CONTENT_TYPE.as_str(), content_type)
            .with_body(data);

        let response = self.client.put(&url, options, Some(correlation_id)).await?;
        if !response.is_success() {
            return Err(self.unexpected(&response));
        }

        let parsed: UploadResponse = serde_json::from_slice(&response.body).map_err(|e| TransportError::InvalidResponse {
            upstream: self.name.clone(),
            message: format!("bad upload response: {}", e),
        })?;
        Ok(parsed.id)
    }

    async fn health_check(&self) -> bool {
        // Not routed through the breaker: probes must not trip or be blocked by it.
        let url = format!("{}/health", self.base_url);
        let options = RequestOptions::default().with_timeout(self.timeout.min(HEALTH_TIMEOUT));

        match self.client.head(&url, options, None).await {
            Ok(response) => response.is_success(),
            Err(e) => {
                warn!(origin = %self.name, "Health check failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::metrics::MetricsRegistry;
    use crate::transport::TransportSettings;
    use std::sync::Arc;

    fn origin(base_url: &str) -> HttpOrigin {
        let client = ResilientHttpClient::new(
            TransportSettings::default(),
            BreakerConfig::default(),
            Arc::new(MetricsRegistry::default()),
        )
        .unwrap();
        HttpOrigin::new(&OriginConfig::new("primary", base_url), client)
    }

    #[tokio::test]
    async fn test_fetch_blob_reads_headers() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/abc123")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_header("last-modified", "Tue, 1 Jul 2025 10:52:37 +0000")
            .with_body(vec![1u8; 100])
            .create_async()
            .await;

        let blob = origin(&server.url()).fetch_blob("abc123", "corr").await.unwrap().unwrap();
        assert_eq!(blob.size(), 100);
        assert_eq!(blob.content_type, "image/png");
        assert!(blob.origin_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_fetch_blob_not_found_is_none() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/v1/missing").with_status(404).create_async().await;

        assert_eq!(origin(&server.url()).fetch_blob("missing", "corr").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upload_blob_returns_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/v1/blobs")
            .match_header("content-type", "text/plain")
            .match_header("x-correlation-id", "up-7")
            .match_body("hello")
            .with_status(201)
            .with_body(r#"{"id":"xyz789"}"#)
            .create_async()
            .await;

        let id = origin(&server.url())
            .upload_blob(Bytes::from_static(b"hello"), "text/plain", "up-7")
            .await
            .unwrap();
        assert_eq!(id, "xyz789");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_health_check() {
        let mut server = mockito::Server::new_async().await;
        server.mock("HEAD", "/health").with_status(200).create_async().await;
        assert!(origin(&server.url()).health_check().await);

        assert!(!origin("http://127.0.0.1:1").health_check().await);
    }
}
