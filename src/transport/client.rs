// Resilient HTTP client with per-upstream circuit breaking
// Author: kelexine (https://github.com/kelexine)

use super::error::TransportError;
use crate::breaker::{BreakerConfig, BreakerError, BreakerRegistry, CircuitState, FailurePredicate};
use crate::config::PerformanceConfig;
use crate::metrics::MetricsRegistry;
use crate::utils::logging::sanitize_url;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, Method};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Transport pool settings.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub pool_max_idle_per_host: usize,
    /// Cap on concurrent in-flight requests per destination.
    pub max_connections_per_host: usize,
    pub pool_idle_timeout: Duration,
    pub connect_timeout: Duration,
    /// Applied when a request does not carry its own timeout.
    pub default_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self::from(&PerformanceConfig::default())
    }
}

impl From<&PerformanceConfig> for TransportSettings {
    fn from(config: &PerformanceConfig) -> Self {
        Self {
            pool_max_idle_per_host: config.connection_pool_size,
            max_connections_per_host: config.max_connections_per_host,
            pool_idle_timeout: Duration::from_secs(config.pool_idle_timeout_seconds),
            connect_timeout: Duration::from_secs(config.connect_timeout_seconds),
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Logical upstream; when set, the call goes through its breaker.
    pub upstream: Option<String>,
    pub timeout: Option<Duration>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl RequestOptions {
    pub fn upstream(name: impl Into<String>) -> Self {
        Self {
            upstream: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// A fully-read upstream response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

/// What a single attempt produced, as seen by the breaker.
#[derive(Error, Debug)]
enum CallFailure {
    /// 4xx: handed back to the caller as a normal response.
    #[error("client error status {}", .0.status)]
    ClientStatus(HttpResponse),

    #[error(transparent)]
    Transport(TransportError),
}

/// 4xx responses and non-qualifying transport errors are always expected;
/// everything else is left to `user`.
fn with_client_errors_expected(user: FailurePredicate) -> FailurePredicate {
    Arc::new(move |err: &(dyn StdError + 'static)| match err.downcast_ref::<CallFailure>() {
        Some(CallFailure::ClientStatus(_)) => true,
        Some(CallFailure::Transport(inner)) => {
            if !inner.is_qualifying() {
                return true;
            }
            let inner: &(dyn StdError + 'static) = inner;
            user(inner)
        }
        None => user(err),
    })
}

/// Pooled HTTP transport.
///
/// Timeouts and connection failures surface as typed [`TransportError`]s,
/// 5xx responses are errors, 4xx responses are returned normally. Calls
/// naming an upstream are gated by that upstream's circuit breaker.
///
/// reqwest only bounds idle connections, so each destination
/// (`scheme://host:port`) also gets a semaphore of
/// `max_connections_per_host` slots. A slot is held from before the request
/// is sent until its body has been read. Slots are taken inside the breaker,
/// so a rejected call never queues, and the wait for a slot is charged to
/// the request's own timeout.
#[derive(Clone)]
pub struct ResilientHttpClient {
    http_client: Client,
    settings: TransportSettings,
    breakers: Arc<BreakerRegistry>,
    slots: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
    metrics: Arc<MetricsRegistry>,
}

impl ResilientHttpClient {
    pub fn new(
        settings: TransportSettings,
        breaker_config: BreakerConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self, TransportError> {
        // Configure HTTP client for connection reuse against a small set of origins
        let http_client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .pool_idle_timeout(settings.pool_idle_timeout)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .user_agent(concat!("blobgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("Failed to create HTTP client: {}", e)))?;

        debug!("Created HTTP client with connection pooling and keep-alive");

        let predicate = with_client_errors_expected(breaker_config.is_expected_failure.clone());
        let breaker_config = breaker_config.with_expected_failure(predicate);

        let listener_metrics = metrics.clone();
        let breakers = BreakerRegistry::new(breaker_config).with_listener(Arc::new(move |name: &str, state: CircuitState| {
            listener_metrics.record_circuit_state(name, state.as_str(), state.level());
        }));

        Ok(Self {
            http_client,
            settings,
            breakers: Arc::new(breakers),
            slots: Arc::new(Mutex::new(HashMap::new())),
            metrics,
        })
    }

    /// Breakers for every upstream this client has talked to.
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub async fn get(&self, url: &str, options: RequestOptions, correlation_id: Option<&str>) -> Result<HttpResponse, TransportError> {
        self.send(Method::GET, url, options, correlation_id).await
    }

    pub async fn post(&self, url: &str, options: RequestOptions, correlation_id: Option<&str>) -> Result<HttpResponse, TransportError> {
        self.send(Method::POST, url, options, correlation_id).await
    }

    pub async fn put(&self, url: &str, options: RequestOptions, correlation_id: Option<&str>) -> Result<HttpResponse, TransportError> {
        self.send(Method::PUT, url, options, correlation_id).await
    }

    pub async fn head(&self, url: &str, options: RequestOptions, correlation_id: Option<&str>) -> Result<HttpResponse, TransportError> {
        self.send(Method::HEAD, url, options, correlation_id).await
    }

    pub async fn send(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
        correlation_id: Option<&str>,
    ) -> Result<HttpResponse, TransportError> {
        let correlation_id = correlation_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let timeout = options.timeout.unwrap_or(self.settings.default_timeout);
        let label = options.upstream.clone().unwrap_or_else(|| host_label(url));
        let started = Instant::now();

        debug!(
            correlation_id = %correlation_id,
            upstream = %label,
            "{} {}",
            method,
            sanitize_url(url)
        );

        let attempt = || self.attempt(method, url, &label, timeout, &options, &correlation_id);

        let result = match &options.upstream {
            Some(upstream) => {
                let breaker = self.breakers.get_or_create(upstream);
                match breaker.execute(attempt).await {
                    Ok(response) => Ok(response),
                    Err(BreakerError::Open { retry_after, .. }) => Err(TransportError::CircuitOpen {
                        upstream: upstream.clone(),
                        retry_after,
                    }),
                    Err(BreakerError::Inner(CallFailure::ClientStatus(response))) => Ok(response),
                    Err(BreakerError::Inner(CallFailure::Transport(e))) => Err(e),
                }
            }
            None => match attempt().await {
                Ok(response) | Err(CallFailure::ClientStatus(response)) => Ok(response),
                Err(CallFailure::Transport(e)) => Err(e),
            },
        };

        let outcome = match &result {
            Ok(r) if r.is_client_error() => "client_error",
            Ok(_) => "ok",
            Err(e) => e.outcome(),
        };
        self.metrics.record_upstream_request(&label, outcome, started.elapsed());

        if let Err(e) = &result {
            warn!(correlation_id = %correlation_id, upstream = %label, "Upstream call failed: {}", e);
        }

        result
    }

    fn slot(&self, url: &str) -> Arc<Semaphore> {
        let permits = self.settings.max_connections_per_host.clamp(1, Semaphore::MAX_PERMITS);
        self.slots
            .lock()
            .entry(destination_key(url))
            .or_insert_with(|| Arc::new(Semaphore::new(permits)))
            .clone()
    }

    /// Waits for a connection slot, returning it with the time left of
    /// `timeout`.
    async fn acquire_slot(
        &self,
        url: &str,
        label: &str,
        timeout: Duration,
    ) -> Result<(OwnedSemaphorePermit, Duration), TransportError> {
        let timed_out = || TransportError::Timeout {
            upstream: label.to_string(),
            timeout,
        };
        let slot = self.slot(url);
        if slot.available_permits() == 0 {
            debug!(upstream = %label, "All connection slots busy, waiting");
        }

        let started = Instant::now();
        let permit = match tokio::time::timeout(timeout, slot.acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(TransportError::InvalidRequest("connection slots closed".to_string())),
            Err(_) => return Err(timed_out()),
        };

        let remaining = timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(timed_out());
        }
        Ok((permit, remaining))
    }

    async fn attempt(
        &self,
        method: Method,
        url: &str,
        label: &str,
        timeout: Duration,
        options: &RequestOptions,
        correlation_id: &str,
    ) -> Result<HttpResponse, CallFailure> {
        // Held until the body is read.
        let (_permit, remaining) = self
            .acquire_slot(url, label, timeout)
            .await
            .map_err(CallFailure::Transport)?;

        let mut request = self
            .http_client
            .request(method, url)
            .timeout(remaining)
            .header(CORRELATION_HEADER, correlation_id);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            request = request.body(body.clone());
        }

        let response = request
            .send()
            .await
            .map_err(|e| CallFailure::Transport(TransportError::from_reqwest(label, timeout, e)))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| CallFailure::Transport(TransportError::from_reqwest(label, timeout, e)))?;

        let response = HttpResponse { status, headers, body };
        if status >= 500 {
            Err(CallFailure::Transport(TransportError::Status {
                upstream: label.to_string(),
                status,
            }))
        } else if response.is_client_error() {
            Err(CallFailure::ClientStatus(response))
        } else {
            Ok(response)
        }
    }
}

/// Connection pools are per `scheme://host:port`, so slots are too.
fn destination_key(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(u) => format!(
            "{}://{}:{}",
            u.scheme(),
            u.host_str().unwrap_or("unknown"),
            u.port_or_known_default().unwrap_or(0)
        ),
        Err(_) => host_label(url),
    }
}

fn host_label(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}
