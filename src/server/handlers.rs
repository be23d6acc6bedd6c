// HTTP request handlers
// Author: kelexine (https://github.com/kelexine)

use crate::analytics::{ContentStats, GlobalStats};
use crate::breaker::{BreakerSnapshot, CircuitState};
use crate::cache::CacheStats;
use crate::error::{GatewayError, Result};
use crate::fetch::{validate_id, FetchOutcome};
use crate::gateway::Gateway;
use crate::metrics::MetricsSnapshot;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_CACHE_DATE: HeaderName = HeaderName::from_static("x-cache-date");
pub const X_TTL: HeaderName = HeaderName::from_static("x-ttl");
pub const X_FETCH_TIME: HeaderName = HeaderName::from_static("x-fetch-time");
pub const X_SOURCE: HeaderName = HeaderName::from_static("x-source");
pub const X_GEO_REGION: &str = "x-geo-region";
pub const X_REQUEST_ID: &str = "x-request-id";

const DEFAULT_TOP_K: usize = 10;
const MAX_TOP_K: usize = 1000;

fn header_value(value: impl AsRef<str>) -> HeaderValue {
    HeaderValue::from_str(value.as_ref()).unwrap_or_else(|_| HeaderValue::from_static("invalid"))
}

/// Non-empty value of a request header.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn content_response(outcome: FetchOutcome) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, header_value(&outcome.content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(outcome.size));

    if outcome.hit {
        headers.insert(X_CACHE, HeaderValue::from_static("HIT"));
        headers.insert(X_CACHE_DATE, header_value(outcome.cached_at.to_rfc2822()));
        let ttl = match outcome.ttl_remaining {
            Some(remaining) => header_value(remaining.as_secs().to_string()),
            None => HeaderValue::from_static("pinned"),
        };
        headers.insert(X_TTL, ttl);
    } else {
        headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
        headers.insert(X_FETCH_TIME, HeaderValue::from(outcome.fetch_time.as_millis() as u64));
        headers.insert(X_SOURCE, header_value(&outcome.source));
    }

    (StatusCode::OK, headers, outcome.data).into_response()
}

/// GET /v1/:id
pub async fn content_handler(
    State(gateway): State<Gateway>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let region = header_str(&headers, X_GEO_REGION);
    // Set by the request-id layer; forwarded to origins as the correlation id.
    let request_id = header_str(&headers, X_REQUEST_ID);

    let outcome = gateway.orchestrator.fetch_from_region(&id, region, request_id).await?;
    Ok(content_response(outcome))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PinResponse {
    pub id: String,
    pub pinned: bool,
}

/// POST /v1/:id/pin
pub async fn pin_handler(State(gateway): State<Gateway>, Path(id): Path<String>) -> Result<Json<PinResponse>> {
    if !gateway.orchestrator.pin(&id).await? {
        return Err(GatewayError::NotFound(id));
    }
    Ok(Json(PinResponse { id, pinned: true }))
}

/// DELETE /v1/:id/pin
pub async fn unpin_handler(State(gateway): State<Gateway>, Path(id): Path<String>) -> Result<Json<PinResponse>> {
    if !gateway.orchestrator.unpin(&id).await? {
        return Err(GatewayError::NotFound(id));
    }
    Ok(Json(PinResponse { id, pinned: false }))
}

/// DELETE /v1/:id
pub async fn evict_handler(State(gateway): State<Gateway>, Path(id): Path<String>) -> Result<StatusCode> {
    if gateway.orchestrator.evict(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(GatewayError::NotFound(id))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: String,
}

/// POST /v1
pub async fn upload_handler(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");

    let request_id = header_str(&headers, X_REQUEST_ID);
    let id = gateway.orchestrator.upload(body, content_type, request_id).await?;
    Ok((StatusCode::CREATED, Json(UploadResponse { id })))
}

/// GET /metrics
pub async fn metrics_handler(State(gateway): State<Gateway>) -> impl IntoResponse {
    let stats = gateway.cache.stats();
    gateway.metrics.update_cache_size(stats.entry_count, stats.total_size_bytes);

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gateway.metrics.render(),
    )
}

/// GET /metrics/snapshot
pub async fn metrics_snapshot_handler(State(gateway): State<Gateway>) -> Json<MetricsSnapshot> {
    Json(gateway.metrics.snapshot())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub global: GlobalStats,
    pub cache: CacheStats,
}

/// GET /stats
pub async fn stats_handler(State(gateway): State<Gateway>) -> Json<StatsResponse> {
    Json(StatsResponse {
        global: gateway.analytics.get_global_stats(),
        cache: gateway.cache.stats(),
    })
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    pub k: Option<usize>,
}

/// GET /stats/top?k=
pub async fn top_handler(State(gateway): State<Gateway>, Query(query): Query<TopQuery>) -> Json<Vec<ContentStats>> {
    let k = query.k.unwrap_or(DEFAULT_TOP_K).min(MAX_TOP_K);
    Json(gateway.analytics.top_n(k))
}

/// GET /stats/:id
pub async fn content_stats_handler(
    State(gateway): State<Gateway>,
    Path(id): Path<String>,
) -> Result<Json<ContentStats>> {
    validate_id(&id)?;
    gateway
        .analytics
        .get_stats(&id)
        .map(Json)
        .ok_or(GatewayError::NotFound(id))
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct OriginHealth {
    pub name: String,
    pub healthy: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub cache: CacheStats,
    pub breakers: Vec<BreakerSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origins: Option<Vec<OriginHealth>>,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct HealthQuery {
    /// Also probe every origin's health endpoint.
    #[serde(default)]
    pub deep: bool,
}

/// GET /health
pub async fn health_handler(State(gateway): State<Gateway>, Query(query): Query<HealthQuery>) -> Json<HealthResponse> {
    let backing_ok = !gateway.cache.has_backing() || gateway.cache.probe().await;
    let cache = gateway.cache.stats();
    let breakers = gateway.breakers().snapshot();

    let origin_names: Vec<String> = gateway.orchestrator.origins().map(|o| o.name().to_string()).collect();
    let open = breakers
        .iter()
        .filter(|b| b.state == CircuitState::Open && origin_names.contains(&b.name))
        .count();

    let origins = if query.deep {
        let checks = gateway.orchestrator.origin_health().await;
        Some(
            checks
                .into_iter()
                .map(|(name, healthy)| OriginHealth { name, healthy })
                .collect::<Vec<_>>(),
        )
    } else {
        None
    };
    let any_origin_down = origins
        .as_ref()
        .map(|o| o.iter().any(|check| !check.healthy))
        .unwrap_or(false);

    let status = if open == origin_names.len() {
        HealthStatus::Unhealthy
    } else if open > 0 || any_origin_down || !backing_ok {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };
    debug!(?status, open_breakers = open, "Health check");

    Json(HealthResponse {
        status,
        cache,
        breakers,
        origins,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
