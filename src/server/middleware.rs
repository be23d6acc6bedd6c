// HTTP middleware
// Author: kelexine (https://github.com/kelexine)

use crate::gateway::Gateway;
use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

pub const HTTP_REQUESTS: &str = "http_requests_total";
pub const HTTP_REQUEST: &str = "http_request";

/// Create request ID layers for the application
pub fn request_id_layers() -> (SetRequestIdLayer<MakeRequestUuid>, PropagateRequestIdLayer) {
    (
        SetRequestIdLayer::x_request_id(MakeRequestUuid),
        PropagateRequestIdLayer::x_request_id(),
    )
}

/// Counts requests and observes latency per matched route and status.
pub async fn track_requests(State(gateway): State<Gateway>, request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().as_str().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    let labels = [("method", method.as_str()), ("route", route.as_str()), ("status", status.as_str())];
    gateway.metrics.counter(HTTP_REQUESTS, 1.0, &labels);
    gateway
        .metrics
        .observe_duration(HTTP_REQUEST, started.elapsed(), &[("route", route.as_str())]);

    response
}
