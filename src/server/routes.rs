// HTTP routes configuration
// Author: kelexine (https://github.com/kelexine)

use super::handlers::{
    content_handler, content_stats_handler, evict_handler, health_handler, metrics_handler,
    metrics_snapshot_handler, pin_handler, stats_handler, top_handler, unpin_handler, upload_handler,
};
use super::middleware::{request_id_layers, track_requests};
use crate::error::Result;
use crate::gateway::Gateway;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Shared handler state: the fully wired gateway.
pub type AppState = Gateway;

/// Upload bodies above this are rejected before reaching the origin.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

pub fn create_router(gateway: Gateway) -> Result<Router> {
    let (set_request_id, propagate_request_id) = request_id_layers();

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/metrics/snapshot", get(metrics_snapshot_handler))
        .route("/stats", get(stats_handler))
        .route("/stats/top", get(top_handler))
        .route("/stats/:id", get(content_stats_handler))
        .route("/v1", post(upload_handler))
        .route("/v1/:id", get(content_handler).delete(evict_handler))
        .route("/v1/:id/pin", post(pin_handler).delete(unpin_handler))
        // Replace axum's 2 MiB extractor default with the upload bound.
        .layer(DefaultBodyLimit::disable())
        .layer(tower_http::limit::RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES))
        .route_layer(middleware::from_fn_with_state(gateway.clone(), track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(propagate_request_id)
        .layer(set_request_id)
        .with_state(gateway);

    Ok(app)
}
