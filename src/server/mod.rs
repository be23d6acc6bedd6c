//! Axum-based HTTP surface for the blobgate gateway.
//!
//! A thin adapter over the fetch pipeline: content retrieval with cache
//! headers, pin/unpin/evict administration, metrics exposition, analytics
//! reads and health. Requests are assumed to be authorized upstream.
//!
//! # Components
//!
//! - `handlers`: Implementation of individual endpoints.
//! - `middleware`: Request ID layers and per-route request metrics.
//! - `routes`: The router that ties everything together.
//!
//! Author: kelexine (<https://github.com/kelexine>)

mod handlers;
mod middleware;
mod routes;

pub use handlers::{HealthStatus, PinResponse, StatsResponse, UploadResponse};
pub use routes::{create_router, AppState};
