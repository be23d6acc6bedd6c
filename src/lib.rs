// blobgate - Caching gateway for content-addressed blob storage
// Author: kelexine (https://github.com/kelexine)

pub mod analytics;
pub mod breaker;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gateway;
pub mod metrics;
pub mod origin;
pub mod server;
pub mod transport;
pub mod utils;
