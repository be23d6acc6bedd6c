//! Origin collaborators.
//!
//! An origin is an upstream service that is authoritative for content by id.
//! The gateway talks to a primary origin and an ordered list of fallbacks,
//! all through the [`Origin`] trait so the pipeline can be driven by any
//! implementation.
//!
//! Author: kelexine (<https://github.com/kelexine>)

mod http;

pub use http::HttpOrigin;

use crate::cache::Blob;
use crate::transport::TransportError;
use async_trait::async_trait;
use bytes::Bytes;

/// Fetch and upload calls carry the caller's correlation id so the origin's
/// logs can be joined with the inbound request.
#[async_trait]
pub trait Origin: Send + Sync {
    /// Logical name, also used as the breaker key and the `X-Source` value.
    fn name(&self) -> &str;

    /// `Ok(None)` means the origin answered and does not have the content.
    async fn fetch_blob(&self, id: &str, correlation_id: &str) -> Result<Option<Blob>, TransportError>;

    /// Stores `data` and returns the identifier assigned by the origin.
    async fn upload_blob(&self, data: Bytes, content_type: &str, correlation_id: &str) -> Result<String, TransportError>;

    async fn health_check(&self) -> bool;
}
