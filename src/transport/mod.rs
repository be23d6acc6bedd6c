// Outbound HTTP transport module
// Author: kelexine (https://github.com/kelexine)

mod client;
mod error;

pub use client::{HttpResponse, RequestOptions, ResilientHttpClient, TransportSettings, CORRELATION_HEADER};
pub use error::TransportError;
