// Transport error types
// Author: kelexine (https://github.com/kelexine)

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("request to '{upstream}' timed out after {timeout:?}")]
    Timeout { upstream: String, timeout: Duration },

    #[error("network error talking to '{upstream}': {message}")]
    Network { upstream: String, message: String },

    #[error("'{upstream}' responded with HTTP {status}")]
    Status { upstream: String, status: u16 },

    #[error("circuit for '{upstream}' is open, retry in {retry_after:?}")]
    CircuitOpen { upstream: String, retry_after: Duration },

    #[error("invalid response from '{upstream}': {message}")]
    InvalidResponse { upstream: String, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Failures that count against the upstream's health.
    pub fn is_qualifying(&self) -> bool {
        match self {
            TransportError::Timeout { .. } | TransportError::Network { .. } => true,
            TransportError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Time until the upstream may be tried again, when known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Short label for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            TransportError::Timeout { .. } => "timeout",
            TransportError::Network { .. } => "network",
            TransportError::Status { .. } => "server_error",
            TransportError::CircuitOpen { .. } => "rejected",
            TransportError::InvalidResponse { .. } => "invalid_response",
            TransportError::InvalidRequest(_) => "invalid_request",
        }
    }

    pub(crate) fn from_reqwest(upstream: &str, timeout: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout {
                upstream: upstream.to_string(),
                timeout,
            }
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else if err.is_decode() {
            TransportError::InvalidResponse {
                upstream: upstream.to_string(),
                message: err.to_string(),
            }
        } else {
            // Strip the URL so origin addresses never travel in error text.
            TransportError::Network {
                upstream: upstream.to_string(),
                message: err.without_url().to_string(),
            }
        }
    }
}
