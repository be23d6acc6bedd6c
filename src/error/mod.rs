// Error types for the blobgate gateway
// Author: kelexine (https://github.com/kelexine)

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid content identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Content not found: {0}")]
    NotFound(String),

    #[error("Upstream unavailable: {message}")]
    UpstreamUnavailable {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parsing error: {0}")]
    ConfigParsing(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn upstream_unavailable(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        GatewayError::UpstreamUnavailable {
            message: message.into(),
            retry_after,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidIdentifier(_) => "invalid_identifier",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::UpstreamUnavailable { .. } => "upstream_unavailable",
            GatewayError::Config(_) | GatewayError::ConfigParsing(_) => "configuration_error",
            GatewayError::Io(_) | GatewayError::Json(_) | GatewayError::Internal(_) => {
                "internal_error"
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::UpstreamUnavailable { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Only invalid-identifier errors are permanent for the caller.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GatewayError::InvalidIdentifier(_))
    }

    /// Message safe to hand to clients. Internal faults are masked.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::InvalidIdentifier(_)
            | GatewayError::NotFound(_)
            | GatewayError::UpstreamUnavailable { .. } => self.to_string(),
            _ => "An internal error occurred".to_string(),
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                status: self.status().as_u16(),
                message: self.public_message(),
                timestamp: Utc::now().to_rfc3339(),
                retry_after: self.retry_after().map(retry_after_secs),
            },
        }
    }
}

impl From<crate::transport::TransportError> for GatewayError {
    fn from(err: crate::transport::TransportError) -> Self {
        use crate::transport::TransportError;
        match err {
            TransportError::InvalidRequest(message) => GatewayError::Internal(message),
            other => GatewayError::upstream_unavailable(other.to_string(), other.retry_after()),
        }
    }
}

/// Externally visible error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub status: u16,
    pub message: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Whole seconds, rounded up so a hint never reads as "retry now".
fn retry_after_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

// Convert GatewayError to HTTP responses for Axum
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            tracing::error!(code = self.code(), "Request failed: {}", self);
        }

        let status = self.status();
        let retry_after = self.retry_after().map(retry_after_secs);
        let mut response = (status, axum::Json(self.to_body())).into_response();

        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_secs(30)), 30);
        assert_eq!(retry_after_secs(Duration::from_millis(29_001)), 30);
        assert_eq!(retry_after_secs(Duration::ZERO), 0);
    }

    #[test]
    fn test_internal_details_masked() {
        let err = GatewayError::Internal("connect to http://10.0.0.3:9000 failed".to_string());
        let body = err.to_body();
        assert_eq!(body.error.code, "internal_error");
        assert!(!body.error.message.contains("10.0.0.3"));
    }
}
