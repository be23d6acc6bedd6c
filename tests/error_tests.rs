// Error handling tests
// Author: kelexine (https://github.com/kelexine)

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use blobgate::error::GatewayError;
use blobgate::transport::TransportError;
use std::time::Duration;

#[test]
fn test_error_display_messages() {
    let errors = vec![
        GatewayError::InvalidIdentifier("a/b".to_string()),
        GatewayError::NotFound("abc123".to_string()),
        GatewayError::upstream_unavailable("all origins failed", None),
        GatewayError::Config("bad port".to_string()),
        GatewayError::Internal("boom".to_string()),
    ];

    for error in errors {
        let display = format!("{}", error);
        assert!(!display.is_empty(), "Error should have display message");
    }
}

#[test]
fn test_status_and_code_mapping() {
    let cases = [
        (GatewayError::InvalidIdentifier("x y".into()), StatusCode::BAD_REQUEST, "invalid_identifier"),
        (GatewayError::NotFound("abc".into()), StatusCode::NOT_FOUND, "not_found"),
        (
            GatewayError::upstream_unavailable("down", None),
            StatusCode::SERVICE_UNAVAILABLE,
            "upstream_unavailable",
        ),
        (GatewayError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    ];

    for (error, status, code) in cases {
        assert_eq!(error.status(), status);
        assert_eq!(error.code(), code);
    }
}

#[test]
fn test_only_invalid_identifier_is_permanent() {
    assert!(!GatewayError::InvalidIdentifier("..".into()).is_retryable());
    assert!(GatewayError::NotFound("abc".into()).is_retryable());
    assert!(GatewayError::upstream_unavailable("down", None).is_retryable());
}

#[test]
fn test_body_shape() {
    let err = GatewayError::upstream_unavailable("down", Some(Duration::from_millis(12_300)));
    let json = serde_json::to_value(err.to_body()).unwrap();

    assert_eq!(json["error"]["code"], "upstream_unavailable");
    assert_eq!(json["error"]["status"], 503);
    assert_eq!(json["error"]["retry_after"], 13);
    assert!(json["error"]["timestamp"].is_string());

    let json = serde_json::to_value(GatewayError::NotFound("abc".into()).to_body()).unwrap();
    assert!(json["error"].get("retry_after").is_none());
}

#[test]
fn test_internal_message_masked() {
    let err = GatewayError::Io(std::io::Error::new(std::io::ErrorKind::Other, "/var/secret"));
    assert!(!err.public_message().contains("/var/secret"));

    let err = GatewayError::NotFound("abc123".into());
    assert!(err.public_message().contains("abc123"));
}

#[test]
fn test_retry_after_header() {
    let response = GatewayError::upstream_unavailable("down", Some(Duration::from_secs(30))).into_response();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "30");

    let response = GatewayError::NotFound("abc".into()).into_response();
    assert!(response.headers().get(header::RETRY_AFTER).is_none());
}

#[test]
fn test_from_transport_error() {
    let err: GatewayError = TransportError::CircuitOpen {
        upstream: "primary".into(),
        retry_after: Duration::from_secs(7),
    }
    .into();
    assert_eq!(err.code(), "upstream_unavailable");
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));

    let err: GatewayError = TransportError::Timeout {
        upstream: "primary".into(),
        timeout: Duration::from_secs(1),
    }
    .into();
    assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(err.retry_after().is_none());

    let err: GatewayError = TransportError::InvalidRequest("bad header".into()).into();
    assert_eq!(err.code(), "internal_error");
}
