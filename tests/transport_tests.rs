// Resilient transport tests - per-destination connection cap and correlation ids
// Author: kelexine (https://github.com/kelexine)

use blobgate::breaker::BreakerConfig;
use blobgate::metrics::MetricsRegistry;
use blobgate::transport::{RequestOptions, ResilientHttpClient, TransportError, TransportSettings, CORRELATION_HEADER};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

fn client(max_connections_per_host: usize) -> ResilientHttpClient {
    let settings = TransportSettings {
        max_connections_per_host,
        ..TransportSettings::default()
    };
    ResilientHttpClient::new(settings, BreakerConfig::default(), Arc::new(MetricsRegistry::default())).unwrap()
}

/// Accepts connections and never writes a byte. Returns the base URL and a
/// count of accepted sockets.
async fn silent_listener() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(socket);
        }
    });

    (format!("http://{}", addr), accepted)
}

#[tokio::test]
async fn test_concurrent_sockets_capped_per_destination() {
    let (base, accepted) = silent_listener().await;
    let client = client(4);

    let mut handles = Vec::new();
    for i in 0..12 {
        let client = client.clone();
        let url = format!("{}/v1/blob{}", base, i);
        handles.push(tokio::spawn(async move {
            let options = RequestOptions::upstream("silent").with_timeout(Duration::from_secs(10));
            client.get(&url, options, None).await
        }));
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    let opened = accepted.load(Ordering::SeqCst);
    assert!(opened > 0, "requests reached the listener");
    assert!(opened <= 4, "opened {} sockets with a cap of 4", opened);

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_slot_wait_counts_against_timeout() {
    let (base, _) = silent_listener().await;
    let client = client(1);

    let holder = {
        let client = client.clone();
        let url = format!("{}/v1/held", base);
        tokio::spawn(async move {
            let options = RequestOptions::default().with_timeout(Duration::from_secs(10));
            client.get(&url, options, None).await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let options = RequestOptions::default().with_timeout(Duration::from_millis(200));
    let result = client.get(&format!("{}/v1/queued", base), options, None).await;

    assert!(matches!(result, Err(TransportError::Timeout { .. })));
    assert!(started.elapsed() < Duration::from_secs(2));
    holder.abort();
}

#[tokio::test]
async fn test_correlation_id_is_forwarded() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/abc")
        .match_header(CORRELATION_HEADER, "req-42")
        .with_status(200)
        .create_async()
        .await;

    let response = client(4)
        .get(&format!("{}/v1/abc", server.url()), RequestOptions::upstream("primary"), Some("req-42"))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    mock.assert_async().await;
}
