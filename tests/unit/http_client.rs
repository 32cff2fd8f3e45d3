//! Unit tests for the HTTP client against a local socket server

use api_replicator::config::{ApiKey, Authentication};
use api_replicator::fetcher::{ApiClient, Connector, FetchError, HttpApiClient, HttpConnector};
use api_replicator::pipeline::RateLimiter;
use reqwest::{Client, Method, Url};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve canned `(status, body)` responses in order, one per connection.
/// Returns the base URL and the raw request heads received.
async fn serve(responses: Vec<(u16, &'static str)>) -> (Url, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let requests = seen.clone();

    tokio::spawn(async move {
        for (status, body) in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut head = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                head.extend_from_slice(&buf[..n]);
                if n == 0 || head.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            requests
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(&head).to_string());

            let response = format!(
                "HTTP/1.1 {status} Status\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
    });

    let url = Url::parse(&format!("http://{addr}/products/BTC-USD/candles")).unwrap();
    (url, seen)
}

fn limiter() -> RateLimiter {
    RateLimiter::new(10, Duration::from_secs(1))
}

#[tokio::test]
async fn test_success_returns_body() {
    let (url, seen) = serve(vec![(200, "[1,2,3]")]).await;
    let client = HttpApiClient::new(Client::new()).with_max_retries(0);

    let body = client.fetch(&Method::GET, &url, &limiter()).await.unwrap();

    assert_eq!(&body[..], b"[1,2,3]");
    assert!(seen.lock().unwrap()[0].starts_with("GET /products/BTC-USD/candles"));
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let (url, seen) = serve(vec![(404, "missing"), (200, "ok")]).await;
    let client = HttpApiClient::new(Client::new()).with_max_retries(3);

    let result = client.fetch(&Method::GET, &url, &limiter()).await;

    match result {
        Err(FetchError::ClientError { status, body, .. }) => {
            assert_eq!(status, 404);
            assert_eq!(body, "missing");
        }
        other => panic!("expected client error, got {other:?}"),
    }
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_server_error_without_retries() {
    let (url, _seen) = serve(vec![(500, "boom")]).await;
    let client = HttpApiClient::new(Client::new()).with_max_retries(0);

    let result = client.fetch(&Method::GET, &url, &limiter()).await;

    assert!(matches!(result, Err(FetchError::HttpError(_))));
}

#[tokio::test]
async fn test_retry_draws_a_fresh_token() {
    let (url, seen) = serve(vec![(503, "busy"), (200, "done")]).await;
    let client = HttpApiClient::new(Client::new()).with_max_retries(1);
    let limiter = RateLimiter::new(2, Duration::from_secs(3600));

    let body = client.fetch(&Method::GET, &url, &limiter).await.unwrap();

    assert_eq!(&body[..], b"done");
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert_eq!(limiter.available().await, 1);
}

#[tokio::test]
async fn test_connector_sends_api_key_headers() {
    let (url, seen) = serve(vec![(200, "{}")]).await;
    let auth = Authentication {
        api_key: Some(ApiKey {
            key: "my-key".to_string(),
            passphrase: "my-pass".to_string(),
            header: Some("CB-ACCESS-KEY".to_string()),
            passphrase_header: None,
        }),
        ..Authentication::default()
    };

    let client = HttpConnector::new()
        .with_max_retries(0)
        .connect(url.as_str(), &auth)
        .await
        .unwrap();
    client.fetch(&Method::GET, &url, &limiter()).await.unwrap();

    let head = seen.lock().unwrap()[0].to_lowercase();
    assert!(head.contains("cb-access-key: my-key"));
    assert!(head.contains("x-api-passphrase: my-pass"));
    assert!(head.contains("user-agent: api-replicator/"));
}
