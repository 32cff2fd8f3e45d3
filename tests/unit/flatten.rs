//! Unit tests for chunking and request flattening

use api_replicator::config::{RequestSpec, TimeseriesSpec};
use api_replicator::pipeline::RateLimiter;
use api_replicator::request::{flatten, flatten_all, join_url, FlattenError};
use api_replicator::timeseries::{split, TimeLayout};
use chrono::{DateTime, Duration as ChronoDuration};
use std::sync::Arc;
use std::time::Duration;

fn limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(10, Duration::from_secs(1)))
}

fn hourly(start: &str, end: &str) -> RequestSpec {
    RequestSpec::get("/products/BTC-USD/candles")
        .with_query("start", start)
        .with_query("end", end)
        .with_timeseries(TimeseriesSpec {
            start_name: "start".to_string(),
            end_name: "end".to_string(),
            period: 3600,
            layout: None,
        })
}

#[test]
fn test_chunks_tile_range_exactly() {
    let start = DateTime::parse_from_rfc3339("2023-01-01T00:00:00Z").unwrap();
    let end = DateTime::parse_from_rfc3339("2023-01-01T03:30:00Z").unwrap();
    let period = ChronoDuration::seconds(3600);

    let chunks = split(start, end, period);
    assert_eq!(chunks.len(), 4);
    assert_eq!(chunks.first().unwrap().start, start);
    assert_eq!(chunks.last().unwrap().end, end);
    for pair in chunks.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
        assert_eq!(pair[0].duration(), period);
    }
    assert_eq!(chunks[3].duration(), ChronoDuration::seconds(1800));
}

#[test]
fn test_empty_or_inverted_range_yields_nothing() {
    let t = DateTime::parse_from_rfc3339("2023-01-01T00:00:00Z").unwrap();
    assert!(split(t, t, ChronoDuration::seconds(60)).is_empty());
    assert!(split(t + ChronoDuration::seconds(1), t, ChronoDuration::seconds(60)).is_empty());
}

#[test]
fn test_spec_without_timeseries_is_one_request() {
    let spec = RequestSpec::get("/products").with_query("limit", "100");
    let requests = flatten(&spec, "https://api.example.com", &limiter()).unwrap();

    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url().as_str(), "https://api.example.com/products?limit=100");
}

#[test]
fn test_k_periods_flatten_to_k_requests() {
    let spec = hourly("2023-01-01T00:00:00Z", "2023-01-01T05:00:00Z");
    let requests = flatten(&spec, "https://api.exchange.coinbase.com", &limiter()).unwrap();
    assert_eq!(requests.len(), 5);

    // The request spec is left untouched
    assert_eq!(spec.query["end"], "2023-01-01T05:00:00Z");
}

#[test]
fn test_every_request_shares_the_limiter() {
    let limiter = limiter();
    let specs = vec![
        hourly("2023-01-01T00:00:00Z", "2023-01-01T02:00:00Z"),
        RequestSpec::get("/time"),
    ];
    let requests = flatten_all(&specs, "https://api.example.com", &limiter).unwrap();

    assert_eq!(requests.len(), 3);
    assert!(requests
        .iter()
        .all(|r| Arc::ptr_eq(r.rate_limiter(), &limiter)));
}

#[test]
fn test_custom_layout_round_trips() {
    let spec = RequestSpec::get("/trades")
        .with_query("from", "2023-01-01")
        .with_query("to", "2023-01-03")
        .with_timeseries(TimeseriesSpec {
            start_name: "from".to_string(),
            end_name: "to".to_string(),
            period: 86400,
            layout: Some("%Y-%m-%d".to_string()),
        });
    let requests = flatten(&spec, "https://api.example.com", &limiter()).unwrap();

    assert_eq!(requests.len(), 2);
    assert!(requests[0].url().as_str().contains("from=2023-01-01"));
    assert!(requests[0].url().as_str().contains("to=2023-01-02"));
    assert!(requests[1].url().as_str().contains("to=2023-01-03"));

    let layout = TimeLayout::Pattern("%Y-%m-%d".to_string());
    assert!(layout.parse("2023-01-01").is_ok());
}

#[test]
fn test_url_construction_errors() {
    assert!(matches!(
        join_url("not a url", "/x"),
        Err(FlattenError::UrlConstruction { .. })
    ));
    assert!(matches!(
        join_url("https://api.example.com", "https://evil.example.com/x"),
        Err(FlattenError::UrlConstruction { .. })
    ));
    assert!(matches!(
        join_url("https://api.example.com", "/a/../b"),
        Err(FlattenError::UrlConstruction { .. })
    ));
}
