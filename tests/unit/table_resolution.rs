//! Unit tests for table resolution and the transform registry

use api_replicator::pipeline::RawResponseJob;
use api_replicator::transform::{
    EncodingError, PayloadTransform, ResolvedPayload, TableResolver, TransformRegistry,
};
use bytes::Bytes;
use reqwest::Url;
use std::sync::Arc;

const CANDLES: &str = "[[1672531200, 1.0, 2.0, 1.5, 1.75, 10]]";

fn job(url: &str, table: Option<&str>) -> RawResponseJob {
    RawResponseJob::new(
        Bytes::from_static(CANDLES.as_bytes()),
        Url::parse(url).unwrap(),
        table.map(str::to_string),
    )
}

#[test]
fn test_default_table_is_last_path_segment() {
    let resolver = TableResolver::new(Arc::new(TransformRegistry::new()));
    let resolved = resolver
        .resolve(&job("https://api.exchange.coinbase.com/products/BTC-USD/candles", None))
        .unwrap();
    assert_eq!(resolved.table, "candles");
}

#[test]
fn test_explicit_table_wins() {
    let resolver = TableResolver::default();
    let resolved = resolver
        .resolve(&job(
            "https://api.exchange.coinbase.com/products/BTC-USD/candles?granularity=60",
            Some("my_candles"),
        ))
        .unwrap();
    assert_eq!(resolved.table, "my_candles");
    assert_eq!(resolved.payload, Bytes::from_static(CANDLES.as_bytes()));
}

#[test]
fn test_builtin_candles_transform() {
    let resolver = TableResolver::default();
    let resolved = resolver
        .resolve(&job(
            "https://api.exchange.coinbase.com/products/BTC-USD/candles?granularity=60",
            None,
        ))
        .unwrap();
    assert_eq!(resolved.table, "candle_minutes");

    let records: Vec<serde_json::Value> = serde_json::from_slice(&resolved.payload).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["product_id"], "BTC-USD");
    assert_eq!(records[0]["time"], 1672531200);
}

#[test]
fn test_transform_only_applies_to_matching_host() {
    let resolver = TableResolver::default();
    let resolved = resolver
        .resolve(&job(
            "https://api.example.com/products/BTC-USD/candles?granularity=60",
            None,
        ))
        .unwrap();
    assert_eq!(resolved.table, "candles");
    assert_eq!(resolved.payload, Bytes::from_static(CANDLES.as_bytes()));
}

struct Rename(&'static str);

impl PayloadTransform for Rename {
    fn transform(
        &self,
        _url: &Url,
        _table: &str,
        payload: &Bytes,
    ) -> Result<ResolvedPayload, EncodingError> {
        Ok(ResolvedPayload {
            table: self.0.to_string(),
            payload: payload.clone(),
            key: vec!["id".to_string()],
        })
    }
}

#[test]
fn test_custom_registration_takes_precedence_by_order() {
    let mut registry = TransformRegistry::new();
    registry
        .register("example.com", "items", Arc::new(Rename("first")))
        .register("api.example.com", "items", Arc::new(Rename("second")));
    assert_eq!(registry.len(), 2);

    let resolver = TableResolver::new(Arc::new(registry));
    let resolved = resolver
        .resolve(&job("https://api.example.com/v1/items", None))
        .unwrap();
    assert_eq!(resolved.table, "first");
}
