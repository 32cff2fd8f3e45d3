//! Truncate-once semantics across a run

use api_replicator::pipeline::Pipeline;
use api_replicator::storage::{DefaultResolver, Repository};
use std::sync::Arc;

use super::fakes::{FakeConnector, ScriptedClient};
use super::pipeline_end_to_end::{candles_request, coinbase_config};

#[tokio::test]
async fn test_truncate_clears_stale_rows_once() {
    let resolver = Arc::new(DefaultResolver::new());
    let target = resolver.memory("a");
    target
        .upsert("candle_minutes", br#"{"stale": true}"#, &[])
        .await
        .unwrap();

    let mut config = coinbase_config(&["memory://a"]);
    config.truncate = true;
    config.requests = vec![candles_request("2023-01-01T00:00:00Z", "2023-01-01T04:00:00Z")];

    let summary = Pipeline::new(config)
        .with_connector(Arc::new(FakeConnector::new(Arc::new(ScriptedClient::candles()))))
        .with_resolver(resolver.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.completed, 4);
    assert_eq!(target.truncate_calls(), 1);

    let records = target.records("candle_minutes").await;
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.get("stale").is_none()));
}

#[tokio::test]
async fn test_without_truncate_rows_accumulate() {
    let resolver = Arc::new(DefaultResolver::new());
    let target = resolver.memory("a");
    target
        .upsert("candle_minutes", br#"{"stale": true}"#, &[])
        .await
        .unwrap();

    Pipeline::new(coinbase_config(&["memory://a"]))
        .with_connector(Arc::new(FakeConnector::new(Arc::new(ScriptedClient::candles()))))
        .with_resolver(resolver.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(target.truncate_calls(), 0);
    assert_eq!(target.records("candle_minutes").await.len(), 3);
}

#[tokio::test]
async fn test_request_level_truncate() {
    let resolver = Arc::new(DefaultResolver::new());
    let target = resolver.memory("a");
    for table in ["candle_minutes", "raw_candles"] {
        target
            .upsert(table, br#"{"stale": true}"#, &[])
            .await
            .unwrap();
    }

    let mut config = coinbase_config(&["memory://a"]);
    config.requests = vec![
        candles_request("2023-01-01T00:00:00Z", "2023-01-01T02:00:00Z").with_truncate(true),
        candles_request("2023-01-01T00:00:00Z", "2023-01-01T02:00:00Z").with_table("raw_candles"),
    ];

    let summary = Pipeline::new(config)
        .with_connector(Arc::new(FakeConnector::new(Arc::new(ScriptedClient::candles()))))
        .with_resolver(resolver.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.completed, 4);
    assert_eq!(target.truncate_calls(), 1);

    let truncated = target.records("candle_minutes").await;
    assert_eq!(truncated.len(), 2);
    assert!(truncated.iter().all(|r| r.get("stale").is_none()));

    let kept = target.records("raw_candles").await;
    assert_eq!(kept.len(), 3);
    assert!(kept.iter().any(|r| r.get("stale").is_some()));
}
