//! Integration tests for logging and tracing

use api_replicator::pipeline::Pipeline;
use api_replicator::storage::DefaultResolver;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

use super::fakes::{FakeConnector, ScriptedClient};
use super::pipeline_end_to_end::coinbase_config;

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Capture {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[test]
fn test_env_filter_parsing() {
    let _filter = EnvFilter::new("api_replicator=info");
    let _filter = EnvFilter::new("warn,api_replicator::pipeline=debug");
}

#[tokio::test]
async fn test_run_logs_state_transitions_in_json() {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new("api_replicator=info"))
        .with_writer({
            let capture = capture.clone();
            move || capture.clone()
        })
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    Pipeline::new(coinbase_config(&["memory://a"]))
        .with_connector(Arc::new(FakeConnector::new(Arc::new(ScriptedClient::candles()))))
        .with_resolver(Arc::new(DefaultResolver::new()))
        .run()
        .await
        .unwrap();

    let text = capture.text();
    for state in [
        "validating",
        "connecting",
        "flattening",
        "running",
        "draining",
        "completed",
    ] {
        assert!(
            text.contains(&format!("\"state\":\"{state}\"")),
            "missing {state} transition in:\n{text}"
        );
    }
    assert!(text.contains("run_pipeline"));
    assert!(text.contains("Worker pools started"));
}

#[tokio::test]
async fn test_failed_run_logs_error() {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("api_replicator=info"))
        .with_ansi(false)
        .with_writer({
            let capture = capture.clone();
            move || capture.clone()
        })
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let result = Pipeline::new(coinbase_config(&["memory://a"]))
        .with_connector(Arc::new(FakeConnector::refusing()))
        .run()
        .await;
    assert!(result.is_err());

    let text = capture.text();
    assert!(text.contains("ERROR"));
    assert!(text.contains("Pipeline failed"));
}
