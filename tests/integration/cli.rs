//! CLI smoke tests for the api-replicator binary

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const CANDLES_CONFIG: &str = r#"{
    "url": "https://api.exchange.coinbase.com",
    "authentication": { "anonymous": true },
    "dnsList": ["memory://main"],
    "rateLimit": { "burst": 10, "period": 1 },
    "requests": [
        {
            "endpoint": "/products/BTC-USD/candles",
            "query": {
                "granularity": "60",
                "start": "2023-01-01T00:00:00Z",
                "end": "2023-01-01T02:00:00Z"
            },
            "timeseries": { "startName": "start", "endName": "end", "period": 3600 }
        }
    ]
}"#;

fn write_config(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn stdout(cmd: &mut Command) -> String {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn test_validate_accepts_good_config() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "pipeline.json", CANDLES_CONFIG);

    let out = stdout(
        Command::cargo_bin("api-replicator")
            .unwrap()
            .args(["validate", "--config", config.to_str().unwrap()]),
    );
    assert!(out.contains("Valid config"));
    assert!(out.contains("Requests: 1"));
    assert!(out.contains("Storage targets: 1"));
}

#[test]
fn test_validate_rejects_missing_rate_limit() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "pipeline.toml",
        "url = \"https://api.example.com\"\n\n[authentication]\nanonymous = true\n",
    );

    Command::cargo_bin("api-replicator")
        .unwrap()
        .args(["validate", "--config", config.to_str().unwrap()])
        .assert()
        .failure();
}

#[test]
fn test_plan_lists_flattened_requests() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "pipeline.json", CANDLES_CONFIG);

    let out = stdout(
        Command::cargo_bin("api-replicator")
            .unwrap()
            .args(["plan", "--config", config.to_str().unwrap()]),
    );
    let requests: Vec<&str> = out.lines().filter(|l| l.starts_with("GET ")).collect();
    assert_eq!(requests.len(), 2);
    assert!(requests
        .iter()
        .all(|r| r.contains("/products/BTC-USD/candles?")));
    assert!(out.contains("2 request(s)"));
}

#[test]
fn test_plan_json_output() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "pipeline.json", CANDLES_CONFIG);

    let out = stdout(Command::cargo_bin("api-replicator").unwrap().args([
        "--output-format",
        "json",
        "plan",
        "--config",
        config.to_str().unwrap(),
    ]));
    let planned: serde_json::Value = serde_json::from_str(&out).unwrap();
    let planned = planned.as_array().unwrap();
    assert_eq!(planned.len(), 2);
    assert_eq!(planned[0]["method"], "GET");
    assert!(planned[0]["table"].is_null());
}

#[test]
fn test_unsupported_config_format_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "pipeline.yaml", "url: nope");

    Command::cargo_bin("api-replicator")
        .unwrap()
        .args(["plan", "--config", config.to_str().unwrap()])
        .assert()
        .failure();
}
