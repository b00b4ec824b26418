//! Integration tests for the signal service HTTP server

use biotensor_signal_service::inference::InferenceConfig;
use biotensor_signal_service::server::{run, ServerConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;

/// Start a server over a scratch database, with the inference boundary
/// pointed at a port nothing listens on.
async fn start_server() -> (SocketAddr, tokio::sync::oneshot::Sender<()>, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");

    let inference = InferenceConfig {
        url: "http://127.0.0.1:9".to_string(),
        api_key: "test-key".to_string(),
        timeout: Duration::from_millis(500),
        max_retries: 0,
        retry_backoff: Duration::from_millis(10),
    };
    let config = ServerConfig::new(0, dir.path().join("signals.db"), inference);

    let (addr, shutdown_tx) = run(config).await.expect("Failed to start server");

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(100)).await;

    (addr, shutdown_tx, dir)
}

fn ingest_body(t_start: &str, values: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "patientId": "p-1",
        "channel": "ecg",
        "samplingRateHz": 4.0,
        "tStart": t_start,
        "values": values,
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let (addr, shutdown_tx, _dir) = start_server().await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert!(body["version"].as_str().is_some());

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_ingest_round_trip() {
    let (addr, shutdown_tx, _dir) = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/v1/ingest", addr))
        .json(&ingest_body(
            "2025-06-01T12:00:00Z",
            serde_json::json!([1.0, 2.0, 3.0, 4.0]),
        ))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["ok"], true);
    assert!(body["id"].as_str().is_some());

    // Identical submission: accepted again, with a different id.
    let response = client
        .post(format!("http://{}/v1/ingest", addr))
        .json(&ingest_body(
            "2025-06-01T12:00:00Z",
            serde_json::json!([1.0, 2.0, 3.0, 4.0]),
        ))
        .send()
        .await
        .expect("Failed to send request");

    let second: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_ne!(second["id"], body["id"]);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_ingest_rejects_invalid_input() {
    let (addr, shutdown_tx, _dir) = start_server().await;
    let client = reqwest::Client::new();

    let mut body = ingest_body("2025-06-01T12:00:00Z", serde_json::json!([1.0]));
    body["samplingRateHz"] = serde_json::json!(0.0);

    let response = client
        .post(format!("http://{}/v1/ingest", addr))
        .json(&body)
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["code"], "INVALID_INPUT");

    let empty = ingest_body("2025-06-01T12:00:00Z", serde_json::json!([]));
    let response = client
        .post(format!("http://{}/v1/ingest", addr))
        .json(&empty)
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_recent_returns_ascending_chunks() {
    let (addr, shutdown_tx, _dir) = start_server().await;
    let client = reqwest::Client::new();

    // Ingest out of time order; reads come back ascending.
    let now = chrono::Utc::now();
    for offset_secs in [-20i64, -40, -30] {
        let t_start = (now + chrono::Duration::seconds(offset_secs)).to_rfc3339();
        let response = client
            .post(format!("http://{}/v1/ingest", addr))
            .json(&ingest_body(&t_start, serde_json::json!([1.0, 2.0, 3.0, 4.0])))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());
    }

    let response = client
        .get(format!(
            "http://{}/v1/recent?patientId=p-1&channel=ecg&sinceMs=3600000",
            addr
        ))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let chunks: Vec<serde_json::Value> = response.json().await.expect("Failed to parse JSON");
    assert_eq!(chunks.len(), 3);

    let starts: Vec<String> = chunks
        .iter()
        .map(|c| c["tStart"].as_str().unwrap().to_string())
        .collect();
    let mut sorted = starts.clone();
    sorted.sort();
    assert_eq!(starts, sorted);

    // Each chunk's derived end time covers its samples: 4 samples at 4 Hz
    // is exactly one second.
    for chunk in &chunks {
        let t_start: chrono::DateTime<chrono::Utc> =
            chunk["tStart"].as_str().unwrap().parse().unwrap();
        let t_end: chrono::DateTime<chrono::Utc> =
            chunk["tEnd"].as_str().unwrap().parse().unwrap();
        assert_eq!(t_end - t_start, chrono::Duration::seconds(1));
    }

    // An unknown channel has no recent chunks.
    let response = client
        .get(format!(
            "http://{}/v1/recent?patientId=p-1&channel=eeg&sinceMs=3600000",
            addr
        ))
        .send()
        .await
        .expect("Failed to send request");
    let chunks: Vec<serde_json::Value> = response.json().await.expect("Failed to parse JSON");
    assert!(chunks.is_empty());

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_extract_without_data_is_no_data() {
    let (addr, shutdown_tx, _dir) = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/v1/extract", addr))
        .json(&serde_json::json!({"patientId": "p-1", "channel": "ecg"}))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["error"], "no-data");
    assert_eq!(body["code"], "NO_DATA");

    // Nothing was written on the no-data path.
    let stats: serde_json::Value = client
        .get(format!("http://{}/v1/stats", addr))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(stats["featuresPersisted"], 0);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_extract_returns_features_when_inference_is_down() {
    let (addr, shutdown_tx, _dir) = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/v1/ingest", addr))
        .json(&ingest_body(
            "2025-06-01T12:00:00Z",
            serde_json::json!([1.0, 2.0, 3.0, 4.0]),
        ))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let response = client
        .post(format!("http://{}/v1/extract", addr))
        .json(&serde_json::json!({"patientId": "p-1", "channel": "ecg"}))
        .send()
        .await
        .expect("Failed to send request");

    // The feature write committed even though no inference service is
    // listening, so this is a success response with a null prediction.
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");

    let features = &body["features"];
    assert!((features["mean"].as_f64().unwrap() - 2.5).abs() < 1e-9);
    assert!((features["std"].as_f64().unwrap() - (5.0f64 / 3.0).sqrt()).abs() < 1e-9);
    assert!((features["rms"].as_f64().unwrap() - 7.5f64.sqrt()).abs() < 1e-9);

    assert!(body["prediction"].is_null());
    assert!(body["inferenceError"].as_str().is_some());

    let stats: serde_json::Value = client
        .get(format!("http://{}/v1/stats", addr))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(stats["chunksIngested"], 1);
    assert_eq!(stats["windowsExtracted"], 1);
    assert_eq!(stats["featuresPersisted"], 3);
    assert_eq!(stats["predictionsFailed"], 1);

    let _ = shutdown_tx.send(());
}
