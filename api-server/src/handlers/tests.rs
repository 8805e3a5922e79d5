use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use rand::rngs::StdRng;
use rand::SeedableRng;
use smartguard_model::{
    convert, export_saved, train, AnomalyDetector, ArtifactMeta, Autoencoder, ConvertOptions,
    TrafficSynthesizer, TrainConfig, SEQUENCE_LEN,
};

use crate::config::Config;
use crate::{create_router, AppState};

static STATE: OnceLock<AppState> = OnceLock::new();

/// Router state backed by a small model run through the real
/// export/convert pipeline.
fn test_state() -> AppState {
    STATE
        .get_or_init(|| {
            let mut rng = StdRng::seed_from_u64(11);
            let mut synth = TrafficSynthesizer::with_seed(11);
            let corpus = synth.generate(64);
            let mut model = Autoencoder::new(8, &mut rng);
            let config = TrainConfig {
                epochs: 5,
                batch_size: 16,
                learning_rate: 1e-2,
                validation_split: 0.1,
            };
            let report = train(&mut model, &corpus, &config, &mut rng).expect("fixture training");

            let meta = ArtifactMeta {
                sequence_len: SEQUENCE_LEN,
                hidden_size: 8,
                threshold: report.threshold,
                normalization: report.normalization,
                trained_at: chrono::Utc::now(),
            };
            let dir = tempfile::tempdir().expect("tempdir");
            export_saved(&model, &meta, dir.path()).expect("export");
            let artifact = convert(dir.path(), ConvertOptions::default()).expect("convert");
            let detector = AnomalyDetector::from_artifact(&artifact).expect("detector");

            AppState {
                detector: Arc::new(detector),
                config: Config {
                    model_path: "unused.sgm".into(),
                    port: 0,
                    threshold_override: None,
                    scan_timeout_secs: 1,
                },
            }
        })
        .clone()
}

async fn post_predict(body: String) -> (StatusCode, Value) {
    let router = create_router(test_state());
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/predict")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn predict_returns_a_classification() {
    let body = json!({ "traffic_sequence": [10.0, 9.5, 10.2, 11.0, 9.8, 10.1, 10.4, 9.9, 10.0, 10.3] });
    let (status, value) = post_predict(body.to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert!(value["is_anomaly"].is_boolean());
    let status_text = value["status"].as_str().unwrap();
    assert!(
        status_text == "Suspicious Activity Detected" || status_text == "Normal Behavior",
        "unexpected status {status_text}"
    );
}

#[tokio::test]
async fn predict_rejects_wrong_cardinality() {
    let body = json!({ "traffic_sequence": [10.0, 9.5, 10.2] });
    let (status, value) = post_predict(body.to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = value["error"].as_str().unwrap();
    assert!(message.contains("traffic_sequence"), "got {message}");
}

#[tokio::test]
async fn predict_rejects_malformed_bodies() {
    let (status, _) = post_predict("not json at all".to_string()).await;
    assert!(status.is_client_error(), "got {status}");

    let (status, _) = post_predict(json!({ "wrong_field": [1.0] }).to_string()).await;
    assert!(status.is_client_error(), "got {status}");
}

#[tokio::test]
async fn health_reports_ok() {
    let router = create_router(test_state());
    let response = router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["status"], "healthy");
}
