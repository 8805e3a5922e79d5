//! Network scan handler

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::scan::{self, Device, ScanError};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub devices: Vec<Device>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Discover devices on the local subnet.
///
/// A failed scan is not fatal to the service: every failure is folded
/// into `{devices: [], error}` with HTTP 200.
pub async fn scan(State(state): State<AppState>) -> Json<ScanResponse> {
    let timeout = state.config.scan_timeout();

    tracing::info!("Starting network scan");
    let outcome = tokio::task::spawn_blocking(move || scan::discover(timeout)).await;
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => Err(ScanError::Worker(e.to_string())),
    };

    Json(into_response(outcome))
}

/// Fold a scan outcome into the wire shape.
fn into_response(outcome: Result<Vec<Device>, ScanError>) -> ScanResponse {
    match outcome {
        Ok(devices) => {
            tracing::info!("Returning {} devices", devices.len());
            ScanResponse {
                devices,
                error: None,
            }
        }
        Err(e) => {
            tracing::error!("Scan failed: {}", e);
            ScanResponse {
                devices: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_scan_is_a_success_without_error() {
        let response = into_response(Ok(Vec::new()));
        assert!(response.devices.is_empty());
        assert!(response.error.is_none());

        // The error key must be absent entirely, not null.
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["devices"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn failures_fold_into_a_non_empty_error() {
        let response = into_response(Err(ScanError::Channel("boom".to_string())));
        assert!(response.devices.is_empty());
        let error = response.error.unwrap();
        assert!(!error.is_empty());
        assert!(error.contains("boom"));
    }
}
