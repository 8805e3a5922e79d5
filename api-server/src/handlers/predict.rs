//! Prediction handler

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{AppError, AppResult, AppState};

pub const STATUS_ANOMALY: &str = "Suspicious Activity Detected";
pub const STATUS_NORMAL: &str = "Normal Behavior";

/// Wire request. The field name and cardinality match what the model was
/// trained on.
#[derive(Debug, Deserialize, Validate)]
pub struct PredictRequest {
    #[validate(length(equal = 10, message = "traffic_sequence must contain exactly 10 values"))]
    pub traffic_sequence: Vec<f32>,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub is_anomaly: bool,
    pub status: &'static str,
}

/// Score one traffic sequence against the loaded model
pub async fn predict(
    State(state): State<AppState>,
    Json(req): Json<PredictRequest>,
) -> AppResult<Json<PredictResponse>> {
    req.validate()
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    let detection = state.detector.score(&req.traffic_sequence)?;
    tracing::debug!(
        "scored sequence: error={:.6} threshold={:.6}",
        detection.error,
        detection.threshold
    );

    Ok(Json(PredictResponse {
        is_anomaly: detection.is_anomaly,
        status: if detection.is_anomaly {
            STATUS_ANOMALY
        } else {
            STATUS_NORMAL
        },
    }))
}
