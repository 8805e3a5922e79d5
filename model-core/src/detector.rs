//! Anomaly detector
//!
//! Loads the compact artifact once, resolves the I/O tensor descriptors,
//! and scores sequences with a pure, re-entrant forward pass. One
//! instance is shared read-only for the whole process lifetime.

use std::path::Path;

use serde::Serialize;

use crate::artifact::{Artifact, ArtifactMeta, TensorInfo};
use crate::autoencoder::{mse, Autoencoder};
use crate::error::ModelError;
use crate::threshold::DEFAULT_THRESHOLD;

/// Outcome of scoring one sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
    pub is_anomaly: bool,
    /// Mean squared reconstruction error, normalized-MSE units.
    pub error: f32,
    pub threshold: f32,
}

/// Loaded model plus everything needed to score a request.
///
/// Scoring borrows `&self` and keeps no mutable state, so one instance
/// can be shared across threads without a lock.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    model: Autoencoder,
    meta: ArtifactMeta,
    input: TensorInfo,
    output: TensorInfo,
    threshold: f32,
}

impl AnomalyDetector {
    /// Load the artifact at `path`. A missing or corrupt file is an
    /// error the caller treats as fatal at startup.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        log::info!("loading model artifact from {}", path.display());
        let artifact = Artifact::read(path)?;
        Self::from_artifact(&artifact)
    }

    pub fn from_artifact(artifact: &Artifact) -> Result<Self, ModelError> {
        let model = artifact.to_model()?;
        let calibrated = artifact.meta.threshold;
        let threshold = if calibrated.is_finite() && calibrated > 0.0 {
            calibrated
        } else {
            DEFAULT_THRESHOLD
        };

        log::info!(
            "model ready: sequence_len={} hidden={} threshold={:.6}",
            artifact.meta.sequence_len,
            artifact.meta.hidden_size,
            threshold
        );

        Ok(Self {
            model,
            meta: artifact.meta.clone(),
            input: artifact.input_info().clone(),
            output: artifact.output_info().clone(),
            threshold,
        })
    }

    /// Replace the effective threshold (configuration override).
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn sequence_len(&self) -> usize {
        self.meta.sequence_len
    }

    pub fn meta(&self) -> &ArtifactMeta {
        &self.meta
    }

    /// Input tensor descriptor (stable index 0).
    pub fn input_info(&self) -> &TensorInfo {
        &self.input
    }

    /// Output tensor descriptor (stable index 1).
    pub fn output_info(&self) -> &TensorInfo {
        &self.output
    }

    /// Score one sequence. Cardinality and finiteness are validated up
    /// front; the input is never reshaped silently.
    pub fn score(&self, sequence: &[f32]) -> Result<Detection, ModelError> {
        let expected = self.meta.sequence_len;
        if sequence.len() != expected {
            return Err(ModelError::InvalidSequence {
                expected,
                got: sequence.len(),
            });
        }
        if sequence.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFiniteInput);
        }

        let normalized: Vec<f32> = sequence
            .iter()
            .map(|&v| self.meta.normalization.normalize(v))
            .collect();
        let reconstruction = self.model.forward(&normalized);
        let error = mse(&normalized, &reconstruction);

        Ok(Detection {
            is_anomaly: error > self.threshold,
            error,
            threshold: self.threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{convert, export_saved, ConvertOptions};
    use crate::synth::TrafficSynthesizer;
    use crate::train::{train, TrainConfig};
    use crate::SEQUENCE_LEN;
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::OnceLock;

    static FIXTURE: OnceLock<AnomalyDetector> = OnceLock::new();

    /// Detector trained on a small synthetic corpus and round-tripped
    /// through the full export/convert/load pipeline.
    fn trained_detector() -> AnomalyDetector {
        FIXTURE
            .get_or_init(|| {
                let mut rng = StdRng::seed_from_u64(42);
                let mut synth = TrafficSynthesizer::with_seed(1);
                let corpus = synth.generate(256);
                let mut model = Autoencoder::new(16, &mut rng);
                let config = TrainConfig {
                    epochs: 30,
                    batch_size: 32,
                    learning_rate: 1e-2,
                    validation_split: 0.1,
                };
                let report = train(&mut model, &corpus, &config, &mut rng).unwrap();

                let meta = ArtifactMeta {
                    sequence_len: SEQUENCE_LEN,
                    hidden_size: 16,
                    threshold: report.threshold,
                    normalization: report.normalization,
                    trained_at: Utc::now(),
                };

                let dir = tempfile::tempdir().unwrap();
                export_saved(&model, &meta, dir.path()).unwrap();
                let path = dir.path().join("model.sgm");
                convert(dir.path(), ConvertOptions::default())
                    .unwrap()
                    .write(&path)
                    .unwrap();
                AnomalyDetector::load(&path).unwrap()
            })
            .clone()
    }

    #[test]
    fn missing_artifact_is_reported() {
        let err = AnomalyDetector::load(Path::new("no/such/model.sgm")).unwrap_err();
        assert!(matches!(err, ModelError::ArtifactNotFound(_)));
    }

    #[test]
    fn wrong_cardinality_is_a_validation_error() {
        let detector = trained_detector();
        let err = detector.score(&[1.0; 9]).unwrap_err();
        assert!(matches!(
            err,
            ModelError::InvalidSequence {
                expected: 10,
                got: 9
            }
        ));
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let detector = trained_detector();
        let mut seq = [10.0f32; SEQUENCE_LEN];
        seq[3] = f32::NAN;
        assert!(matches!(
            detector.score(&seq),
            Err(ModelError::NonFiniteInput)
        ));
    }

    #[test]
    fn scoring_is_deterministic() {
        let detector = trained_detector();
        let seq: Vec<f32> = TrafficSynthesizer::with_seed(99).sequence();
        let a = detector.score(&seq).unwrap();
        let b = detector.score(&seq).unwrap();
        assert_eq!(a.error, b.error);
        assert_eq!(a.is_anomaly, b.is_anomaly);
    }

    #[test]
    fn normal_traffic_scores_below_outliers() {
        let detector = trained_detector();
        let normal = detector
            .score(&TrafficSynthesizer::with_seed(7).sequence())
            .unwrap();
        let zeros = detector.score(&[0.0; SEQUENCE_LEN]).unwrap();
        let offset = detector.score(&[25.0; SEQUENCE_LEN]).unwrap();

        assert!(normal.error < zeros.error);
        assert!(normal.error < offset.error);
        assert!(!normal.is_anomaly, "normal error {}", normal.error);
        assert!(zeros.is_anomaly, "zeros error {}", zeros.error);
        assert!(offset.is_anomaly, "offset error {}", offset.error);
    }

    #[test]
    fn error_equal_to_threshold_is_not_an_anomaly() {
        let detector = trained_detector();
        let seq: Vec<f32> = TrafficSynthesizer::with_seed(13).sequence();
        let baseline = detector.score(&seq).unwrap();

        // Strict `>`: equality stays normal, anything below flips it.
        let at_boundary = detector.clone().with_threshold(baseline.error);
        assert!(!at_boundary.score(&seq).unwrap().is_anomaly);

        let below = detector.clone().with_threshold(baseline.error * 0.999);
        assert!(below.score(&seq).unwrap().is_anomaly);
    }

    #[test]
    fn detector_exposes_io_descriptors() {
        let detector = trained_detector();
        assert_eq!(detector.input_info().index, 0);
        assert_eq!(detector.output_info().index, 1);
        assert_eq!(detector.input_info().shape, [1, SEQUENCE_LEN, 1]);
        assert_eq!(detector.sequence_len(), SEQUENCE_LEN);
    }
}
