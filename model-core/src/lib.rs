//! SmartGuard Model - Traffic Anomaly Scoring Pipeline
//!
//! Everything between raw traffic sequences and an anomaly verdict:
//! synthetic corpus generation, the LSTM autoencoder, training, export,
//! and the compact inference artifact the API server loads.
//!
//! # Pipeline
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SMARTGUARD PIPELINE                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  synth ──▶ train ──▶ export (graph.json + weights.bin)      │
//! │                          │                                  │
//! │                          ▼  convert (optional int16)        │
//! │                  smartguard_model.sgm                       │
//! │                          │                                  │
//! │                          ▼  load once at startup            │
//! │                  AnomalyDetector::score                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod artifact;
pub mod autoencoder;
pub mod detector;
pub mod error;
pub mod export;
pub mod lstm;
pub mod synth;
pub mod threshold;
pub mod train;

pub use artifact::{Artifact, ArtifactMeta, NormalizationParams, TensorInfo};
pub use autoencoder::Autoencoder;
pub use detector::{AnomalyDetector, Detection};
pub use error::{ModelError, ModelResult};
pub use export::{convert, export_saved, ConvertOptions};
pub use synth::TrafficSynthesizer;
pub use threshold::{ThresholdConfig, DEFAULT_THRESHOLD};
pub use train::{train, TrainConfig, TrainingReport};

/// Timesteps per traffic sequence. The wire contract and the model input
/// shape both depend on this.
pub const SEQUENCE_LEN: usize = 10;

/// Hidden/latent width of the encoder and decoder LSTMs.
pub const HIDDEN_SIZE: usize = 32;
