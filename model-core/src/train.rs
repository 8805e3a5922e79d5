//! Training loop
//!
//! Fixed-epoch Adam optimization of the reconstruction loss over
//! mini-batches, with per-epoch train/validation loss surfaced to the
//! caller instead of disappearing into the log.

use ndarray::{Array, Array3, Dimension, Ix1, Ix2, Zip};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::artifact::NormalizationParams;
use crate::autoencoder::{Autoencoder, AutoencoderGrads};
use crate::error::ModelError;
use crate::threshold::ThresholdConfig;

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const EPS: f32 = 1e-8;

/// Training hyperparameters. Every knob is a named, overridable
/// parameter.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub validation_split: f32,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            learning_rate: 1e-3,
            validation_split: 0.1,
        }
    }
}

/// Loss trace for one epoch.
#[derive(Debug, Clone, Serialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub train_loss: f32,
    pub val_loss: f32,
}

/// Outcome of a training run.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub history: Vec<EpochStats>,
    pub normalization: NormalizationParams,
    /// Calibrated anomaly threshold (mean + 3 sigma of validation errors).
    pub threshold: f32,
}

impl TrainingReport {
    pub fn final_train_loss(&self) -> f32 {
        self.history.last().map(|e| e.train_loss).unwrap_or(f32::NAN)
    }

    pub fn final_val_loss(&self) -> f32 {
        self.history.last().map(|e| e.val_loss).unwrap_or(f32::NAN)
    }
}

/// First and second Adam moments for one parameter tensor.
struct AdamTensor<D: Dimension> {
    m: Array<f32, D>,
    v: Array<f32, D>,
}

impl<D: Dimension> AdamTensor<D> {
    fn like(param: &Array<f32, D>) -> Self {
        Self {
            m: Array::zeros(param.raw_dim()),
            v: Array::zeros(param.raw_dim()),
        }
    }

    fn update(&mut self, param: &mut Array<f32, D>, grad: &Array<f32, D>, lr_t: f32) {
        Zip::from(&mut self.m)
            .and(grad)
            .for_each(|m, &g| *m = BETA1 * *m + (1.0 - BETA1) * g);
        Zip::from(&mut self.v)
            .and(grad)
            .for_each(|v, &g| *v = BETA2 * *v + (1.0 - BETA2) * g * g);
        Zip::from(param)
            .and(&self.m)
            .and(&self.v)
            .for_each(|p, &m, &v| *p -= lr_t * m / (v.sqrt() + EPS));
    }
}

struct Adam {
    lr: f32,
    step: u64,
    enc_w_ih: AdamTensor<Ix2>,
    enc_w_hh: AdamTensor<Ix2>,
    enc_b: AdamTensor<Ix1>,
    dec_w_ih: AdamTensor<Ix2>,
    dec_w_hh: AdamTensor<Ix2>,
    dec_b: AdamTensor<Ix1>,
    out_w: AdamTensor<Ix2>,
    out_b: AdamTensor<Ix1>,
}

impl Adam {
    fn new(model: &Autoencoder, lr: f32) -> Self {
        Self {
            lr,
            step: 0,
            enc_w_ih: AdamTensor::like(&model.encoder.w_ih),
            enc_w_hh: AdamTensor::like(&model.encoder.w_hh),
            enc_b: AdamTensor::like(&model.encoder.b),
            dec_w_ih: AdamTensor::like(&model.decoder.w_ih),
            dec_w_hh: AdamTensor::like(&model.decoder.w_hh),
            dec_b: AdamTensor::like(&model.decoder.b),
            out_w: AdamTensor::like(&model.output.w),
            out_b: AdamTensor::like(&model.output.b),
        }
    }

    fn apply(&mut self, model: &mut Autoencoder, grads: &AutoencoderGrads) {
        self.step += 1;
        let t = self.step as f32;
        let lr_t = self.lr * (1.0 - BETA2.powf(t)).sqrt() / (1.0 - BETA1.powf(t));

        self.enc_w_ih.update(&mut model.encoder.w_ih, &grads.encoder.w_ih, lr_t);
        self.enc_w_hh.update(&mut model.encoder.w_hh, &grads.encoder.w_hh, lr_t);
        self.enc_b.update(&mut model.encoder.b, &grads.encoder.b, lr_t);
        self.dec_w_ih.update(&mut model.decoder.w_ih, &grads.decoder.w_ih, lr_t);
        self.dec_w_hh.update(&mut model.decoder.w_hh, &grads.decoder.w_hh, lr_t);
        self.dec_b.update(&mut model.decoder.b, &grads.decoder.b, lr_t);
        self.out_w.update(&mut model.output.w, &grads.out_w, lr_t);
        self.out_b.update(&mut model.output.b, &grads.out_b, lr_t);
    }
}

/// Fit the autoencoder to a corpus of normal sequences.
///
/// The corpus is min/max-normalized first; the fitted parameters travel
/// with the report (and later the artifact) so serving normalizes the
/// same way. A non-finite loss aborts with [`ModelError::Diverged`].
pub fn train(
    model: &mut Autoencoder,
    corpus: &Array3<f32>,
    config: &TrainConfig,
    rng: &mut StdRng,
) -> Result<TrainingReport, ModelError> {
    let norm = NormalizationParams::fit(corpus);
    let sequences: Vec<Vec<f32>> = corpus
        .outer_iter()
        .map(|sample| sample.iter().map(|&v| norm.normalize(v)).collect())
        .collect();

    let val_len = ((sequences.len() as f32) * config.validation_split).round() as usize;
    let val_len = val_len.min(sequences.len().saturating_sub(1));
    let mut indices: Vec<usize> = (0..sequences.len()).collect();
    indices.shuffle(rng);
    let (val_idx, train_idx) = indices.split_at(val_len);
    let val_idx = val_idx.to_vec();
    let mut order = train_idx.to_vec();

    log::info!(
        "training on {} sequences ({} held out), {} epochs, batch {}",
        order.len(),
        val_idx.len(),
        config.epochs,
        config.batch_size
    );

    let mut optimizer = Adam::new(model, config.learning_rate);
    let mut history = Vec::with_capacity(config.epochs);

    for epoch in 0..config.epochs {
        order.shuffle(rng);
        let mut epoch_loss = 0.0f64;
        let mut seen = 0usize;

        for batch in order.chunks(config.batch_size.max(1)) {
            let mut grads = AutoencoderGrads::zeros(model);
            let mut batch_loss = 0.0f32;
            for &idx in batch {
                let (g, loss) = model.backward(&sequences[idx]);
                grads.accumulate(&g);
                batch_loss += loss;
            }
            grads.scale(1.0 / batch.len() as f32);
            optimizer.apply(model, &grads);
            epoch_loss += f64::from(batch_loss);
            seen += batch.len();
        }

        let train_loss = if seen > 0 {
            (epoch_loss / seen as f64) as f32
        } else {
            0.0
        };
        let val_loss = mean_loss(model, &sequences, &val_idx);
        if !train_loss.is_finite() || !val_loss.is_finite() {
            return Err(ModelError::Diverged { epoch });
        }

        log::info!(
            "epoch {}/{}: train_loss={:.6} val_loss={:.6}",
            epoch + 1,
            config.epochs,
            train_loss,
            val_loss
        );
        history.push(EpochStats {
            epoch: epoch + 1,
            train_loss,
            val_loss,
        });
    }

    let val_errors: Vec<f32> = val_idx
        .iter()
        .map(|&i| model.reconstruction_error(&sequences[i]))
        .collect();
    let threshold = ThresholdConfig::default().calibrate(&val_errors);

    Ok(TrainingReport {
        history,
        normalization: norm,
        threshold,
    })
}

fn mean_loss(model: &Autoencoder, sequences: &[Vec<f32>], idx: &[usize]) -> f32 {
    if idx.is_empty() {
        return 0.0;
    }
    idx.iter()
        .map(|&i| model.reconstruction_error(&sequences[i]))
        .sum::<f32>()
        / idx.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::TrafficSynthesizer;
    use rand::SeedableRng;

    #[test]
    fn training_reduces_reconstruction_loss() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut synth = TrafficSynthesizer::with_seed(3);
        let corpus = synth.generate(96);
        let mut model = Autoencoder::new(8, &mut rng);
        let config = TrainConfig {
            epochs: 12,
            batch_size: 16,
            learning_rate: 1e-2,
            validation_split: 0.1,
        };

        let report = train(&mut model, &corpus, &config, &mut rng).unwrap();

        assert_eq!(report.history.len(), 12);
        let first = report.history.first().unwrap().train_loss;
        let last = report.final_train_loss();
        assert!(last < first, "loss should decrease: {first} -> {last}");
        assert!(report.threshold > 0.0);
    }

    #[test]
    fn non_finite_corpus_reports_divergence() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut synth = TrafficSynthesizer::with_seed(8);
        let mut corpus = synth.generate(64);
        corpus[[0, 0, 0]] = f32::NAN;
        let mut model = Autoencoder::new(4, &mut rng);

        let err = train(&mut model, &corpus, &TrainConfig::default(), &mut rng).unwrap_err();
        assert!(matches!(err, ModelError::Diverged { .. }));
    }

    #[test]
    fn default_hyperparameters() {
        let config = TrainConfig::default();
        assert_eq!(config.epochs, 50);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.validation_split, 0.1);
    }
}
