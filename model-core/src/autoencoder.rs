//! Sequence-to-sequence LSTM autoencoder
//!
//! The encoder compresses a sequence into its final hidden state, the
//! latent is repeated across the timesteps as the decoder input, and a
//! per-timestep dense projection produces the reconstruction.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::Rng;

use crate::lstm::{LstmCache, LstmGrads, LstmLayer};

/// Per-timestep linear projection from hidden state to one scalar.
#[derive(Debug, Clone)]
pub struct DenseLayer {
    /// (1, H)
    pub w: Array2<f32>,
    /// (1)
    pub b: Array1<f32>,
}

impl DenseLayer {
    fn new(hidden_size: usize, rng: &mut StdRng) -> Self {
        let bound = 1.0 / (hidden_size as f32).sqrt();
        Self {
            w: Array2::from_shape_fn((1, hidden_size), |_| rng.gen_range(-bound..bound)),
            b: Array1::zeros(1),
        }
    }

    fn apply(&self, h: &Array1<f32>) -> f32 {
        self.w.row(0).dot(h) + self.b[0]
    }
}

/// The trained model: a pure function from a sequence to its
/// reconstruction.
#[derive(Debug, Clone)]
pub struct Autoencoder {
    pub encoder: LstmLayer,
    pub decoder: LstmLayer,
    pub output: DenseLayer,
}

/// Gradients for every parameter tensor of the model.
pub struct AutoencoderGrads {
    pub encoder: LstmGrads,
    pub decoder: LstmGrads,
    pub out_w: Array2<f32>,
    pub out_b: Array1<f32>,
}

impl AutoencoderGrads {
    pub fn zeros(model: &Autoencoder) -> Self {
        Self {
            encoder: LstmGrads::zeros(&model.encoder),
            decoder: LstmGrads::zeros(&model.decoder),
            out_w: Array2::zeros(model.output.w.raw_dim()),
            out_b: Array1::zeros(model.output.b.raw_dim()),
        }
    }

    pub fn accumulate(&mut self, other: &Self) {
        self.encoder.accumulate(&other.encoder);
        self.decoder.accumulate(&other.decoder);
        self.out_w += &other.out_w;
        self.out_b += &other.out_b;
    }

    pub fn scale(&mut self, factor: f32) {
        self.encoder.scale(factor);
        self.decoder.scale(factor);
        self.out_w *= factor;
        self.out_b *= factor;
    }
}

pub(crate) struct AeCache {
    enc_cache: LstmCache,
    dec_cache: LstmCache,
    dec_h: Vec<Array1<f32>>,
}

impl Autoencoder {
    /// Fresh model with the given hidden width.
    pub fn new(hidden_size: usize, rng: &mut StdRng) -> Self {
        Self {
            encoder: LstmLayer::new(1, hidden_size, rng),
            decoder: LstmLayer::new(hidden_size, hidden_size, rng),
            output: DenseLayer::new(hidden_size, rng),
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.encoder.hidden_size
    }

    /// Reconstruct a sequence. Pure: all scratch state is call-local, so
    /// concurrent calls through a shared reference are safe.
    pub fn forward(&self, sequence: &[f32]) -> Vec<f32> {
        let (recon, _) = self.forward_cached(sequence);
        recon
    }

    /// Mean squared error between a sequence and its reconstruction.
    pub fn reconstruction_error(&self, sequence: &[f32]) -> f32 {
        let recon = self.forward(sequence);
        mse(sequence, &recon)
    }

    pub(crate) fn forward_cached(&self, sequence: &[f32]) -> (Vec<f32>, AeCache) {
        let enc_inputs: Vec<Array1<f32>> = sequence
            .iter()
            .map(|&v| Array1::from_vec(vec![v]))
            .collect();
        let (enc_h, enc_cache) = self.encoder.forward(&enc_inputs);
        let latent = enc_h
            .last()
            .cloned()
            .unwrap_or_else(|| Array1::zeros(self.hidden_size()));

        // RepeatVector: the latent is the decoder input at every step.
        let dec_inputs: Vec<Array1<f32>> = vec![latent; sequence.len()];
        let (dec_h, dec_cache) = self.decoder.forward(&dec_inputs);

        let recon = dec_h.iter().map(|h| self.output.apply(h)).collect();
        (
            recon,
            AeCache {
                enc_cache,
                dec_cache,
                dec_h,
            },
        )
    }

    /// Forward plus backward for one sequence. Returns gradients and the
    /// reconstruction loss.
    pub(crate) fn backward(&self, sequence: &[f32]) -> (AutoencoderGrads, f32) {
        let (recon, cache) = self.forward_cached(sequence);
        let steps = sequence.len();
        let mut grads = AutoencoderGrads::zeros(self);

        // dL/dr for L = mean((r - x)^2)
        let mut dh_dec: Vec<Array1<f32>> = Vec::with_capacity(steps);
        for t in 0..steps {
            let d = 2.0 * (recon[t] - sequence[t]) / steps as f32;
            grads.out_w.row_mut(0).scaled_add(d, &cache.dec_h[t]);
            grads.out_b[0] += d;
            dh_dec.push(self.output.w.row(0).mapv(|w| w * d));
        }

        let (dec_grads, dec_dx) = self.decoder.backward(&cache.dec_cache, &dh_dec);
        grads.decoder.accumulate(&dec_grads);

        // The decoder sees the latent at every step, so its input
        // gradients all flow back into the latent.
        let mut dlatent = Array1::<f32>::zeros(self.hidden_size());
        for dx in &dec_dx {
            dlatent += dx;
        }

        let mut dh_enc = vec![Array1::<f32>::zeros(self.hidden_size()); steps];
        dh_enc[steps - 1] = dlatent;
        let (enc_grads, _) = self.encoder.backward(&cache.enc_cache, &dh_enc);
        grads.encoder.accumulate(&enc_grads);

        let loss = mse(sequence, &recon);
        (grads, loss)
    }
}

/// Mean squared error between two equal-length slices.
pub fn mse(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f32>() / a.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SEQUENCE_LEN;
    use rand::SeedableRng;

    #[test]
    fn reconstruction_has_input_length() {
        let mut rng = StdRng::seed_from_u64(4);
        let model = Autoencoder::new(8, &mut rng);
        let seq = vec![0.5; SEQUENCE_LEN];
        assert_eq!(model.forward(&seq).len(), SEQUENCE_LEN);
    }

    #[test]
    fn forward_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(5);
        let model = Autoencoder::new(8, &mut rng);
        let seq: Vec<f32> = (0..SEQUENCE_LEN).map(|i| 0.1 * i as f32).collect();
        assert_eq!(model.forward(&seq), model.forward(&seq));
    }

    #[test]
    fn mse_of_identical_slices_is_zero() {
        let seq = [0.2, 0.4, 0.6];
        assert_eq!(mse(&seq, &seq), 0.0);
        assert!(mse(&seq, &[0.2, 0.4, 0.7]) > 0.0);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(9);
        let model = Autoencoder::new(4, &mut rng);
        let seq: Vec<f32> = (0..SEQUENCE_LEN).map(|i| 0.3 + 0.04 * i as f32).collect();

        let (grads, _) = model.backward(&seq);

        let eps = 1e-2f32;
        let check = |analytic: f32, perturb: &dyn Fn(&mut Autoencoder, f32)| {
            let mut plus = model.clone();
            perturb(&mut plus, eps);
            let mut minus = model.clone();
            perturb(&mut minus, -eps);
            let numeric =
                (plus.reconstruction_error(&seq) - minus.reconstruction_error(&seq)) / (2.0 * eps);
            assert!(
                (numeric - analytic).abs() <= 1e-3 + 5e-2 * analytic.abs().max(numeric.abs()),
                "numeric {numeric} vs analytic {analytic}"
            );
        };

        check(grads.encoder.w_ih[(0, 0)], &|m, e| m.encoder.w_ih[(0, 0)] += e);
        check(grads.encoder.w_hh[(5, 2)], &|m, e| m.encoder.w_hh[(5, 2)] += e);
        check(grads.decoder.w_ih[(3, 1)], &|m, e| m.decoder.w_ih[(3, 1)] += e);
        check(grads.decoder.b[7], &|m, e| m.decoder.b[7] += e);
        check(grads.out_w[(0, 2)], &|m, e| m.output.w[(0, 2)] += e);
        check(grads.out_b[0], &|m, e| m.output.b[0] += e);
    }
}
