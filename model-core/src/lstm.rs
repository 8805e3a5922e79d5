//! Single-layer LSTM with backpropagation through time
//!
//! Gate order within the stacked weight matrices is (i, f, g, o).

use ndarray::{s, Array1, Array2};
use rand::rngs::StdRng;
use rand::Rng;

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub(crate) fn outer(a: &Array1<f32>, b: &Array1<f32>) -> Array2<f32> {
    Array2::from_shape_fn((a.len(), b.len()), |(i, j)| a[i] * b[j])
}

/// LSTM layer parameters.
#[derive(Debug, Clone)]
pub struct LstmLayer {
    pub input_size: usize,
    pub hidden_size: usize,
    /// Input weights, (4H, I).
    pub w_ih: Array2<f32>,
    /// Recurrent weights, (4H, H).
    pub w_hh: Array2<f32>,
    /// Gate biases, (4H).
    pub b: Array1<f32>,
}

/// Per-step activations kept for the backward pass.
pub struct LstmCache {
    xs: Vec<Array1<f32>>,
    h_prev: Vec<Array1<f32>>,
    c_prev: Vec<Array1<f32>>,
    i: Vec<Array1<f32>>,
    f: Vec<Array1<f32>>,
    g: Vec<Array1<f32>>,
    o: Vec<Array1<f32>>,
    tanh_c: Vec<Array1<f32>>,
}

/// Parameter gradients accumulated over a sequence.
pub struct LstmGrads {
    pub w_ih: Array2<f32>,
    pub w_hh: Array2<f32>,
    pub b: Array1<f32>,
}

impl LstmGrads {
    pub fn zeros(layer: &LstmLayer) -> Self {
        Self {
            w_ih: Array2::zeros(layer.w_ih.raw_dim()),
            w_hh: Array2::zeros(layer.w_hh.raw_dim()),
            b: Array1::zeros(layer.b.raw_dim()),
        }
    }

    pub fn accumulate(&mut self, other: &LstmGrads) {
        self.w_ih += &other.w_ih;
        self.w_hh += &other.w_hh;
        self.b += &other.b;
    }

    pub fn scale(&mut self, factor: f32) {
        self.w_ih *= factor;
        self.w_hh *= factor;
        self.b *= factor;
    }
}

impl LstmLayer {
    /// Fresh layer with weights uniform in ±1/sqrt(hidden) and zero biases.
    pub fn new(input_size: usize, hidden_size: usize, rng: &mut StdRng) -> Self {
        let bound = 1.0 / (hidden_size as f32).sqrt();
        let mut sample = |rows: usize, cols: usize| {
            Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-bound..bound))
        };
        let w_ih = sample(4 * hidden_size, input_size);
        let w_hh = sample(4 * hidden_size, hidden_size);
        Self {
            input_size,
            hidden_size,
            w_ih,
            w_hh,
            b: Array1::zeros(4 * hidden_size),
        }
    }

    /// Run the layer over a sequence from a zero state, returning the
    /// hidden state emitted at every step plus the cache `backward` needs.
    pub fn forward(&self, inputs: &[Array1<f32>]) -> (Vec<Array1<f32>>, LstmCache) {
        let h = self.hidden_size;
        let steps = inputs.len();
        let mut cache = LstmCache {
            xs: Vec::with_capacity(steps),
            h_prev: Vec::with_capacity(steps),
            c_prev: Vec::with_capacity(steps),
            i: Vec::with_capacity(steps),
            f: Vec::with_capacity(steps),
            g: Vec::with_capacity(steps),
            o: Vec::with_capacity(steps),
            tanh_c: Vec::with_capacity(steps),
        };
        let mut hs = Vec::with_capacity(steps);
        let mut h_t = Array1::<f32>::zeros(h);
        let mut c_t = Array1::<f32>::zeros(h);

        for x in inputs {
            let z = self.w_ih.dot(x) + self.w_hh.dot(&h_t) + &self.b;
            let i = z.slice(s![0..h]).mapv(sigmoid);
            let f = z.slice(s![h..2 * h]).mapv(sigmoid);
            let g = z.slice(s![2 * h..3 * h]).mapv(f32::tanh);
            let o = z.slice(s![3 * h..4 * h]).mapv(sigmoid);

            let c_next = &f * &c_t + &i * &g;
            let tanh_c = c_next.mapv(f32::tanh);
            let h_next = &o * &tanh_c;

            cache.xs.push(x.clone());
            cache.h_prev.push(h_t.clone());
            cache.c_prev.push(c_t.clone());
            cache.i.push(i);
            cache.f.push(f);
            cache.g.push(g);
            cache.o.push(o);
            cache.tanh_c.push(tanh_c);

            h_t = h_next;
            c_t = c_next;
            hs.push(h_t.clone());
        }

        (hs, cache)
    }

    /// Backpropagation through time. `dh_out[t]` is the loss gradient with
    /// respect to the hidden state emitted at step `t`. Returns parameter
    /// gradients and the gradient with respect to each input.
    pub fn backward(
        &self,
        cache: &LstmCache,
        dh_out: &[Array1<f32>],
    ) -> (LstmGrads, Vec<Array1<f32>>) {
        let h = self.hidden_size;
        let steps = cache.xs.len();
        let mut grads = LstmGrads::zeros(self);
        let mut dxs = vec![Array1::<f32>::zeros(self.input_size); steps];
        let mut dh_next = Array1::<f32>::zeros(h);
        let mut dc_next = Array1::<f32>::zeros(h);

        for t in (0..steps).rev() {
            let i = &cache.i[t];
            let f = &cache.f[t];
            let g = &cache.g[t];
            let o = &cache.o[t];
            let tanh_c = &cache.tanh_c[t];

            let dh = &dh_out[t] + &dh_next;
            let dc = &dh * o * &tanh_c.mapv(|v| 1.0 - v * v) + &dc_next;

            let dz_i = (&dc * g) * &i.mapv(|v| v * (1.0 - v));
            let dz_f = (&dc * &cache.c_prev[t]) * &f.mapv(|v| v * (1.0 - v));
            let dz_g = (&dc * i) * &g.mapv(|v| 1.0 - v * v);
            let dz_o = (&dh * tanh_c) * &o.mapv(|v| v * (1.0 - v));

            let mut dz = Array1::<f32>::zeros(4 * h);
            dz.slice_mut(s![0..h]).assign(&dz_i);
            dz.slice_mut(s![h..2 * h]).assign(&dz_f);
            dz.slice_mut(s![2 * h..3 * h]).assign(&dz_g);
            dz.slice_mut(s![3 * h..4 * h]).assign(&dz_o);

            grads.w_ih += &outer(&dz, &cache.xs[t]);
            grads.w_hh += &outer(&dz, &cache.h_prev[t]);
            grads.b += &dz;

            dxs[t] = self.w_ih.t().dot(&dz);
            dh_next = self.w_hh.t().dot(&dz);
            dc_next = &dc * f;
        }

        (grads, dxs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn inputs(values: &[f32]) -> Vec<Array1<f32>> {
        values.iter().map(|&v| Array1::from_vec(vec![v])).collect()
    }

    #[test]
    fn forward_emits_one_hidden_state_per_step() {
        let mut rng = StdRng::seed_from_u64(1);
        let layer = LstmLayer::new(1, 6, &mut rng);
        let (hs, _) = layer.forward(&inputs(&[0.1, 0.2, 0.3, 0.4]));
        assert_eq!(hs.len(), 4);
        assert!(hs.iter().all(|h| h.len() == 6));
    }

    #[test]
    fn forward_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(2);
        let layer = LstmLayer::new(1, 4, &mut rng);
        let xs = inputs(&[0.5, -0.25, 0.75]);
        let (a, _) = layer.forward(&xs);
        let (b, _) = layer.forward(&xs);
        assert_eq!(a, b);
    }

    #[test]
    fn zero_input_from_zero_state_stays_zero() {
        // With zero biases the candidate gate is tanh(0) = 0, so the cell
        // state never moves off zero.
        let mut rng = StdRng::seed_from_u64(3);
        let layer = LstmLayer::new(1, 5, &mut rng);
        let (hs, _) = layer.forward(&inputs(&[0.0, 0.0, 0.0]));
        for h in hs {
            assert!(h.iter().all(|&v| v == 0.0));
        }
    }
}
