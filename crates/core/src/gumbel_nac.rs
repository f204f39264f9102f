//! Gumbel NAC: a neural accumulator whose weights are relaxed ternary choices.
//!
//! Each weight `W[o, i]` owns two trainable logits. A third, fixed logit of
//! zero is appended, giving a categorical distribution over the outcomes
//! `[+1, -1, 0]`. Every forward pass draws a Gumbel-Softmax sample from that
//! distribution and reduces it to a scalar weight, then applies a bias-free
//! linear map. Lowering the temperature `τ` drives the samples toward
//! one-hot vectors, so a trained layer behaves like exact addition and
//! subtraction of its inputs.
//!
//! # Two-parameter encoding
//!
//! With only two free logits per weight, equal logits that are both pushed
//! far below zero leave the fixed zero logit dominant, i.e. `w = 0`. A full
//! three-logit softmax would have a redundant degree of freedom; this one
//! does not. The third column is never a `Var` and never changes.
//!
//! # Thread safety
//!
//! Temperature and the noise buffer sit behind [`parking_lot::Mutex`], so the
//! layer is `Send + Sync`. Noise reuse is still per instance: interleaving
//! forward calls from several threads mixes their draws.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use candle_core::{bail, DType, Result, Tensor, Var, D};
use candle_nn::{Init, Module, VarBuilder};

use nalu_common::{GumbelNacConfig, SummaryWriter};

use crate::functional::{
    batch_linear, matmul_reshape, reduce_to_weights, sample_gumbel_softmax, NoiseBuffer,
    NUM_OUTCOMES, TARGET_WEIGHTS,
};

/// Trainable logits start at zero; randomness comes from the Gumbel noise.
const LOGIT_INIT: Init = Init::Const(0.0);

/// Outcome scan order used to break ties in [`GumbelNacLayer::discrete_weights`]:
/// zero first, then +1, then -1.
const TIE_ORDER: [usize; NUM_OUTCOMES] = [2, 0, 1];

pub struct GumbelNacLayer {
    in_features: usize,
    out_features: usize,
    sample_each_observation: bool,
    gumbel_eps: f64,
    /// Trainable logits, (out, in, 2).
    w_hat: Var,
    /// Fixed zero logit, (out, in, 1).
    w_hat_k: Tensor,
    /// `[1, -1, 0]`.
    target_weights: Tensor,
    tau: Mutex<f64>,
    noise: Mutex<NoiseBuffer>,
    writer: Arc<dyn SummaryWriter>,
}

impl GumbelNacLayer {
    /// Build the layer. `vb` is scoped to the layer prefix; the trainable
    /// logits are registered as `W_hat`.
    pub fn new(
        config: &GumbelNacConfig,
        writer: Arc<dyn SummaryWriter>,
        vb: VarBuilder,
    ) -> Result<Self> {
        let (in_features, out_features) = (config.in_features, config.out_features);
        if in_features == 0 || out_features == 0 {
            bail!(
                "gumbel nac needs positive dimensions, got in_features={in_features} out_features={out_features}"
            );
        }
        if config.tau_init.is_nan() || config.tau_init <= 0.0 {
            bail!("gumbel nac temperature must be positive, got {}", config.tau_init);
        }

        let w_hat = vb.get_with_hints((out_features, in_features, 2), "W_hat", LOGIT_INIT)?;
        let w_hat = Var::from_tensor(&w_hat)?;
        let dtype = w_hat.dtype();
        let device = vb.device();
        let w_hat_k = Tensor::zeros((out_features, in_features, 1), dtype, device)?;
        let target_weights = Tensor::new(&TARGET_WEIGHTS, device)?.to_dtype(dtype)?;

        tracing::debug!(
            in_features,
            out_features,
            sample_each_observation = config.sample_each_observation,
            tau = config.tau_init,
            "gumbel nac layer created"
        );

        Ok(Self {
            in_features,
            out_features,
            sample_each_observation: config.sample_each_observation,
            gumbel_eps: config.gumbel_eps,
            w_hat,
            w_hat_k,
            target_weights,
            tau: Mutex::new(config.tau_init),
            noise: Mutex::new(NoiseBuffer::new(config.seed)),
            writer,
        })
    }

    /// Zero the trainable logits and set `τ = 1`.
    pub fn reset_parameters(&self) -> Result<()> {
        self.w_hat.set(&self.w_hat.zeros_like()?)?;
        *self.tau.lock() = 1.0;
        Ok(())
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn sample_each_observation(&self) -> bool {
        self.sample_each_observation
    }

    /// Trainable logits, for handing to an optimiser.
    pub fn w_hat(&self) -> &Var {
        &self.w_hat
    }

    pub fn tau(&self) -> f64 {
        *self.tau.lock()
    }

    /// Set the temperature. No validation: a non-positive `τ` yields NaN or
    /// infinities on the next forward pass.
    pub fn set_tau(&self, tau: f64) {
        *self.tau.lock() = tau;
    }

    /// Shape of the current noise buffer, `None` before the first draw.
    pub fn noise_shape(&self) -> Option<Vec<usize>> {
        self.noise.lock().shape().map(|s| s.to_vec())
    }

    /// Full (out, in, 3) logits: trainable columns followed by the zero column.
    pub fn full_logits(&self) -> Result<Tensor> {
        Tensor::cat(&[self.w_hat.as_tensor(), &self.w_hat_k], D::Minus1)
    }

    /// `log_softmax` of the full logits over the outcome dimension.
    pub fn log_probabilities(&self) -> Result<Tensor> {
        candle_nn::ops::log_softmax(&self.full_logits()?, D::Minus1)
    }

    /// Noise-free weights `softmax(logits) · [1, -1, 0]`, shape (out, in).
    pub fn expected_weights(&self) -> Result<Tensor> {
        reduce_to_weights(&self.log_probabilities()?.exp()?, &self.target_weights)
    }

    /// The crisp weight each position converges to: the target value of the
    /// most likely outcome. Ties resolve toward 0, then +1, then -1.
    pub fn discrete_weights(&self) -> Result<Tensor> {
        let log_pi = self.log_probabilities()?.to_dtype(DType::F32)?;
        let rows = log_pi.to_vec3::<f32>()?;
        let mut values = Vec::with_capacity(self.out_features * self.in_features);
        for row in &rows {
            for outcomes in row {
                let mut best = TIE_ORDER[0];
                for &k in &TIE_ORDER[1..] {
                    if outcomes[k] > outcomes[best] {
                        best = k;
                    }
                }
                values.push(TARGET_WEIGHTS[best]);
            }
        }
        Tensor::from_vec(
            values,
            (self.out_features, self.in_features),
            self.w_hat.device(),
        )
    }

    /// Count {-1, 0, +1} in the discrete weights.
    pub fn debug_weight_distribution(&self) -> Result<(u64, u64, u64)> {
        let flat = self.discrete_weights()?.flatten_all()?.to_vec1::<f32>()?;
        let (mut n_neg, mut n_zero, mut n_pos) = (0u64, 0u64, 0u64);
        for &v in &flat {
            if v < -0.5 {
                n_neg += 1;
            } else if v > 0.5 {
                n_pos += 1;
            } else {
                n_zero += 1;
            }
        }
        Ok((n_neg, n_zero, n_pos))
    }

    /// Push temperature and weight statistics to the writer.
    pub fn log_summary(&self) -> Result<()> {
        if !self.writer.is_enabled() {
            return Ok(());
        }
        self.writer.add_scalar("tau", self.tau());
        let expected = self
            .expected_weights()?
            .to_dtype(DType::F32)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        self.writer.add_histogram("W_expected", &expected);
        let (neg, zero, pos) = self.debug_weight_distribution()?;
        self.writer.add_scalar("W_discrete/neg", neg as f64);
        self.writer.add_scalar("W_discrete/zero", zero as f64);
        self.writer.add_scalar("W_discrete/pos", pos as f64);
        Ok(())
    }

    /// Forward pass: `input` (..., in) → (..., out).
    ///
    /// * `reuse = false` draws fresh Gumbel noise.
    /// * `reuse = true` re-evaluates with the previous draw, provided the
    ///   noise shape is unchanged.
    ///
    /// With `sample_each_observation`, `input` must be (batch, in) and each
    /// observation gets its own weight matrix.
    pub fn forward(&self, input: &Tensor, reuse: bool) -> Result<Tensor> {
        let log_pi = self.log_probabilities()?;
        let tau = self.tau();

        let w = {
            let mut noise = self.noise.lock();
            if self.sample_each_observation {
                let obs = input.dim(0)?;
                let log_pi = log_pi.unsqueeze(0)?.broadcast_as((
                    obs,
                    self.out_features,
                    self.in_features,
                    NUM_OUTCOMES,
                ))?;
                let y = sample_gumbel_softmax(&mut noise, &log_pi, tau, reuse, self.gumbel_eps)?;
                reduce_to_weights(&y, &self.target_weights)?
            } else {
                let y = sample_gumbel_softmax(&mut noise, &log_pi, tau, reuse, self.gumbel_eps)?;
                reduce_to_weights(&y, &self.target_weights)?
            }
        };

        if self.writer.is_enabled() {
            self.writer.add_scalar("tau", tau);
            let sampled = w.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
            self.writer.add_histogram("W", &sampled);
        }

        if self.sample_each_observation {
            batch_linear(input, &w)
        } else {
            matmul_reshape(input, &w.t()?)
        }
    }
}

impl Module for GumbelNacLayer {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.forward(x, false)
    }
}

impl fmt::Display for GumbelNacLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GumbelNacLayer(in_features={}, out_features={})",
            self.in_features, self.out_features
        )
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;
    use nalu_common::DummyWriter;

    fn layer(config: GumbelNacConfig) -> (GumbelNacLayer, VarMap) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let layer = GumbelNacLayer::new(&config, DummyWriter::shared(), vb.pp("nac")).unwrap();
        layer.reset_parameters().unwrap();
        (layer, varmap)
    }

    fn seeded(in_features: usize, out_features: usize) -> GumbelNacConfig {
        GumbelNacConfig {
            seed: Some(1234),
            ..GumbelNacConfig::new(in_features, out_features)
        }
    }

    fn input(batch: usize, in_features: usize) -> Tensor {
        Tensor::arange(0f32, (batch * in_features) as f32, &Device::Cpu)
            .unwrap()
            .reshape((batch, in_features))
            .unwrap()
    }

    #[test]
    fn output_shape() {
        let (layer, _) = layer(seeded(4, 3));
        let y = layer.forward(&input(5, 4), false).unwrap();
        assert_eq!(y.dims(), &[5, 3]);
        assert_eq!(layer.noise_shape(), Some(vec![3, 4, 3]));
    }

    #[test]
    fn output_shape_with_time_dim() {
        let (layer, _) = layer(seeded(4, 2));
        let x = Tensor::ones((2, 7, 4), DType::F32, &Device::Cpu).unwrap();
        let y = layer.forward(&x, false).unwrap();
        assert_eq!(y.dims(), &[2, 7, 2]);
    }

    #[test]
    fn per_observation_noise_shape() {
        let config = GumbelNacConfig {
            sample_each_observation: true,
            ..seeded(4, 3)
        };
        let (layer, _) = layer(config);
        let y = layer.forward(&input(6, 4), false).unwrap();
        assert_eq!(y.dims(), &[6, 3]);
        assert_eq!(layer.noise_shape(), Some(vec![6, 3, 4, 3]));

        // Batch size change resizes the buffer.
        let y = layer.forward(&input(2, 4), true).unwrap();
        assert_eq!(y.dims(), &[2, 3]);
        assert_eq!(layer.noise_shape(), Some(vec![2, 3, 4, 3]));
    }

    #[test]
    fn reuse_is_deterministic() {
        let (layer, _) = layer(seeded(8, 8));
        let x = input(3, 8);
        let a = layer.forward(&x, false).unwrap().to_vec2::<f32>().unwrap();
        let b = layer.forward(&x, true).unwrap().to_vec2::<f32>().unwrap();
        let c = layer.forward(&x, true).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn reuse_is_deterministic_per_observation() {
        let config = GumbelNacConfig {
            sample_each_observation: true,
            ..seeded(5, 4)
        };
        let (layer, _) = layer(config);
        let x = input(3, 5);
        let a = layer.forward(&x, false).unwrap().to_vec2::<f32>().unwrap();
        let b = layer.forward(&x, true).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fresh_noise_changes_output() {
        let (layer, _) = layer(seeded(8, 8));
        let x = input(3, 8);
        let a = layer.forward(&x, false).unwrap().to_vec2::<f32>().unwrap();
        let b = layer.forward(&x, false).unwrap().to_vec2::<f32>().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn reset_gives_uniform_log_probabilities() {
        let (layer, _) = layer(seeded(3, 2));
        layer.set_tau(0.25);
        layer
            .w_hat()
            .set(&Tensor::ones((2, 3, 2), DType::F32, &Device::Cpu).unwrap())
            .unwrap();
        layer.reset_parameters().unwrap();
        assert_eq!(layer.tau(), 1.0);
        let expected = -(3f32.ln());
        for v in layer
            .log_probabilities()
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()
        {
            assert!((v - expected).abs() < 1e-6);
        }
        for v in layer
            .expected_weights()
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()
        {
            assert!(v.abs() < 1e-6);
        }
    }

    #[test]
    fn fixed_logit_column_stays_zero() {
        let (layer, _) = layer(seeded(2, 2));
        layer
            .w_hat()
            .set(&Tensor::new(&[[[3f32, -2.], [0.5, 0.5]], [[-1., 4.], [9., 9.]]], &Device::Cpu).unwrap())
            .unwrap();
        let full = layer.full_logits().unwrap();
        assert_eq!(full.dims(), &[2, 2, 3]);
        let last = full
            .narrow(2, 2, 1)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(last, vec![0.0; 4]);
    }

    #[test]
    fn discrete_weights_follow_argmax() {
        let (layer, _) = layer(seeded(2, 2));
        // [+1 wins, -1 wins], [zero wins, tie -> zero]
        layer
            .w_hat()
            .set(
                &Tensor::new(&[[[3f32, -2.], [0.5, 2.]], [[-4., -4.], [0., 0.]]], &Device::Cpu)
                    .unwrap(),
            )
            .unwrap();
        let w = layer.discrete_weights().unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(w, vec![vec![1.0, -1.0], vec![0.0, 0.0]]);
        assert_eq!(layer.debug_weight_distribution().unwrap(), (1, 2, 1));
    }

    #[test]
    fn converged_layer_adds_and_subtracts() {
        let (layer, _) = layer(seeded(3, 1));
        // Learn y = x0 - x1 (x2 ignored).
        layer
            .w_hat()
            .set(&Tensor::new(&[[[30f32, 0.], [0., 30.], [-30., -30.]]], &Device::Cpu).unwrap())
            .unwrap();
        layer.set_tau(1e-3);
        let x = Tensor::new(&[[5f32, 2., 100.], [-1., 4., 7.]], &Device::Cpu).unwrap();
        let y = layer.forward(&x, false).unwrap().to_vec2::<f32>().unwrap();
        assert!((y[0][0] - 3.0).abs() < 1e-4, "{y:?}");
        assert!((y[1][0] + 5.0).abs() < 1e-4, "{y:?}");
    }

    #[test]
    fn gradients_reach_trainable_logits() {
        let (layer, _) = layer(seeded(3, 2));
        let x = input(4, 3);
        let loss = layer.forward(&x, false).unwrap().sqr().unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        let g = grads.get(layer.w_hat().as_tensor()).expect("no grad for W_hat");
        assert_eq!(g.dims(), &[2, 3, 2]);
        let norm = g.sqr().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert!(norm > 0.0);
    }

    #[test]
    fn only_two_logits_per_weight_are_registered() {
        let (_layer, varmap) = layer(seeded(5, 3));
        let vars = varmap.all_vars();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].dims(), &[3, 5, 2]);
    }

    #[test]
    fn checkpoint_round_trip_through_varmap() {
        let (layer_a, varmap_a) = layer(seeded(2, 2));
        layer_a
            .w_hat()
            .set(&Tensor::new(&[[[1f32, 2.], [3., 4.]], [[5., 6.], [7., 8.]]], &Device::Cpu).unwrap())
            .unwrap();
        let path = std::env::temp_dir().join(format!("nalu-nac-{}.safetensors", std::process::id()));
        varmap_a.save(&path).unwrap();

        let (layer_b, mut varmap_b) = layer(seeded(2, 2));
        varmap_b.load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(
            layer_a.full_logits().unwrap().to_vec3::<f32>().unwrap(),
            layer_b.full_logits().unwrap().to_vec3::<f32>().unwrap()
        );
    }

    #[test]
    fn rejects_empty_dimensions() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(GumbelNacLayer::new(&GumbelNacConfig::new(0, 3), DummyWriter::shared(), vb).is_err());
    }

    #[test]
    fn input_width_mismatch_is_an_error() {
        let (layer, _) = layer(seeded(4, 2));
        assert!(layer.forward(&input(2, 3), false).is_err());
    }

    #[test]
    fn forward_records_tau_and_sampled_weights() {
        let writer = crate::test_support::RecordingWriter::new();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let layer = GumbelNacLayer::new(&seeded(4, 3), Arc::new(writer.clone()), vb).unwrap();
        layer.reset_parameters().unwrap();
        layer.set_tau(0.5);
        layer.forward(&input(2, 4), false).unwrap();
        assert_eq!(writer.tags(), vec!["tau".to_string(), "W".to_string()]);
        assert_eq!(writer.last("tau"), Some(0.5));
        assert_eq!(writer.last("W"), Some(12.0));
    }

    #[test]
    fn summary_records_discrete_weight_counts() {
        let writer = crate::test_support::RecordingWriter::new();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let layer = GumbelNacLayer::new(&seeded(2, 2), Arc::new(writer.clone()), vb).unwrap();
        layer
            .w_hat()
            .set(
                &Tensor::new(&[[[3f32, -2.], [0.5, 2.]], [[-4., -4.], [0., 0.]]], &Device::Cpu)
                    .unwrap(),
            )
            .unwrap();
        layer.log_summary().unwrap();
        let (neg, zero, pos) = layer.debug_weight_distribution().unwrap();
        assert_eq!(writer.last("tau"), Some(1.0));
        assert_eq!(writer.last("W_expected"), Some(4.0));
        assert_eq!(writer.last("W_discrete/neg"), Some(neg as f64));
        assert_eq!(writer.last("W_discrete/zero"), Some(zero as f64));
        assert_eq!(writer.last("W_discrete/pos"), Some(pos as f64));
        assert_eq!((neg, zero, pos), (1, 2, 1));
    }

    #[test]
    fn half_precision_layer_forward_is_finite() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F16, &Device::Cpu);
        let layer = GumbelNacLayer::new(&seeded(64, 64), DummyWriter::shared(), vb).unwrap();
        layer.reset_parameters().unwrap();
        let x = Tensor::ones((2, 64), DType::F16, &Device::Cpu).unwrap();
        for _ in 0..5 {
            let y = layer.forward(&x, false).unwrap().to_dtype(DType::F32).unwrap();
            let values = y.flatten_all().unwrap().to_vec1::<f32>().unwrap();
            assert!(values.iter().all(|v| v.is_finite()), "{values:?}");
        }
    }

    #[test]
    fn display_shows_dimensions() {
        let (layer, _) = layer(seeded(4, 2));
        assert_eq!(layer.to_string(), "GumbelNacLayer(in_features=4, out_features=2)");
    }
}
