//! Sampling primitives: uniform noise buffer, Gumbel-Softmax, weight reduction.
//!
//! A Gumbel NAC weight is a relaxed choice between the three outcomes
//! `[+1, -1, 0]`. Every forward pass:
//!
//! ```text
//! U ~ Uniform[0, 1)                       (fresh, or reused from last call)
//! g = -log(-log(U + ε) + ε)               (Gumbel noise)
//! y = softmax((log_π + g) / τ)            (relaxed one-hot, per weight)
//! w = y · [1, -1, 0]                      (scalar weight in [-1, 1])
//! ```
//!
//! `y` is a deterministic function of the logits and independent noise, so
//! gradients reach the logits through candle's backprop unchanged.

use candle_core::{DType, Device, Result, Tensor, D};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// The three discrete weight outcomes, in logit order. Zero is last so that
/// the fixed zero logit selects it.
pub const TARGET_WEIGHTS: [f32; 3] = [1.0, -1.0, 0.0];

/// Number of outcomes per weight.
pub const NUM_OUTCOMES: usize = TARGET_WEIGHTS.len();

// ── Noise buffer ────────────────────────────────────────────────────────────

/// Owned, resizable store of the last uniform draw.
///
/// The draw is always kept in F32, whatever the layer dtype: in F16 uniforms
/// close to 1 round to exactly 1 and `ε` underflows, which sends the Gumbel
/// transform to infinity.
///
/// Reallocation policy: a fresh draw happens when `reuse` is false, when the
/// buffer is empty, or when the requested shape differs from the stored one
/// (the batch size changed). Only a request with `reuse = true` and an
/// identical shape returns the stored noise.
///
/// Not reentrant: two interleaved callers sharing one buffer see each
/// other's draws.
pub struct NoiseBuffer {
    u: Option<Tensor>,
    rng: StdRng,
}

impl NoiseBuffer {
    /// `seed = None` seeds from OS entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self { u: None, rng }
    }

    /// Shape of the stored draw, if any.
    pub fn shape(&self) -> Option<&[usize]> {
        self.u.as_ref().map(|u| u.dims())
    }

    /// Drop the stored draw; the next request always samples.
    pub fn clear(&mut self) {
        self.u = None;
    }

    /// F32 uniform noise of `shape`, reused or redrawn per the policy above.
    pub fn uniform(&mut self, shape: &[usize], device: &Device, reuse: bool) -> Result<Tensor> {
        if reuse {
            if let Some(u) = &self.u {
                if u.dims() == shape && u.device().same_device(device) {
                    return Ok(u.clone());
                }
            }
            tracing::trace!(?shape, "noise buffer reallocated on reuse");
        }
        let n: usize = shape.iter().product();
        let values: Vec<f32> = (0..n).map(|_| self.rng.gen::<f32>()).collect();
        let u = Tensor::from_vec(values, shape, device)?;
        self.u = Some(u.clone());
        Ok(u)
    }
}

// ── Gumbel-Softmax ──────────────────────────────────────────────────────────

/// Gumbel noise from uniform noise: `-log(-log(u + ε) + ε)`.
///
/// Evaluated in F32; the result is cast to `dtype`.
pub fn gumbel_from_uniform(u: &Tensor, eps: f64, dtype: DType) -> Result<Tensor> {
    u.to_dtype(DType::F32)?
        .affine(1.0, eps)?
        .log()?
        .neg()?
        .affine(1.0, eps)?
        .log()?
        .neg()?
        .to_dtype(dtype)
}

/// Relaxed one-hot sample over the last dimension of `log_pi`.
///
/// The noise buffer is asked for noise of exactly `log_pi`'s shape, so a
/// `log_pi` broadcast over a leading batch dimension gets independent noise
/// per observation.
pub fn sample_gumbel_softmax(
    noise: &mut NoiseBuffer,
    log_pi: &Tensor,
    tau: f64,
    reuse: bool,
    eps: f64,
) -> Result<Tensor> {
    let u = noise.uniform(log_pi.dims(), log_pi.device(), reuse)?;
    let g = gumbel_from_uniform(&u, eps, log_pi.dtype())?;
    let perturbed = (log_pi + g)?.affine(1.0 / tau, 0.0)?;
    candle_nn::ops::softmax(&perturbed, D::Minus1)
}

/// Collapse the outcome dimension: `w = y · targets`.
pub fn reduce_to_weights(y: &Tensor, targets: &Tensor) -> Result<Tensor> {
    y.broadcast_mul(targets)?.sum(D::Minus1)
}

// ── Linear maps ─────────────────────────────────────────────────────────────

/// Reshape `x` to 2-D, multiply by `w_t`, reshape back.
///
/// Handles (B, K), (B, T, K) and arbitrary leading dims.
pub fn matmul_reshape(x: &Tensor, w_t: &Tensor) -> Result<Tensor> {
    let dims = x.dims();
    let out_dim = w_t.dim(1)?;
    match dims {
        [_, _] => x.matmul(w_t),
        _ => {
            let last = x.dim(D::Minus1)?;
            let prod: usize = dims[..dims.len() - 1].iter().product();
            let y = x.reshape((prod, last))?.matmul(w_t)?;
            let mut out_shape: Vec<usize> = dims[..dims.len() - 1].to_vec();
            out_shape.push(out_dim);
            y.reshape(out_shape.as_slice())
        }
    }
}

/// Per-observation linear map: `x` (B, in), `w` (B, out, in) → (B, out).
pub fn batch_linear(x: &Tensor, w: &Tensor) -> Result<Tensor> {
    let x_col = x.unsqueeze(2)?.contiguous()?;
    w.matmul(&x_col)?.squeeze(2)
}

// ── Tests ───────────────────────────────────────────────────────────────────
