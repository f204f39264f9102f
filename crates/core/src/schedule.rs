//! Temperature annealing for Gumbel-Softmax layers.
//!
//! A high `τ` keeps the relaxed samples smooth early in training; lowering it
//! makes them sharpen toward one-hot vectors, so the layer ends up selecting
//! crisp {-1, 0, +1} weights. The schedule only computes temperatures and
//! writes them into layers; the caller owns the training loop.

use crate::gumbel_nac::GumbelNacLayer;

/// Lowest temperature a schedule hands out.
pub const MIN_TAU: f64 = 1e-6;

/// Shape of the decay from `tau_start` to `tau_end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TauDecay {
    /// Straight line.
    Linear,
    /// Geometric interpolation (constant ratio per step).
    Exponential,
    /// Hold `tau_start`.
    None,
}

impl TauDecay {
    pub fn from_str(s: &str) -> Self {
        match s {
            "linear" => Self::Linear,
            "exponential" | "exp" => Self::Exponential,
            _ => Self::None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TauSchedule {
    tau_start: f64,
    tau_end: f64,
    anneal_steps: usize,
    decay: TauDecay,
}

impl TauSchedule {
    /// * `anneal_steps` — steps to reach `tau_end` (0 = always `tau_end`).
    ///
    /// Both temperatures are clamped to at least [`MIN_TAU`] (NaN becomes
    /// `MIN_TAU`), so every `tau_at` is finite and positive. Exponential decay
    /// from zero would otherwise divide by zero.
    pub fn new(tau_start: f64, tau_end: f64, anneal_steps: usize, decay: TauDecay) -> Self {
        Self {
            tau_start: tau_start.max(MIN_TAU),
            tau_end: tau_end.max(MIN_TAU),
            anneal_steps,
            decay,
        }
    }

    /// Temperature at `step`. Held at `tau_end` once annealing is over.
    pub fn tau_at(&self, step: usize) -> f64 {
        if self.decay == TauDecay::None {
            return self.tau_start;
        }
        if self.anneal_steps == 0 {
            return self.tau_end;
        }
        let progress = (step as f64 / self.anneal_steps as f64).min(1.0);
        match self.decay {
            TauDecay::Linear => self.tau_start + (self.tau_end - self.tau_start) * progress,
            TauDecay::Exponential => self.tau_start * (self.tau_end / self.tau_start).powf(progress),
            TauDecay::None => self.tau_start,
        }
    }

    /// Write the temperature for `step` into each layer.
    pub fn step<'a>(&self, step: usize, layers: impl IntoIterator<Item = &'a GumbelNacLayer>) {
        let tau = self.tau_at(step);
        for layer in layers {
            layer.set_tau(tau);
        }
        tracing::trace!(step, tau, "tau schedule advanced");
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
