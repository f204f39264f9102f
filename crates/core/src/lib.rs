//! # nalu-core — Gumbel Neural Accumulator
//!
//! A NAC layer whose weights are learned as relaxed choices between the
//! discrete values {+1, -1, 0}:
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`functional`] | noise buffer, Gumbel-Softmax sampling, weight reduction, linear maps |
//! | [`gumbel_nac`] | `GumbelNacLayer` |
//! | [`recurrent`] | `ArithmeticLayer`, `RecurrentCell`, `GumbelNacCell` |
//! | [`schedule`] | `TauSchedule` temperature annealing |
//!
//! ## Design principles
//!
//! 1. **Pure candle.** Gradients, parameter registration and checkpointing
//!    all go through `candle-core` / `candle-nn` (`Var`, `VarBuilder`,
//!    `VarMap`).
//! 2. **`Send + Sync`.** Mutable state (temperature, noise buffer) uses
//!    `parking_lot::Mutex`, not `RefCell`.
//! 3. **Reproducible on request.** A seeded config plus `reuse = true`
//!    gives bit-identical forward passes.

pub mod functional;
pub mod gumbel_nac;
pub mod recurrent;
pub mod schedule;

#[cfg(test)]
pub(crate) mod test_support;

// ── Public re-exports ───────────────────────────────────────────────────────

pub use functional::{
    batch_linear, gumbel_from_uniform, matmul_reshape, reduce_to_weights, sample_gumbel_softmax,
    NoiseBuffer, TARGET_WEIGHTS,
};
pub use gumbel_nac::GumbelNacLayer;
pub use recurrent::{ArithmeticLayer, GumbelNacCell, RecurrentCell};
pub use schedule::{TauDecay, TauSchedule, MIN_TAU};
