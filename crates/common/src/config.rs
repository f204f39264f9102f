//! Layer configuration for Gumbel NAC.
//!
//! Serialised as JSON next to checkpoints. Every field except the two
//! dimensions has a `#[serde(default)]`, so old or hand-written configs keep
//! loading as new knobs are added.

use serde::{Deserialize, Serialize};

/// Hyper-parameters of a single `GumbelNacLayer` (see `nalu-core`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GumbelNacConfig {
    // ── Dimensions ──────────────────────────────────────────────────────────
    /// Number of ingoing features.
    pub in_features: usize,
    /// Number of outgoing features.
    pub out_features: usize,

    // ── Sampling ────────────────────────────────────────────────────────────
    /// Draw a separate weight matrix for every observation in the batch
    /// instead of one matrix shared by the whole batch.
    #[serde(default)]
    pub sample_each_observation: bool,
    /// Gumbel-Softmax temperature at construction. `reset_parameters`
    /// always brings it back to 1.
    #[serde(default = "default_tau")]
    pub tau_init: f64,
    /// Guard added inside both logarithms of the Gumbel transform.
    #[serde(default = "default_gumbel_eps")]
    pub gumbel_eps: f64,
    /// Seed for the uniform noise buffer (`None` = OS entropy).
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_tau() -> f64 {
    1.0
}
fn default_gumbel_eps() -> f64 {
    1e-10
}

impl Default for GumbelNacConfig {
    fn default() -> Self {
        Self {
            in_features: 2,
            out_features: 1,
            sample_each_observation: false,
            tau_init: 1.0,
            gumbel_eps: 1e-10,
            seed: None,
        }
    }
}

impl GumbelNacConfig {
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self {
            in_features,
            out_features,
            ..Default::default()
        }
    }

    /// Number of trainable scalars: two free logits per weight.
    pub fn num_parameters(&self) -> usize {
        self.in_features * self.out_features * 2
    }

    /// Save config to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load config from a JSON file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }
}

/// Configuration of a recurrent Gumbel NAC cell.
///
/// The wrapped layer sees the concatenation `[x_t, h_{t-1}]`, so its input
/// width is `input_size + hidden_size`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrentCellConfig {
    pub input_size: usize,
    pub hidden_size: usize,
    #[serde(default)]
    pub sample_each_observation: bool,
    #[serde(default = "default_tau")]
    pub tau_init: f64,
    #[serde(default = "default_gumbel_eps")]
    pub gumbel_eps: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl RecurrentCellConfig {
    pub fn new(input_size: usize, hidden_size: usize) -> Self {
        Self {
            input_size,
            hidden_size,
            sample_each_observation: false,
            tau_init: default_tau(),
            gumbel_eps: default_gumbel_eps(),
            seed: None,
        }
    }

    /// Config of the layer the cell wraps.
    pub fn layer_config(&self) -> GumbelNacConfig {
        GumbelNacConfig {
            in_features: self.input_size + self.hidden_size,
            out_features: self.hidden_size,
            sample_each_observation: self.sample_each_observation,
            tau_init: self.tau_init,
            gumbel_eps: self.gumbel_eps,
            seed: self.seed,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
