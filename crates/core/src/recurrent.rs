//! Recurrent wrapper: turns an arithmetic layer into a single-step cell.
//!
//! ```text
//! h_t = op( [x_t, h_{t-1}] )
//! ```
//!
//! The wrapped layer is built with `input_size + hidden_size` inputs and
//! `hidden_size` outputs, and is called exactly once per time step.

use std::sync::Arc;

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::VarBuilder;

use nalu_common::{GumbelNacConfig, RecurrentCellConfig, SummaryWriter};

use crate::gumbel_nac::GumbelNacLayer;

/// A layer that a [`RecurrentCell`] can wrap.
pub trait ArithmeticLayer: Sized {
    fn build(
        config: &GumbelNacConfig,
        writer: Arc<dyn SummaryWriter>,
        vb: VarBuilder,
    ) -> Result<Self>;

    fn forward_step(&self, input: &Tensor, reuse: bool) -> Result<Tensor>;

    fn reset_parameters(&self) -> Result<()>;
}

impl ArithmeticLayer for GumbelNacLayer {
    fn build(
        config: &GumbelNacConfig,
        writer: Arc<dyn SummaryWriter>,
        vb: VarBuilder,
    ) -> Result<Self> {
        GumbelNacLayer::new(config, writer, vb)
    }

    fn forward_step(&self, input: &Tensor, reuse: bool) -> Result<Tensor> {
        self.forward(input, reuse)
    }

    fn reset_parameters(&self) -> Result<()> {
        GumbelNacLayer::reset_parameters(self)
    }
}

pub struct RecurrentCell<L> {
    op: L,
    input_size: usize,
    hidden_size: usize,
}

/// The Gumbel NAC as a recurrent cell.
pub type GumbelNacCell = RecurrentCell<GumbelNacLayer>;

impl<L: ArithmeticLayer> RecurrentCell<L> {
    /// The wrapped layer lives under `vb.pp("op")` and writes to the `op`
    /// namespace of `writer`.
    pub fn new(
        config: &RecurrentCellConfig,
        writer: Arc<dyn SummaryWriter>,
        vb: VarBuilder,
    ) -> Result<Self> {
        let op = L::build(&config.layer_config(), writer.namespace("op"), vb.pp("op"))?;
        Ok(Self {
            op,
            input_size: config.input_size,
            hidden_size: config.hidden_size,
        })
    }

    pub fn op(&self) -> &L {
        &self.op
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn reset_parameters(&self) -> Result<()> {
        self.op.reset_parameters()
    }

    /// Zero hidden state, (batch, hidden).
    pub fn initial_state(&self, batch: usize, dtype: DType, device: &Device) -> Result<Tensor> {
        Tensor::zeros((batch, self.hidden_size), dtype, device)
    }

    /// One step: `x_t` (batch, input), `h_prev` (batch, hidden) → (batch, hidden).
    pub fn forward(&self, x_t: &Tensor, h_prev: &Tensor, reuse: bool) -> Result<Tensor> {
        let xh = Tensor::cat(&[x_t, h_prev], 1)?;
        self.op.forward_step(&xh, reuse)
    }

    /// Run the cell over `xs` (batch, time, input) and return the final
    /// hidden state. `h0 = None` starts from zeros.
    pub fn unroll(&self, xs: &Tensor, h0: Option<&Tensor>, reuse: bool) -> Result<Tensor> {
        let (batch, steps, _) = xs.dims3()?;
        let mut h = match h0 {
            Some(h) => h.clone(),
            None => self.initial_state(batch, xs.dtype(), xs.device())?,
        };
        for t in 0..steps {
            let x_t = xs.narrow(1, t, 1)?.squeeze(1)?;
            h = self.forward(&x_t, &h, reuse)?;
        }
        Ok(h)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
