//! # nalu-common — Shared Primitives
//!
//! Types shared across every crate in the workspace:
//!
//! * **[`GumbelNacConfig`]** / **[`RecurrentCellConfig`]** — layer
//!   hyper-parameters (serialised as JSON).
//! * **[`SummaryWriter`]** — instrumentation sink, with the no-op
//!   [`DummyWriter`] and the `tracing`-backed [`TracingWriter`].

pub mod config;
pub mod writer;

pub use config::{GumbelNacConfig, RecurrentCellConfig};
pub use writer::{DummyWriter, HistogramSummary, SummaryWriter, TracingWriter};
