//! Instrumentation sink handed to every layer at construction.
//!
//! Layers never decide where their statistics go. They push scalars and
//! histograms into a [`SummaryWriter`]; the caller picks the sink:
//!
//! * [`DummyWriter`] drops everything (the default).
//! * [`TracingWriter`] turns every record into a `tracing` event, so the
//!   usual `RUST_LOG` filtering applies.

use std::sync::Arc;

/// Destination for layer statistics.
pub trait SummaryWriter: Send + Sync {
    /// Record a single scalar under `tag`.
    fn add_scalar(&self, tag: &str, value: f64);

    /// Record a set of values under `tag`.
    fn add_histogram(&self, tag: &str, values: &[f32]);

    /// A writer whose tags are prefixed with `name/`.
    fn namespace(&self, name: &str) -> Arc<dyn SummaryWriter>;

    /// Whether records are kept at all. Layers skip expensive host copies
    /// when this is `false`.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// No-op writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyWriter;

impl DummyWriter {
    pub fn shared() -> Arc<dyn SummaryWriter> {
        Arc::new(Self)
    }
}

impl SummaryWriter for DummyWriter {
    fn add_scalar(&self, _tag: &str, _value: f64) {}

    fn add_histogram(&self, _tag: &str, _values: &[f32]) {}

    fn namespace(&self, _name: &str) -> Arc<dyn SummaryWriter> {
        Arc::new(Self)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Writer that emits `tracing` events at `DEBUG` level.
///
/// Histograms are summarised (count, min, mean, max) rather than dumped.
#[derive(Debug, Clone, Default)]
pub struct TracingWriter {
    prefix: String,
}

impl TracingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<dyn SummaryWriter> {
        Arc::new(Self::new())
    }

    /// Fully qualified tag for `tag` under this writer's namespace.
    pub fn qualify(&self, tag: &str) -> String {
        if self.prefix.is_empty() {
            tag.to_string()
        } else {
            format!("{}/{tag}", self.prefix)
        }
    }
}

impl SummaryWriter for TracingWriter {
    fn add_scalar(&self, tag: &str, value: f64) {
        tracing::debug!(tag = %self.qualify(tag), value, "scalar");
    }

    fn add_histogram(&self, tag: &str, values: &[f32]) {
        let summary = HistogramSummary::of(values);
        tracing::debug!(
            tag = %self.qualify(tag),
            count = summary.count,
            min = summary.min,
            mean = summary.mean,
            max = summary.max,
            "histogram"
        );
    }

    fn namespace(&self, name: &str) -> Arc<dyn SummaryWriter> {
        Arc::new(Self {
            prefix: self.qualify(name),
        })
    }
}

/// Count / min / mean / max of a set of values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramSummary {
    pub count: usize,
    pub min: f32,
    pub mean: f32,
    pub max: f32,
}

impl HistogramSummary {
    /// Summarise `values`. An empty slice yields zeros.
    pub fn of(values: &[f32]) -> Self {
        if values.is_empty() {
            return Self {
                count: 0,
                min: 0.0,
                mean: 0.0,
                max: 0.0,
            };
        }
        let (min, max, sum) = values.iter().fold(
            (f32::INFINITY, f32::NEG_INFINITY, 0.0f64),
            |(lo, hi, sum), &v| (lo.min(v), hi.max(v), sum + v as f64),
        );
        Self {
            count: values.len(),
            min,
            mean: (sum / values.len() as f64) as f32,
            max,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
