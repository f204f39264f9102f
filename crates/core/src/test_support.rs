//! Test-only helpers shared by the layer and cell tests.

use std::sync::Arc;

use parking_lot::Mutex;

use nalu_common::SummaryWriter;

/// Writer that keeps every record in memory. Histograms are stored as their
/// value count.
#[derive(Clone, Default)]
pub struct RecordingWriter {
    prefix: String,
    records: Arc<Mutex<Vec<(String, f64)>>>,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn qualify(&self, tag: &str) -> String {
        if self.prefix.is_empty() {
            tag.to_string()
        } else {
            format!("{}/{tag}", self.prefix)
        }
    }

    pub fn records(&self) -> Vec<(String, f64)> {
        self.records.lock().clone()
    }

    pub fn tags(&self) -> Vec<String> {
        self.records().into_iter().map(|(tag, _)| tag).collect()
    }

    /// Last value recorded under `tag`.
    pub fn last(&self, tag: &str) -> Option<f64> {
        self.records
            .lock()
            .iter()
            .rev()
            .find(|(t, _)| t == tag)
            .map(|(_, v)| *v)
    }
}

impl SummaryWriter for RecordingWriter {
    fn add_scalar(&self, tag: &str, value: f64) {
        self.records.lock().push((self.qualify(tag), value));
    }

    fn add_histogram(&self, tag: &str, values: &[f32]) {
        self.records
            .lock()
            .push((self.qualify(tag), values.len() as f64));
    }

    fn namespace(&self, name: &str) -> Arc<dyn SummaryWriter> {
        Arc::new(Self {
            prefix: self.qualify(name),
            records: Arc::clone(&self.records),
        })
    }
}
