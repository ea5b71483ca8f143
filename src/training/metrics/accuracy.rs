//! Accuracy accumulator

use tracing::warn;

use super::MetricReport;
use crate::error::{Error, Result};

/// Accumulates predictions and references batch by batch.
///
/// `compute` returns the report and clears the accumulator, so one instance
/// serves every evaluation pass.
#[derive(Debug, Default, Clone)]
pub struct Accuracy {
    correct: usize,
    total: usize,
}

impl Accuracy {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one batch; both slices must be index-aligned
    pub fn add_batch(&mut self, predictions: &[u32], references: &[u32]) -> Result<()> {
        if predictions.len() != references.len() {
            return Err(Error::metric(format!(
                "{} predictions for {} references",
                predictions.len(),
                references.len()
            )));
        }
        self.correct += predictions
            .iter()
            .zip(references)
            .filter(|(p, r)| p == r)
            .count();
        self.total += references.len();
        Ok(())
    }

    /// Accuracy over everything added since the last reset, then reset.
    ///
    /// An empty accumulator reports 0.0.
    pub fn compute(&mut self) -> MetricReport {
        let accuracy = if self.total == 0 {
            warn!("Computing accuracy over zero records");
            0.0
        } else {
            self.correct as f64 / self.total as f64
        };
        self.reset();
        MetricReport { accuracy }
    }

    /// Drop accumulated state
    pub fn reset(&mut self) {
        self.correct = 0;
        self.total = 0;
    }

    /// Records added since the last reset
    pub fn count(&self) -> usize {
        self.total
    }
}
