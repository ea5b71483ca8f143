//! Evaluation metrics
//!
//! [`Accuracy`] follows an explicit accumulate, compute, reset lifecycle.
//! [`ConfusionMatrix`] summarises the final evaluation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod accuracy;
pub mod confusion;

pub use accuracy::Accuracy;
pub use confusion::ConfusionMatrix;

/// Result of one evaluation pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    /// Fraction of correct predictions
    pub accuracy: f64,
}

/// Per-epoch reports keyed by epoch index
pub type EpochMetrics = BTreeMap<usize, MetricReport>;
