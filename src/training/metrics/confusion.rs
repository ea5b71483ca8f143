//! Confusion matrix over true and predicted labels

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::warn;

use crate::error::{Error, Result};

/// Square count grid: row `i` is true label `labels[i]`, column `j` is predicted label `labels[j]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    labels: Vec<u32>,
    counts: Vec<Vec<u64>>,
}

impl ConfusionMatrix {
    /// Matrix over the sorted union of the observed labels
    pub fn from_predictions(references: &[u32], predictions: &[u32]) -> Result<Self> {
        let labels: BTreeSet<u32> = references.iter().chain(predictions).copied().collect();
        Self::with_labels(labels.into_iter().collect(), references, predictions)
    }

    /// Matrix over a fixed label set; pairs involving other labels are skipped
    pub fn with_labels(labels: Vec<u32>, references: &[u32], predictions: &[u32]) -> Result<Self> {
        if references.len() != predictions.len() {
            return Err(Error::metric(format!(
                "{} references for {} predictions",
                references.len(),
                predictions.len()
            )));
        }

        let index: HashMap<u32, usize> = labels.iter().enumerate().map(|(i, l)| (*l, i)).collect();
        if index.len() != labels.len() {
            return Err(Error::metric("confusion matrix labels must be unique"));
        }

        let mut counts = vec![vec![0u64; labels.len()]; labels.len()];
        let mut skipped = 0usize;
        for (truth, predicted) in references.iter().zip(predictions) {
            match (index.get(truth), index.get(predicted)) {
                (Some(&row), Some(&col)) => counts[row][col] += 1,
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!("{} records fall outside the confusion matrix labels", skipped);
        }

        Ok(Self { labels, counts })
    }

    /// Row and column labels
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Count rows
    pub fn counts(&self) -> &[Vec<u64>] {
        &self.counts
    }

    /// Number of rows (and columns)
    pub fn size(&self) -> usize {
        self.labels.len()
    }

    /// Count at row `i`, column `j`
    pub fn get(&self, i: usize, j: usize) -> u64 {
        self.counts[i][j]
    }

    /// Records counted in the matrix
    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    /// Records whose true label is `labels[i]`
    pub fn row_sum(&self, i: usize) -> u64 {
        self.counts[i].iter().sum()
    }

    /// Largest cell value
    pub fn max_count(&self) -> u64 {
        self.counts.iter().flatten().copied().max().unwrap_or(0)
    }
}
