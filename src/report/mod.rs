//! Run outputs: confusion matrix CSV and PNG, JSON run summary

use std::path::{Path, PathBuf};

use tracing::{info, instrument};

mod csv;
mod font;
pub mod plot;
pub mod summary;

pub use self::csv::write_confusion_csv;
pub use plot::{render_confusion_matrix, write_confusion_png};
pub use summary::{PartitionSizes, RunSummary};

use crate::error::{Error, Result};
use crate::training::ConfusionMatrix;
use crate::utils::io::ensure_dir_exists;

/// Locations of the confusion matrix files of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionOutputs {
    /// Count grid as CSV
    pub csv: PathBuf,
    /// Heatmap as PNG
    pub png: PathBuf,
}

impl ConfusionOutputs {
    /// `confusion_matrix_<id>_<epochs>_epochs.{csv,png}` under `results_dir`
    pub fn new(results_dir: &Path, dataset: &str, epochs: usize) -> Self {
        let stem = format!("confusion_matrix_{dataset}_{epochs}_epochs");
        Self {
            csv: results_dir.join(format!("{stem}.csv")),
            png: results_dir.join(format!("{stem}.png")),
        }
    }
}

/// Create `results_dir` unless it exists; an existing non-directory is rejected
pub fn ensure_results_dir(results_dir: &Path) -> Result<()> {
    if results_dir.exists() && !results_dir.is_dir() {
        return Err(Error::report(format!(
            "results path {} is not a directory",
            results_dir.display()
        )));
    }
    ensure_dir_exists(results_dir)
}

/// Write the CSV and PNG renditions of `matrix`, creating `results_dir` if needed
#[instrument(skip(matrix), fields(size = matrix.size()))]
pub fn write_confusion_matrix(
    matrix: &ConfusionMatrix,
    results_dir: &Path,
    dataset: &str,
    epochs: usize,
) -> Result<ConfusionOutputs> {
    ensure_results_dir(results_dir)?;
    let outputs = ConfusionOutputs::new(results_dir, dataset, epochs);

    write_confusion_csv(matrix, &outputs.csv)?;
    write_confusion_png(matrix, &outputs.png)?;

    info!(
        "Confusion matrix saved to {} and {}",
        outputs.csv.display(),
        outputs.png.display()
    );
    Ok(outputs)
}
