//! Confusion matrix as CSV

use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::training::ConfusionMatrix;

/// Write `matrix` with a header of column positions `0..n-1` and no row index
pub fn write_confusion_csv(matrix: &ConfusionMatrix, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    if matrix.size() > 0 {
        writer.write_record((0..matrix.size()).map(|i| i.to_string()))?;
    }
    for row in matrix.counts() {
        writer.write_record(row.iter().map(|c| c.to_string()))?;
    }
    writer.flush()?;

    debug!("Wrote {}x{} confusion matrix to {}", matrix.size(), matrix.size(), path.display());
    Ok(())
}
