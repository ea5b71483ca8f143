//! JSON run summary

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::error::Result;
use crate::lora::LoraConfig;
use crate::training::{EpochMetrics, MetricReport};
use crate::utils::time::run_stamp;

/// Partition sizes after tokenization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionSizes {
    /// Training records
    pub train: usize,
    /// Test records
    pub test: usize,
    /// Eval records
    pub eval: usize,
}

/// Record of one run, written once at the end
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// Records per batch
    pub batch_size: usize,
    /// Pretrained model identifier
    pub model: String,
    /// Epochs run
    pub epochs: usize,
    /// Test accuracy per epoch
    pub metrics: EpochMetrics,
    /// Dataset identifier
    #[serde(rename = "conjunto")]
    pub dataset: String,
    /// Operator note
    #[serde(rename = "obs")]
    pub note: String,
    /// Collator padding side
    pub padding_side: String,
    /// Training records
    pub train_size: usize,
    /// Test records
    pub test_size: usize,
    /// Eval records
    pub eval_size: usize,
    /// Label classes of the head
    pub n_labels: usize,
    /// Accuracy of the final evaluation
    pub validation_metric: MetricReport,
    /// Run stamp, `%d-%m-%Y-%H-%M`
    pub date: String,
    /// Wall time in minutes
    pub processing_time: f64,
    /// Peak learning rate
    pub learning_rate: f64,
    /// Run seed
    pub seed: u64,
    /// Device the run executed on
    pub device: String,
    /// Adapter settings
    pub lora: LoraConfig,
}

impl RunSummary {
    /// Assemble the summary from the run configuration and its results
    pub fn new(
        config: &RunConfig,
        sizes: PartitionSizes,
        metrics: EpochMetrics,
        validation_metric: MetricReport,
        device: &str,
        finished_at: &DateTime<Local>,
        processing_minutes: f64,
    ) -> Self {
        Self {
            batch_size: config.training.batch_size,
            model: config.model.model_id.clone(),
            epochs: config.training.num_epochs,
            metrics,
            dataset: config.dataset.clone(),
            note: config.note.clone(),
            padding_side: config.data.padding_side.as_str().to_string(),
            train_size: sizes.train,
            test_size: sizes.test,
            eval_size: sizes.eval,
            n_labels: config.training.num_labels,
            validation_metric,
            date: run_stamp(finished_at),
            processing_time: processing_minutes,
            learning_rate: config.training.learning_rate,
            seed: config.training.seed,
            device: device.to_string(),
            lora: config.lora.clone(),
        }
    }

    /// `<date>-conjunto<id>-<epochs>-epochs.json`
    pub fn file_name(&self) -> String {
        format!("{}-conjunto{}-{}-epochs.json", self.date, self.dataset, self.epochs)
    }

    /// Write the summary into `results_dir` with 4-space indentation.
    ///
    /// A file from a run finished in the same minute is overwritten after a warning.
    pub fn write(&self, results_dir: &Path) -> Result<PathBuf> {
        super::ensure_results_dir(results_dir)?;
        let path = results_dir.join(self.file_name());
        if path.exists() {
            warn!("Overwriting existing run summary {}", path.display());
        }

        let mut writer = BufWriter::new(File::create(&path)?);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut writer, formatter);
        self.serialize(&mut serializer)?;
        writer.flush()?;

        info!("Run summary written to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn summary() -> RunSummary {
        let config = RunConfig::load("7", "baseline", None).unwrap();
        let mut metrics = EpochMetrics::new();
        metrics.insert(0, MetricReport { accuracy: 0.5 });
        metrics.insert(1, MetricReport { accuracy: 0.75 });
        let finished = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();

        RunSummary::new(
            &config,
            PartitionSizes { train: 10, test: 4, eval: 4 },
            metrics,
            MetricReport { accuracy: 1.0 },
            "cpu",
            &finished,
            1.5,
        )
    }

    #[test]
    fn test_file_name() {
        assert_eq!(summary().file_name(), "09-03-2024-14-05-conjunto7-5-epochs.json");
    }

    #[test]
    fn test_json_layout() {
        let dir = TempDir::new().unwrap();
        let path = summary().write(dir.path()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();

        assert!(content.starts_with("{\n    \"batch_size\": 5,"));
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["conjunto"], "7");
        assert_eq!(value["obs"], "baseline");
        assert_eq!(value["metrics"]["1"]["accuracy"], 0.75);
        assert_eq!(value["validation_metric"]["accuracy"], 1.0);
        assert_eq!(value["padding_side"], "right");
        assert_eq!(value["n_labels"], 33);
        assert_eq!(value["model"], "roberta-large");
        assert_eq!(value["lora"]["rank"], 8);
    }

    #[test]
    fn test_overwrites_same_minute() {
        let dir = TempDir::new().unwrap();
        let first = summary().write(dir.path()).unwrap();

        let mut second = summary();
        second.note = "rerun".to_string();
        let path = second.write(dir.path()).unwrap();

        assert_eq!(first, path);
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["obs"], "rerun");
    }

    #[test]
    fn test_round_trips_through_serde() {
        let original = summary();
        let json = serde_json::to_string(&original).unwrap();
        let decoded: RunSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, original);
    }
}
