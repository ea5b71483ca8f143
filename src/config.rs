//! Run configuration for the fine-tuning pipeline
//!
//! Every field has a default matching the reference hyperparameters, so a run
//! only needs a dataset identifier. An optional config file (YAML, JSON or TOML)
//! is layered over the defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::lora::LoraConfig;

/// Complete configuration of a single run. Immutable once the pipeline starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Dataset identifier used to resolve partition files
    pub dataset: String,
    /// Free-text note carried into the run summary
    pub note: String,
    /// Training loop settings
    pub training: TrainingSettings,
    /// Pretrained model settings
    pub model: ModelSettings,
    /// Dataset and tokenization settings
    pub data: DataSettings,
    /// Adapter settings
    pub lora: LoraConfig,
    /// AdamW hyperparameters
    pub optimizer: OptimizerSettings,
    /// Output settings
    pub report: ReportSettings,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dataset: String::new(),
            note: String::new(),
            training: TrainingSettings::default(),
            model: ModelSettings::default(),
            data: DataSettings::default(),
            lora: LoraConfig::default(),
            optimizer: OptimizerSettings::default(),
            report: ReportSettings::default(),
        }
    }
}

impl RunConfig {
    /// Build the configuration for a dataset, layering an optional file over the defaults
    pub fn load(dataset: &str, note: &str, file: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&RunConfig::default())
            .map_err(|e| Error::config(e.to_string()))?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = file {
            if !path.exists() {
                return Err(Error::config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path));
        }

        let mut config: RunConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::config(e.to_string()))?;

        config.dataset = dataset.to_string();
        config.note = note.to_string();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.dataset.trim().is_empty() {
            return Err(Error::config("dataset identifier must not be empty"));
        }

        if self.training.batch_size == 0 {
            return Err(Error::config("batch size must be > 0"));
        }

        if self.training.num_epochs == 0 {
            return Err(Error::config("number of epochs must be > 0"));
        }

        if self.training.num_labels < 2 {
            return Err(Error::config("at least two label classes are required"));
        }

        if !(self.training.learning_rate > 0.0) {
            return Err(Error::config("learning rate must be positive"));
        }

        if !(0.0..=1.0).contains(&self.training.warmup_ratio) {
            return Err(Error::config("warmup ratio must be between 0.0 and 1.0"));
        }

        if self.data.max_length < 2 {
            return Err(Error::config("max token length must be at least 2"));
        }

        let betas = [self.optimizer.beta1, self.optimizer.beta2];
        if !betas.iter().all(|beta| (0.0..1.0).contains(beta)) {
            return Err(Error::config("AdamW betas must be in [0, 1)"));
        }

        self.lora.validate()
    }

    /// Render the effective configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::config(e.to_string()))
    }
}

/// Training loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingSettings {
    /// Records per batch
    pub batch_size: usize,
    /// Fixed number of epochs, no early stopping
    pub num_epochs: usize,
    /// Peak learning rate
    pub learning_rate: f64,
    /// Fraction of total steps spent warming up
    pub warmup_ratio: f64,
    /// Number of label classes of the classifier head
    pub num_labels: usize,
    /// Seed for shuffling, dropout and adapter initialisation
    pub seed: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            num_epochs: 5,
            learning_rate: 3e-4,
            warmup_ratio: 0.06,
            num_labels: 33,
            seed: 42,
        }
    }
}

/// Pretrained model settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    /// Hugging Face model identifier
    pub model_id: String,
    /// Hub revision
    pub revision: String,
    /// Directory holding config.json, tokenizer.json and safetensors weights.
    /// When set the hub is not contacted.
    pub local_dir: Option<PathBuf>,
    /// Device selection
    pub device: DevicePreference,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_id: "roberta-large".to_string(),
            revision: "main".to_string(),
            local_dir: None,
            device: DevicePreference::Auto,
        }
    }
}

/// Device selection, resolved once at startup
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Accelerator when available, CPU otherwise
    Auto,
    /// Always CPU
    Cpu,
    /// CUDA device 0
    Cuda,
    /// Metal device 0
    Metal,
}

/// Dataset and tokenization settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataSettings {
    /// Directory holding the partition files
    pub data_dir: PathBuf,
    /// Name of the free-text column
    pub text_column: String,
    /// Name of the integer label column
    pub label_column: String,
    /// Token budget per record, longer texts are truncated
    pub max_length: usize,
    /// Side on which shorter sequences are padded
    pub padding_side: PaddingSide,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("preprocessing"),
            text_column: "texto".to_string(),
            label_column: "labels".to_string(),
            max_length: 512,
            padding_side: PaddingSide::Right,
        }
    }
}

/// Padding side for batch collation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaddingSide {
    /// Pad after the tokens
    Right,
    /// Pad before the tokens
    Left,
}

impl PaddingSide {
    /// Name as it appears in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            PaddingSide::Right => "right",
            PaddingSide::Left => "left",
        }
    }
}

/// AdamW hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptimizerSettings {
    /// First moment decay
    pub beta1: f64,
    /// Second moment decay
    pub beta2: f64,
    /// Denominator epsilon
    pub epsilon: f64,
    /// Decoupled weight decay
    pub weight_decay: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.01,
        }
    }
}

/// Output settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportSettings {
    /// Directory receiving the confusion matrix and the run summary
    pub results_dir: PathBuf,
    /// Which label set spans the confusion matrix
    pub confusion_labels: ConfusionLabels,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            confusion_labels: ConfusionLabels::Observed,
        }
    }
}

/// Label set used for the confusion matrix axes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfusionLabels {
    /// Sorted union of labels seen in references and predictions
    Observed,
    /// `0..num_labels`
    Configured,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_run() {
        let config = RunConfig::default();
        assert_eq!(config.training.batch_size, 5);
        assert_eq!(config.training.num_epochs, 5);
        assert_eq!(config.training.num_labels, 33);
        assert_eq!(config.model.model_id, "roberta-large");
        assert_eq!(config.data.max_length, 512);
        assert_eq!(config.data.padding_side, PaddingSide::Right);
        assert_eq!(config.lora.rank, 8);
        assert!(config.lora.use_dora);
    }

    #[test]
    fn test_load_without_file() {
        let config = RunConfig::load("7", "first try", None).unwrap();
        assert_eq!(config.dataset, "7");
        assert_eq!(config.note, "first try");
        assert_eq!(config.training, TrainingSettings::default());
    }

    #[test]
    fn test_load_layers_file_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "training:\n  num_epochs: 2\n  num_labels: 4\n\
             lora:\n  rank: 4\n  use_dora: false\n\
             data:\n  padding_side: left"
        )
        .unwrap();

        let config = RunConfig::load("3", "", Some(file.path())).unwrap();
        assert_eq!(config.training.num_epochs, 2);
        assert_eq!(config.training.num_labels, 4);
        assert_eq!(config.training.batch_size, 5);
        assert_eq!(config.lora.rank, 4);
        assert!(!config.lora.use_dora);
        assert_eq!(config.lora.alpha, 16.0);
        assert_eq!(config.data.padding_side, PaddingSide::Left);
    }

    #[test]
    fn test_yaml_rendering_loads_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = RunConfig::load("4", "yaml", None).unwrap();
        config.training.num_epochs = 2;
        let path = dir.path().join("run.yaml");
        std::fs::write(&path, config.to_yaml().unwrap()).unwrap();

        let loaded = RunConfig::load("4", "yaml", Some(&path)).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_config_file() {
        let result = RunConfig::load("3", "", Some(Path::new("/definitely/not/here.yaml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = RunConfig {
            dataset: "1".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.training.batch_size = 0;
        assert!(config.validate().is_err());
        config.training.batch_size = 5;

        config.training.num_labels = 1;
        assert!(config.validate().is_err());
        config.training.num_labels = 2;

        config.training.warmup_ratio = 1.5;
        assert!(config.validate().is_err());
        config.training.warmup_ratio = 0.0;

        config.lora.rank = 0;
        assert!(config.validate().is_err());
    }
}
