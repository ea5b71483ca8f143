//! Command-line surface: arguments, logging and progress reporting

use std::path::PathBuf;

use clap::Parser;

pub mod logging;
pub mod progress;

pub use progress::ProgressReporter;

/// Fine-tune a pretrained sequence classifier with LoRA/DoRA adapters
#[derive(Parser, Debug, Clone)]
#[command(name = "lorax-finetune", version)]
#[command(
    about = "Fine-tune a sequence classifier with low-rank adapters \
             and report its confusion matrix",
    long_about = None
)]
pub struct Cli {
    /// Dataset identifier, e.g. `7` for `train_conjunto_7_output.parquet`
    pub dataset: String,

    /// Free-text note stored in the run summary
    #[arg(default_value = "")]
    pub note: String,

    /// Configuration file layered over the defaults (YAML, JSON or TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Debug logging, including per-batch predictions
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_dataset_and_note() {
        let cli = Cli::try_parse_from(["lorax-finetune", "7", "dora r8"]).unwrap();
        assert_eq!(cli.dataset, "7");
        assert_eq!(cli.note, "dora r8");
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_note_defaults_to_empty() {
        let cli = Cli::try_parse_from(["lorax-finetune", "12", "--config", "run.yaml"]).unwrap();
        assert_eq!(cli.note, "");
        assert_eq!(cli.config, Some(PathBuf::from("run.yaml")));
    }

    #[test]
    fn test_dataset_is_required() {
        let err = Cli::try_parse_from(["lorax-finetune"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
