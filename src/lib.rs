//! LoRAX fine-tuning - adapter training for pretrained sequence classifiers
//!
//! This crate fine-tunes a RoBERTa/BERT classifier with low-rank adapters
//! (LoRA, or its weight-decomposed DoRA variant), tracks test accuracy per
//! epoch, and reports the final evaluation as a confusion matrix (CSV and PNG)
//! together with a JSON run summary.

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod cli;
pub mod config;
pub mod encoder;
pub mod error;
pub mod lora;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod training;
pub mod utils;

// Re-exports
pub use config::RunConfig;
pub use encoder::{EncoderConfig, TextTokenizer};
pub use error::{Error, Result};
pub use lora::{LoraConfig, ParameterSummary, TrainableParams};
pub use model::{ModelFiles, SequenceClassifier};
pub use pipeline::{Pipeline, RunOutcome};
pub use report::RunSummary;
pub use training::{ConfusionMatrix, Trainer};
