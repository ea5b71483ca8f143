//! Training infrastructure for adapter fine-tuning
//!
//! # Main Components
//!
//! - **Data**: Parquet partitions, tokenization and padded batching
//! - **Trainer**: Fixed-epoch train/test loop and the final evaluation
//! - **Metrics**: Accuracy accumulator and confusion matrix
//! - **Optimizers**: AdamW with a linear warmup/decay schedule
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use lorax_finetune::training::{PartitionLoaders, Trainer};
//!
//! let mut trainer = Trainer::new(model, loaders, &config.training, &config.optimizer)?;
//! for epoch in 0..config.training.num_epochs {
//!     trainer.run_epoch(epoch)?;
//! }
//! let evaluation = trainer.evaluate_final()?;
//! ```

pub mod data;
pub mod metrics;
pub mod optimizers;
pub mod trainer;

#[cfg(test)]
pub mod tests;

pub use data::{
    Batch, DataLoader, DatasetPaths, PaddingCollator, Partition, PartitionRole, Record,
    TokenizedPartition,
};
pub use metrics::{Accuracy, ConfusionMatrix, EpochMetrics, MetricReport};
pub use optimizers::{AdamW, LinearWarmupScheduler, Optimizer, Scheduler};
pub use trainer::{FinalEvaluation, PartitionLoaders, Trainer};
