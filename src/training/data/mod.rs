//! Data loading for fine-tuning
//!
//! Partitions are read from Parquet, tokenized once, and split into padded
//! batches by a [`DataLoader`]. The training loader reshuffles every epoch with
//! a seeded generator; test and eval loaders keep file order.

pub mod batching;
pub mod loaders;
pub mod partition;

pub use batching::{Batch, PaddingCollator};
pub use loaders::{Batches, DataLoader};
pub use partition::{DatasetPaths, Partition, PartitionRole, Record, TokenizedPartition};
