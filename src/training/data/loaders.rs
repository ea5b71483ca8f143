//! Batch iteration over a tokenized partition

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use super::batching::{Batch, PaddingCollator};
use super::partition::{PartitionRole, TokenizedPartition};
use crate::error::Result;

/// Splits a partition into padded batches, optionally reshuffling every epoch
pub struct DataLoader {
    partition: TokenizedPartition,
    batch_size: usize,
    collator: PaddingCollator,
    /// Present when the order is shuffled each epoch
    shuffle_rng: Option<StdRng>,
}

impl DataLoader {
    /// Loader that keeps the partition order
    pub fn sequential(
        partition: TokenizedPartition,
        batch_size: usize,
        collator: PaddingCollator,
    ) -> Self {
        Self {
            partition,
            batch_size: batch_size.max(1),
            collator,
            shuffle_rng: None,
        }
    }

    /// Loader that reshuffles with a seeded generator each epoch
    pub fn shuffled(
        partition: TokenizedPartition,
        batch_size: usize,
        collator: PaddingCollator,
        seed: u64,
    ) -> Self {
        Self {
            shuffle_rng: Some(StdRng::seed_from_u64(seed)),
            ..Self::sequential(partition, batch_size, collator)
        }
    }

    /// `ceil(len / batch_size)`
    pub fn num_batches(&self) -> usize {
        self.partition.len().div_ceil(self.batch_size)
    }

    /// Number of records
    pub fn dataset_size(&self) -> usize {
        self.partition.len()
    }

    /// Role of the underlying partition
    pub fn role(&self) -> PartitionRole {
        self.partition.role()
    }

    /// Batches for one pass; the final batch may be shorter
    pub fn epoch(&mut self) -> Batches<'_> {
        let mut order: Vec<usize> = (0..self.partition.len()).collect();
        if let Some(rng) = self.shuffle_rng.as_mut() {
            order.shuffle(rng);
            debug!("Shuffled {} {} indices", order.len(), self.partition.role());
        }
        Batches {
            loader: self,
            order,
            cursor: 0,
        }
    }
}

/// Iterator over the batches of one epoch
pub struct Batches<'a> {
    loader: &'a DataLoader,
    order: Vec<usize>,
    cursor: usize,
}

impl Iterator for Batches<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.loader.batch_size).min(self.order.len());
        let records = self.loader.partition.records();
        let chunk: Vec<_> = self.order[self.cursor..end].iter().map(|&i| &records[i]).collect();
        self.cursor = end;
        Some(self.loader.collator.collate(&chunk))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.cursor).div_ceil(self.loader.batch_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Batches<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaddingSide;
    use crate::encoder::TokenizedInput;
    use candle_core::Device;

    fn partition(n: u32) -> TokenizedPartition {
        let records = (0..n)
            .map(|i| TokenizedInput {
                input_ids: vec![0, 10 + i, 2],
                attention_mask: vec![1, 1, 1],
                label: i,
            })
            .collect();
        TokenizedPartition::new(PartitionRole::Train, records)
    }

    fn collator() -> PaddingCollator {
        PaddingCollator::new(1, PaddingSide::Right, &Device::Cpu)
    }

    fn labels(loader: &mut DataLoader) -> Vec<Vec<u32>> {
        loader.epoch().map(|b| b.unwrap().references).collect()
    }

    #[test]
    fn test_sequential_batches_and_short_tail() {
        let mut loader = DataLoader::sequential(partition(7), 5, collator());
        assert_eq!(loader.num_batches(), 2);
        assert_eq!(loader.epoch().len(), 2);
        assert_eq!(labels(&mut loader), vec![vec![0, 1, 2, 3, 4], vec![5, 6]]);
        assert_eq!(labels(&mut loader), vec![vec![0, 1, 2, 3, 4], vec![5, 6]]);
    }

    #[test]
    fn test_shuffle_is_seeded_and_varies_per_epoch() {
        let mut first = DataLoader::shuffled(partition(20), 4, collator(), 11);
        let mut second = DataLoader::shuffled(partition(20), 4, collator(), 11);

        let epoch_one = labels(&mut first);
        assert_eq!(epoch_one, labels(&mut second));

        let epoch_two = labels(&mut first);
        assert_ne!(epoch_one, epoch_two);

        let mut seen: Vec<u32> = epoch_two.into_iter().flatten().collect();
        seen.sort();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_partition_has_no_batches() {
        let mut loader = DataLoader::sequential(partition(0), 5, collator());
        assert_eq!(loader.num_batches(), 0);
        assert!(loader.epoch().next().is_none());
    }
}
