//! Dynamic padding collation

use candle_core::{Device, Tensor};
use tracing::instrument;

use crate::config::PaddingSide;
use crate::encoder::TokenizedInput;
use crate::error::{Error, Result};

/// Padded batch ready for the model
#[derive(Debug, Clone)]
pub struct Batch {
    /// Token ids `[b, s]`
    pub input_ids: Tensor,
    /// Attention mask `[b, s]`
    pub attention_mask: Tensor,
    /// Labels `[b]`
    pub labels: Tensor,
    /// Labels on the host, index-aligned with the rows
    pub references: Vec<u32>,
}

impl Batch {
    /// Number of records
    pub fn len(&self) -> usize {
        self.references.len()
    }

    /// Whether the batch has no records
    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Padded sequence length
    pub fn seq_len(&self) -> usize {
        self.input_ids.dim(1).unwrap_or(0)
    }
}

/// Pads every batch to its own longest sequence
#[derive(Debug, Clone)]
pub struct PaddingCollator {
    pad_id: u32,
    side: PaddingSide,
    device: Device,
}

impl PaddingCollator {
    /// Create a collator
    pub fn new(pad_id: u32, side: PaddingSide, device: &Device) -> Self {
        Self {
            pad_id,
            side,
            device: device.clone(),
        }
    }

    /// Pad `records` to the longest one and stack them into tensors
    #[instrument(skip_all, fields(batch_size = records.len()))]
    pub fn collate(&self, records: &[&TokenizedInput]) -> Result<Batch> {
        if records.is_empty() {
            return Err(Error::invalid_input("cannot collate an empty batch"));
        }

        let longest = records.iter().map(|r| r.len()).max().unwrap_or(0);
        let mut input_ids = Vec::with_capacity(records.len() * longest);
        let mut attention_mask = Vec::with_capacity(records.len() * longest);
        let mut references = Vec::with_capacity(records.len());

        for record in records {
            let mut padded = (*record).clone();
            padded.pad_to_length(longest, self.pad_id, self.side);
            input_ids.extend_from_slice(&padded.input_ids);
            attention_mask.extend_from_slice(&padded.attention_mask);
            references.push(padded.label);
        }

        let shape = (records.len(), longest);
        Ok(Batch {
            input_ids: Tensor::from_vec(input_ids, shape, &self.device)?,
            attention_mask: Tensor::from_vec(attention_mask, shape, &self.device)?,
            labels: Tensor::new(references.as_slice(), &self.device)?,
            references,
        })
    }

    /// Padding id
    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ids: &[u32], label: u32) -> TokenizedInput {
        TokenizedInput {
            input_ids: ids.to_vec(),
            attention_mask: vec![1; ids.len()],
            label,
        }
    }

    #[test]
    fn test_pads_to_longest_in_batch() {
        let collator = PaddingCollator::new(1, PaddingSide::Right, &Device::Cpu);
        let a = record(&[0, 5, 2], 3);
        let b = record(&[0, 5, 6, 7, 2], 1);

        let batch = collator.collate(&[&a, &b]).unwrap();
        assert_eq!(batch.input_ids.dims(), &[2, 5]);
        assert_eq!(batch.seq_len(), 5);
        let ids: Vec<Vec<u32>> = batch.input_ids.to_vec2().unwrap();
        assert_eq!(ids[0], vec![0, 5, 2, 1, 1]);
        let mask: Vec<Vec<u32>> = batch.attention_mask.to_vec2().unwrap();
        assert_eq!(mask[0], vec![1, 1, 1, 0, 0]);
        assert_eq!(batch.labels.to_vec1::<u32>().unwrap(), vec![3, 1]);
        assert_eq!(batch.references, vec![3, 1]);
    }

    #[test]
    fn test_left_padding() {
        let collator = PaddingCollator::new(9, PaddingSide::Left, &Device::Cpu);
        let a = record(&[4], 0);
        let b = record(&[4, 4, 4], 0);

        let batch = collator.collate(&[&a, &b]).unwrap();
        let ids: Vec<Vec<u32>> = batch.input_ids.to_vec2().unwrap();
        assert_eq!(ids[0], vec![9, 9, 4]);
    }

    #[test]
    fn test_single_record_is_unpadded() {
        let collator = PaddingCollator::new(1, PaddingSide::Right, &Device::Cpu);
        let a = record(&[0, 8, 2], 2);
        let batch = collator.collate(&[&a]).unwrap();
        assert_eq!(batch.input_ids.dims(), &[1, 3]);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        let collator = PaddingCollator::new(1, PaddingSide::Right, &Device::Cpu);
        assert!(collator.collate(&[]).is_err());
    }
}
