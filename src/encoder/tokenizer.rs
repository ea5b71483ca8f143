//! Tokenizer wrapper for the classification inputs

use std::path::Path;

use tokenizers::{Encoding, Tokenizer, TruncationParams};
use tracing::{debug, warn};

use crate::config::PaddingSide;
use crate::error::{Error, Result};

/// Tokens tried, in order, when the model configuration has no pad id
const PAD_TOKENS: [&str; 2] = ["<pad>", "[PAD]"];
/// Tokens tried as end-of-sequence fallback
const EOS_TOKENS: [&str; 2] = ["</s>", "[SEP]"];

/// Tokenizer with truncation and without tokenizer-side padding
pub struct TextTokenizer {
    tokenizer: Tokenizer,
    pad_id: u32,
}

impl TextTokenizer {
    /// Load `tokenizer.json` and configure truncation to `max_length` tokens.
    ///
    /// `config_pad` and `config_eos` come from the model configuration and take
    /// precedence over the vocabulary lookup.
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        max_length: usize,
        config_pad: Option<u32>,
        config_eos: Option<u32>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut tokenizer = Tokenizer::from_file(path)
            .map_err(|e| Error::tokenizer(format!("failed to load {}: {}", path.display(), e)))?;

        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(Error::tokenizer)?;
        // Batches are padded by the collator to their own longest sequence.
        tokenizer.with_padding(None);

        let pad_id = Self::resolve_pad_id(&tokenizer, config_pad, config_eos);
        debug!(
            "Tokenizer loaded from {} (pad id {}, max length {})",
            path.display(),
            pad_id,
            max_length
        );

        Ok(Self { tokenizer, pad_id })
    }

    fn resolve_pad_id(
        tokenizer: &Tokenizer,
        config_pad: Option<u32>,
        config_eos: Option<u32>,
    ) -> u32 {
        if let Some(id) = config_pad {
            return id;
        }
        if let Some(id) = PAD_TOKENS.iter().find_map(|t| tokenizer.token_to_id(t)) {
            return id;
        }

        let eos = config_eos.or_else(|| EOS_TOKENS.iter().find_map(|t| tokenizer.token_to_id(t)));
        match eos {
            Some(id) => {
                warn!("No pad token defined, padding with the end-of-sequence token ({})", id);
                id
            }
            None => {
                warn!("No pad or end-of-sequence token defined, padding with id 0");
                0
            }
        }
    }

    /// Encode texts in one call
    pub fn encode_batch(&self, texts: &[String]) -> Result<Vec<Encoding>> {
        self.tokenizer
            .encode_batch(texts.iter().map(|s| s.as_str()).collect::<Vec<_>>(), true)
            .map_err(Error::tokenizer)
    }

    /// Id used for padding
    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }
}

/// Token ids, attention mask and label of one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedInput {
    /// Token ids
    pub input_ids: Vec<u32>,
    /// One for real tokens, zero for padding
    pub attention_mask: Vec<u32>,
    /// Class label
    pub label: u32,
}

impl TokenizedInput {
    /// Create from encoding
    pub fn from_encoding(encoding: &Encoding, label: u32) -> Self {
        Self {
            input_ids: encoding.get_ids().to_vec(),
            attention_mask: encoding.get_attention_mask().to_vec(),
            label,
        }
    }

    /// Number of tokens, padding included
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    /// Whether the record has no tokens
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Pad to target length on the given side
    pub fn pad_to_length(&mut self, target_length: usize, pad_token_id: u32, side: PaddingSide) {
        let missing = target_length.saturating_sub(self.input_ids.len());
        if missing == 0 {
            return;
        }
        match side {
            PaddingSide::Right => {
                self.input_ids.extend(std::iter::repeat(pad_token_id).take(missing));
                self.attention_mask.extend(std::iter::repeat(0).take(missing));
            }
            PaddingSide::Left => {
                self.input_ids.splice(0..0, std::iter::repeat(pad_token_id).take(missing));
                self.attention_mask.splice(0..0, std::iter::repeat(0).take(missing));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::tests::fixtures;
    use tempfile::TempDir;

    #[test]
    fn test_pad_right_and_left() {
        let mut record = TokenizedInput {
            input_ids: vec![0, 7, 2],
            attention_mask: vec![1, 1, 1],
            label: 3,
        };
        let mut left = record.clone();

        record.pad_to_length(5, 1, PaddingSide::Right);
        assert_eq!(record.input_ids, vec![0, 7, 2, 1, 1]);
        assert_eq!(record.attention_mask, vec![1, 1, 1, 0, 0]);

        left.pad_to_length(5, 1, PaddingSide::Left);
        assert_eq!(left.input_ids, vec![1, 1, 0, 7, 2]);
        assert_eq!(left.attention_mask, vec![0, 0, 1, 1, 1]);
        assert_eq!(left.label, 3);
    }

    #[test]
    fn test_pad_never_truncates() {
        let mut record = TokenizedInput {
            input_ids: vec![0, 7, 2],
            attention_mask: vec![1, 1, 1],
            label: 0,
        };
        record.pad_to_length(2, 1, PaddingSide::Right);
        assert_eq!(record.len(), 3);
    }

    #[test]
    fn test_truncates_and_adds_special_tokens() {
        let dir = TempDir::new().unwrap();
        let path = fixtures::write_tokenizer(dir.path());
        let tokenizer = TextTokenizer::from_file(&path, 4, None, None).unwrap();

        let encodings = tokenizer.encode_batch(&["alpha beta gamma delta".to_string()]).unwrap();
        let encoding = &encodings[0];
        assert_eq!(encoding.get_ids().len(), 4);
        assert_eq!(encoding.get_ids()[0], fixtures::BOS_ID);
        assert_eq!(*encoding.get_ids().last().unwrap(), fixtures::EOS_ID);
    }

    #[test]
    fn test_pad_id_resolution() {
        let dir = TempDir::new().unwrap();
        let path = fixtures::write_tokenizer(dir.path());

        let from_vocab = TextTokenizer::from_file(&path, 16, None, None).unwrap();
        assert_eq!(from_vocab.pad_id(), fixtures::PAD_ID);

        let from_config = TextTokenizer::from_file(&path, 16, Some(9), None).unwrap();
        assert_eq!(from_config.pad_id(), 9);
    }

    #[test]
    fn test_pad_falls_back_to_eos() {
        let dir = TempDir::new().unwrap();
        let path = fixtures::write_tokenizer_without_pad(dir.path());
        let tokenizer = TextTokenizer::from_file(&path, 16, None, None).unwrap();
        assert_eq!(tokenizer.pad_id(), fixtures::EOS_ID);
    }

    #[test]
    fn test_batch_encoding_is_unpadded() {
        let dir = TempDir::new().unwrap();
        let path = fixtures::write_tokenizer(dir.path());
        let tokenizer = TextTokenizer::from_file(&path, 16, None, None).unwrap();

        let encodings = tokenizer
            .encode_batch(&["alpha".to_string(), "alpha beta gamma".to_string()])
            .unwrap();
        assert_eq!(encodings[0].get_ids().len(), 3);
        assert_eq!(encodings[1].get_ids().len(), 5);
    }
}
