//! Token, position and token-type embeddings

use candle_core::{DType, Module, Tensor};
use candle_nn::{Embedding, VarBuilder};

use super::config::{EncoderConfig, ModelKind};
use super::NormLayer;
use crate::error::Result;
use crate::utils::nn::SeededDropout;

/// Input embeddings of a BERT-style encoder. All tables are frozen.
#[derive(Debug, Clone)]
pub struct Embeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    token_type_embeddings: Embedding,
    layer_norm: NormLayer,
    dropout: SeededDropout,
    kind: ModelKind,
    /// Padding index of the position table (RoBERTa only)
    padding_idx: u32,
}

impl Embeddings {
    /// Load the embedding tables from `vb` (already scoped to `embeddings`)
    pub fn load(vb: VarBuilder, config: &EncoderConfig, dropout: SeededDropout) -> Result<Self> {
        let word_embeddings =
            candle_nn::embedding(config.vocab_size, config.hidden_size, vb.pp("word_embeddings"))?;
        let position_embeddings = candle_nn::embedding(
            config.max_position_embeddings,
            config.hidden_size,
            vb.pp("position_embeddings"),
        )?;
        let token_type_embeddings = candle_nn::embedding(
            config.type_vocab_size,
            config.hidden_size,
            vb.pp("token_type_embeddings"),
        )?;
        let layer_norm =
            NormLayer::load(config.hidden_size, config.layer_norm_eps, vb.pp("LayerNorm"))?;

        Ok(Self {
            word_embeddings,
            position_embeddings,
            token_type_embeddings,
            layer_norm,
            dropout,
            kind: config.kind(),
            padding_idx: config.pad_token_id.unwrap_or(1),
        })
    }

    /// Embed `input_ids [b, s]` into `[b, s, hidden]`
    pub fn forward(&self, input_ids: &Tensor, train: bool) -> Result<Tensor> {
        let position_ids = self.position_ids(input_ids)?;
        let token_type_ids = input_ids.zeros_like()?;

        let embeddings = self
            .word_embeddings
            .forward(input_ids)?
            .add(&self.position_embeddings.forward(&position_ids)?)?
            .add(&self.token_type_embeddings.forward(&token_type_ids)?)?;
        let embeddings = self.layer_norm.forward(&embeddings)?;
        self.dropout.forward(&embeddings, train)
    }

    /// Position ids for each token.
    ///
    /// RoBERTa numbers non-padding tokens from `padding_idx + 1` and maps
    /// padding to `padding_idx`; BERT counts from zero.
    fn position_ids(&self, input_ids: &Tensor) -> Result<Tensor> {
        let (batch, seq_len) = input_ids.dims2()?;
        match self.kind {
            ModelKind::Roberta => {
                let mask = input_ids.ne(self.padding_idx)?.to_dtype(DType::F32)?;
                let positions = (mask.cumsum(1)? * &mask)?;
                let positions = (positions + self.padding_idx as f64)?;
                Ok(positions.to_dtype(DType::U32)?)
            }
            ModelKind::Bert => {
                let positions = Tensor::arange(0u32, seq_len as u32, input_ids.device())?;
                Ok(positions.unsqueeze(0)?.broadcast_as((batch, seq_len))?.contiguous()?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use std::collections::HashMap;

    fn config(model_type: &str) -> EncoderConfig {
        serde_json::from_value(serde_json::json!({
            "model_type": model_type,
            "vocab_size": 6,
            "hidden_size": 4,
            "num_hidden_layers": 1,
            "num_attention_heads": 2,
            "intermediate_size": 8,
            "max_position_embeddings": 12,
            "type_vocab_size": 1,
            "pad_token_id": 1
        }))
        .unwrap()
    }

    fn embeddings(model_type: &str) -> Embeddings {
        let device = Device::Cpu;
        let ones = |shape: &[usize]| Tensor::ones(shape, DType::F32, &device).unwrap();
        let zeros = |shape: &[usize]| Tensor::zeros(shape, DType::F32, &device).unwrap();
        let mut tensors = HashMap::new();
        tensors.insert("word_embeddings.weight".to_string(), ones(&[6, 4]));
        tensors.insert("position_embeddings.weight".to_string(), zeros(&[12, 4]));
        tensors.insert("token_type_embeddings.weight".to_string(), zeros(&[1, 4]));
        tensors.insert("LayerNorm.weight".to_string(), ones(&[4]));
        tensors.insert("LayerNorm.bias".to_string(), zeros(&[4]));
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        Embeddings::load(vb, &config(model_type), SeededDropout::new(0.0, 0)).unwrap()
    }

    #[test]
    fn test_roberta_positions_skip_padding() {
        let emb = embeddings("roberta");
        let ids = Tensor::new(&[[0u32, 5, 2, 1, 1], [1, 1, 0, 4, 2]], &Device::Cpu).unwrap();
        let positions: Vec<Vec<u32>> = emb.position_ids(&ids).unwrap().to_vec2().unwrap();
        assert_eq!(positions, vec![vec![2, 3, 4, 1, 1], vec![1, 1, 2, 3, 4]]);
    }

    #[test]
    fn test_bert_positions_are_sequential() {
        let emb = embeddings("bert");
        let ids = Tensor::new(&[[3u32, 4, 0]], &Device::Cpu).unwrap();
        let positions: Vec<Vec<u32>> = emb.position_ids(&ids).unwrap().to_vec2().unwrap();
        assert_eq!(positions, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_forward_shape() {
        let emb = embeddings("roberta");
        let ids = Tensor::new(&[[0u32, 5, 2], [0, 4, 2]], &Device::Cpu).unwrap();
        let out = emb.forward(&ids, true).unwrap();
        assert_eq!(out.dims(), &[2, 3, 4]);
    }
}
