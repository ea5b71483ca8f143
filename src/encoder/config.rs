//! Encoder hyperparameters read from a Hugging Face `config.json`

use serde::Deserialize;
use std::path::Path;

use crate::error::{Error, Result};

/// Architecture family of the pretrained checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// RoBERTa: offset position ids, `dense -> tanh -> out_proj` head
    Roberta,
    /// BERT: sequential position ids, pooler and linear head
    Bert,
}

impl ModelKind {
    /// Weight prefix used by the original checkpoints
    pub fn prefix(&self) -> &'static str {
        match self {
            ModelKind::Roberta => "roberta",
            ModelKind::Bert => "bert",
        }
    }
}

/// Activation of the feed-forward block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HiddenAct {
    /// Exact GELU
    Gelu,
    /// Tanh approximation of GELU
    #[serde(alias = "gelu_pytorch_tanh")]
    GeluNew,
    /// Rectified linear unit
    Relu,
}

/// Encoder hyperparameters
#[derive(Debug, Clone, Deserialize)]
pub struct EncoderConfig {
    /// Architecture name, e.g. `roberta` or `bert`
    #[serde(default = "default_model_type")]
    pub model_type: String,
    /// Token vocabulary size
    pub vocab_size: usize,
    /// Width of the hidden states
    pub hidden_size: usize,
    /// Number of transformer layers
    pub num_hidden_layers: usize,
    /// Attention heads per layer
    pub num_attention_heads: usize,
    /// Width of the feed-forward block
    pub intermediate_size: usize,
    /// Feed-forward activation
    #[serde(default = "default_hidden_act")]
    pub hidden_act: HiddenAct,
    /// Dropout on embeddings and sub-layer outputs
    #[serde(default = "default_dropout")]
    pub hidden_dropout_prob: f32,
    /// Dropout on attention probabilities
    #[serde(default = "default_dropout")]
    pub attention_probs_dropout_prob: f32,
    /// Size of the position embedding table
    pub max_position_embeddings: usize,
    /// Size of the token type embedding table
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    /// Layer norm epsilon
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    /// Padding token id, if the checkpoint defines one
    #[serde(default)]
    pub pad_token_id: Option<u32>,
    /// End-of-sequence token id, if the checkpoint defines one
    #[serde(default)]
    pub eos_token_id: Option<u32>,
}

fn default_model_type() -> String {
    "bert".to_string()
}

fn default_hidden_act() -> HiddenAct {
    HiddenAct::Gelu
}

fn default_dropout() -> f32 {
    0.1
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

impl EncoderConfig {
    /// Parse a `config.json` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::model_loading(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: EncoderConfig = serde_json::from_str(&content).map_err(|e| {
            Error::model_loading(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the shape invariants the encoder relies on
    pub fn validate(&self) -> Result<()> {
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return Err(Error::model_loading(format!(
                "hidden size {} is not divisible by {} attention heads",
                self.hidden_size, self.num_attention_heads
            )));
        }
        if self.num_hidden_layers == 0 {
            return Err(Error::model_loading("encoder has no layers"));
        }
        Ok(())
    }

    /// Architecture family
    pub fn kind(&self) -> ModelKind {
        match self.model_type.as_str() {
            "roberta" | "xlm-roberta" | "camembert" => ModelKind::Roberta,
            _ => ModelKind::Bert,
        }
    }

    /// Width of one attention head
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }
}
