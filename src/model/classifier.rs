//! Sequence classifier: frozen pretrained encoder, adapters and a trainable head

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{Linear, VarBuilder};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, instrument};

use crate::encoder::{AdapterContext, EncoderConfig, ModelKind, TransformerEncoder};
use crate::error::{Error, Result};
use crate::lora::{LoraConfig, ParameterSummary, TrainableParams};
use crate::utils::nn::SeededDropout;

/// Standard deviation of the head initialisation
const HEAD_INIT_STD: f32 = 0.02;

/// Classification head on top of the first-token hidden state
#[derive(Debug, Clone)]
enum ClassificationHead {
    /// `dropout -> dense -> tanh -> dropout -> out_proj`
    Roberta {
        dense: Linear,
        out_proj: Linear,
        dropout: SeededDropout,
    },
    /// `pooler -> tanh -> dropout -> classifier`
    Bert {
        pooler: Linear,
        pooler_trainable: bool,
        classifier: Linear,
        dropout: SeededDropout,
    },
}

impl ClassificationHead {
    fn trainable_linear(
        params: &mut TrainableParams,
        name: &str,
        in_dim: usize,
        out_dim: usize,
    ) -> Result<Linear> {
        let weight = params.normal(&format!("{name}.weight"), (out_dim, in_dim), HEAD_INIT_STD)?;
        let bias = params.zeros(&format!("{name}.bias"), &[out_dim])?;
        Ok(Linear::new(weight, Some(bias)))
    }

    fn new(
        kind: ModelKind,
        vb: &VarBuilder,
        hidden: usize,
        num_labels: usize,
        params: &mut TrainableParams,
        dropout: SeededDropout,
    ) -> Result<Self> {
        match kind {
            ModelKind::Roberta => Ok(Self::Roberta {
                dense: Self::trainable_linear(params, "classifier.dense", hidden, hidden)?,
                out_proj: Self::trainable_linear(
                    params,
                    "classifier.out_proj",
                    hidden,
                    num_labels,
                )?,
                dropout,
            }),
            ModelKind::Bert => {
                let pooler_vb = vb.pp("pooler").pp("dense");
                let (pooler, pooler_trainable) = if pooler_vb.contains_tensor("weight") {
                    (candle_nn::linear(hidden, hidden, pooler_vb)?, false)
                } else {
                    (Self::trainable_linear(params, "pooler.dense", hidden, hidden)?, true)
                };
                Ok(Self::Bert {
                    pooler,
                    pooler_trainable,
                    classifier: Self::trainable_linear(params, "classifier", hidden, num_labels)?,
                    dropout,
                })
            }
        }
    }

    fn forward(&self, hidden: &Tensor, train: bool) -> Result<Tensor> {
        let first = hidden.narrow(1, 0, 1)?.squeeze(1)?;
        match self {
            Self::Roberta { dense, out_proj, dropout } => {
                let xs = dropout.forward(&first, train)?;
                let xs = dense.forward(&xs)?.tanh()?;
                let xs = dropout.forward(&xs, train)?;
                Ok(out_proj.forward(&xs)?)
            }
            Self::Bert { pooler, classifier, dropout, .. } => {
                let pooled = pooler.forward(&first)?.tanh()?;
                let xs = dropout.forward(&pooled, train)?;
                Ok(classifier.forward(&xs)?)
            }
        }
    }

    /// Pretrained scalars used by the head
    fn num_frozen_parameters(&self) -> usize {
        match self {
            Self::Bert { pooler, pooler_trainable: false, .. } => {
                pooler.weight().elem_count() + pooler.bias().map(|b| b.elem_count()).unwrap_or(0)
            }
            _ => 0,
        }
    }
}

impl fmt::Display for ClassificationHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let linear = |l: &Linear| {
            let dims = l.weight().dims();
            format!("Linear(in_features={}, out_features={})", dims[1], dims[0])
        };
        match self {
            Self::Roberta { dense, out_proj, dropout } => {
                writeln!(f, "  (classifier): ClassificationHead(")?;
                writeln!(f, "    (dense): {}", linear(dense))?;
                writeln!(f, "    (dropout): Dropout(p={})", dropout.probability())?;
                writeln!(f, "    (out_proj): {}", linear(out_proj))?;
                write!(f, "  )")
            }
            Self::Bert { pooler, pooler_trainable, classifier, dropout } => {
                writeln!(
                    f,
                    "  (pooler): {}{}",
                    linear(pooler),
                    if *pooler_trainable { "" } else { " [frozen]" }
                )?;
                writeln!(f, "  (dropout): Dropout(p={})", dropout.probability())?;
                write!(f, "  (classifier): {}", linear(classifier))
            }
        }
    }
}

/// Pretrained encoder with low-rank adapters and a newly initialised head
pub struct SequenceClassifier {
    encoder: TransformerEncoder,
    head: ClassificationHead,
    params: TrainableParams,
    kind: ModelKind,
    training: bool,
}

impl SequenceClassifier {
    /// Build the classifier from safetensors weights.
    ///
    /// The weight prefix (`roberta.`, `bert.` or none) is detected from the
    /// checkpoint. Adapter and head initialisation, as well as every dropout
    /// mask, are drawn from generators seeded with `seed`.
    #[instrument(skip_all, fields(num_labels = num_labels))]
    pub fn load(
        weights: &[PathBuf],
        config: &EncoderConfig,
        num_labels: usize,
        lora: &LoraConfig,
        seed: u64,
        device: &Device,
    ) -> Result<Self> {
        // SAFETY: the weight files are opened read-only and must not be
        // modified while the model is alive.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(weights, DType::F32, device)? };
        Self::from_var_builder(vb, config, num_labels, lora, seed, device)
    }

    /// Build the classifier from an already opened checkpoint
    pub fn from_var_builder(
        vb: VarBuilder,
        config: &EncoderConfig,
        num_labels: usize,
        lora: &LoraConfig,
        seed: u64,
        device: &Device,
    ) -> Result<Self> {
        let kind = config.kind();
        let prefix = detect_prefix(&vb)?;
        let body_vb = if prefix.is_empty() { vb.clone() } else { vb.pp(prefix) };

        let mut params = TrainableParams::new(seed, device);
        let dropout_rng = Arc::new(Mutex::new(StdRng::seed_from_u64(seed.wrapping_add(1))));

        let encoder = {
            let mut ctx = AdapterContext {
                lora,
                params: &mut params,
                rng: dropout_rng.clone(),
            };
            TransformerEncoder::load(body_vb.clone(), prefix, config, &mut ctx)?
        };

        let head = ClassificationHead::new(
            kind,
            &body_vb,
            config.hidden_size,
            num_labels,
            &mut params,
            SeededDropout::with_rng(config.hidden_dropout_prob, dropout_rng),
        )?;
        info!(
            "Classification head newly initialised for {} labels ({} encoder layers)",
            num_labels,
            encoder.num_layers()
        );

        Ok(Self {
            encoder,
            head,
            params,
            kind,
            training: false,
        })
    }

    /// Switch between training (dropout active) and evaluation mode
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    /// Logits `[b, num_labels]`
    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let hidden = self.encoder.forward(input_ids, attention_mask, self.training)?;
        self.head.forward(&hidden, self.training)
    }

    /// Trainable parameters
    pub fn params(&self) -> &TrainableParams {
        &self.params
    }

    /// Trainable versus total parameter count
    pub fn parameter_summary(&self) -> ParameterSummary {
        let trainable = self.params.num_parameters();
        let frozen = self.encoder.num_frozen_parameters() + self.head.num_frozen_parameters();
        ParameterSummary {
            trainable,
            total: trainable + frozen,
        }
    }
}

impl fmt::Display for SequenceClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.kind {
            ModelKind::Roberta => "RobertaForSequenceClassification",
            ModelKind::Bert => "BertForSequenceClassification",
        };
        writeln!(f, "{}(", name)?;
        writeln!(f, "{}", self.encoder)?;
        writeln!(f, "{}", self.head)?;
        write!(f, ")")
    }
}

/// Index of the largest logit per row
pub fn argmax_last(logits: &Tensor) -> Result<Vec<u32>> {
    Ok(logits.argmax(D::Minus1)?.to_vec1::<u32>()?)
}

fn detect_prefix(vb: &VarBuilder) -> Result<&'static str> {
    for prefix in ["roberta", "bert", ""] {
        let key = if prefix.is_empty() {
            "embeddings.word_embeddings.weight".to_string()
        } else {
            format!("{prefix}.embeddings.word_embeddings.weight")
        };
        if vb.contains_tensor(&key) {
            return Ok(prefix);
        }
    }
    Err(Error::model_loading(
        "checkpoint has no embeddings under roberta., bert. or the root prefix",
    ))
}
