//! BERT-style transformer encoder with adapter-aware projections
//!
//! The pretrained weights are loaded as plain tensors and stay frozen. Linear
//! projections named in the LoRA configuration are wrapped in an
//! [`AdaptedLinear`] whose branch parameters live in [`TrainableParams`].

use std::fmt;
use std::sync::Arc;

use candle_core::{DType, Tensor, D};
use candle_nn::VarBuilder;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use tracing::debug;

use super::config::{EncoderConfig, HiddenAct};
use super::embedding::Embeddings;
use super::NormLayer;
use crate::error::Result;
use crate::lora::{AdaptedLinear, LoraConfig, TargetModule, TrainableParams};
use crate::utils::nn::SeededDropout;

/// Shared context for building adapted projections
pub struct AdapterContext<'a> {
    /// Adapter settings
    pub lora: &'a LoraConfig,
    /// Registry receiving the new parameters
    pub params: &'a mut TrainableParams,
    /// Generator shared by every dropout site
    pub rng: Arc<Mutex<StdRng>>,
}

impl AdapterContext<'_> {
    /// Load a frozen projection and attach an adapter when `module` is targeted
    fn linear(
        &mut self,
        in_dim: usize,
        out_dim: usize,
        module: TargetModule,
        name: &str,
        vb: VarBuilder,
    ) -> Result<AdaptedLinear> {
        let base = candle_nn::linear(in_dim, out_dim, vb)?;
        if self.lora.targets_module(module) {
            debug!("Attaching adapter to {}", name);
            let dropout = SeededDropout::with_rng(self.lora.dropout, self.rng.clone());
            AdaptedLinear::adapted(name, base, self.lora, self.params, dropout)
        } else {
            Ok(AdaptedLinear::frozen(name, base))
        }
    }

    fn dropout(&self, p: f32) -> SeededDropout {
        SeededDropout::with_rng(p, self.rng.clone())
    }
}

/// Multi-head self-attention with its output projection
#[derive(Debug, Clone)]
struct Attention {
    query: AdaptedLinear,
    key: AdaptedLinear,
    value: AdaptedLinear,
    output: AdaptedLinear,
    layer_norm: NormLayer,
    attention_dropout: SeededDropout,
    output_dropout: SeededDropout,
    num_heads: usize,
    head_dim: usize,
}

impl Attention {
    fn load(
        vb: VarBuilder,
        name: &str,
        config: &EncoderConfig,
        ctx: &mut AdapterContext<'_>,
    ) -> Result<Self> {
        let hidden = config.hidden_size;
        let self_vb = vb.pp("self");
        let mut projection = |module: TargetModule, part: &str| {
            ctx.linear(hidden, hidden, module, &format!("{name}.self.{part}"), self_vb.pp(part))
        };
        let query = projection(TargetModule::Query, "query")?;
        let key = projection(TargetModule::Key, "key")?;
        let value = projection(TargetModule::Value, "value")?;

        let out_vb = vb.pp("output");
        let output = ctx.linear(
            hidden,
            hidden,
            TargetModule::AttentionOutput,
            &format!("{name}.output.dense"),
            out_vb.pp("dense"),
        )?;
        let layer_norm = NormLayer::load(hidden, config.layer_norm_eps, out_vb.pp("LayerNorm"))?;

        Ok(Self {
            query,
            key,
            value,
            output,
            layer_norm,
            attention_dropout: ctx.dropout(config.attention_probs_dropout_prob),
            output_dropout: ctx.dropout(config.hidden_dropout_prob),
            num_heads: config.num_attention_heads,
            head_dim: config.head_dim(),
        })
    }

    /// `[b, s, hidden]` to `[b, heads, s, head_dim]`
    fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (b, s, _) = xs.dims3()?;
        Ok(xs
            .reshape((b, s, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    fn forward(&self, hidden: &Tensor, mask_bias: &Tensor, train: bool) -> Result<Tensor> {
        let (b, s, h) = hidden.dims3()?;
        let q = self.split_heads(&self.query.forward(hidden, train)?)?;
        let k = self.split_heads(&self.key.forward(hidden, train)?)?;
        let v = self.split_heads(&self.value.forward(hidden, train)?)?;

        let scores = (q.matmul(&k.t()?)? / (self.head_dim as f64).sqrt())?;
        let scores = scores.broadcast_add(mask_bias)?;
        // Composed softmax keeps the backward pass; the fused kernel does not.
        let probs = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let probs = self.attention_dropout.forward(&probs, train)?;

        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, s, h))?;

        let out = self.output.forward(&context, train)?;
        let out = self.output_dropout.forward(&out, train)?;
        self.layer_norm.forward(&(out + hidden)?)
    }
}

/// Feed-forward block
#[derive(Debug, Clone)]
struct FeedForward {
    intermediate: AdaptedLinear,
    output: AdaptedLinear,
    layer_norm: NormLayer,
    dropout: SeededDropout,
    act: HiddenAct,
}

impl FeedForward {
    fn load(
        vb: VarBuilder,
        name: &str,
        config: &EncoderConfig,
        ctx: &mut AdapterContext<'_>,
    ) -> Result<Self> {
        let intermediate = ctx.linear(
            config.hidden_size,
            config.intermediate_size,
            TargetModule::Intermediate,
            &format!("{name}.intermediate.dense"),
            vb.pp("intermediate").pp("dense"),
        )?;
        let output = ctx.linear(
            config.intermediate_size,
            config.hidden_size,
            TargetModule::Output,
            &format!("{name}.output.dense"),
            vb.pp("output").pp("dense"),
        )?;
        let layer_norm = NormLayer::load(
            config.hidden_size,
            config.layer_norm_eps,
            vb.pp("output").pp("LayerNorm"),
        )?;

        Ok(Self {
            intermediate,
            output,
            layer_norm,
            dropout: ctx.dropout(config.hidden_dropout_prob),
            act: config.hidden_act,
        })
    }

    fn forward(&self, hidden: &Tensor, train: bool) -> Result<Tensor> {
        let xs = self.intermediate.forward(hidden, train)?;
        let xs = match self.act {
            HiddenAct::Gelu => xs.gelu_erf()?,
            HiddenAct::GeluNew => xs.gelu()?,
            HiddenAct::Relu => xs.relu()?,
        };
        let xs = self.output.forward(&xs, train)?;
        let xs = self.dropout.forward(&xs, train)?;
        self.layer_norm.forward(&(xs + hidden)?)
    }
}

/// One transformer layer
#[derive(Debug, Clone)]
struct EncoderLayer {
    attention: Attention,
    feed_forward: FeedForward,
}

/// Transformer body: embeddings followed by the stacked layers
#[derive(Debug, Clone)]
pub struct TransformerEncoder {
    embeddings: Embeddings,
    layers: Vec<EncoderLayer>,
    prefix: String,
    frozen_parameters: usize,
}

impl TransformerEncoder {
    /// Load the encoder from `vb` scoped to the checkpoint prefix (`roberta`, `bert` or root)
    pub fn load(
        vb: VarBuilder,
        prefix: &str,
        config: &EncoderConfig,
        ctx: &mut AdapterContext<'_>,
    ) -> Result<Self> {
        let embeddings_dropout = ctx.dropout(config.hidden_dropout_prob);
        let embeddings = Embeddings::load(vb.pp("embeddings"), config, embeddings_dropout)?;

        let layers_vb = vb.pp("encoder").pp("layer");
        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for index in 0..config.num_hidden_layers {
            let layer_vb = layers_vb.pp(index.to_string());
            let name = if prefix.is_empty() {
                format!("encoder.layer.{index}")
            } else {
                format!("{prefix}.encoder.layer.{index}")
            };
            let attention_vb = layer_vb.pp("attention");
            let attention =
                Attention::load(attention_vb, &format!("{name}.attention"), config, ctx)?;
            let feed_forward = FeedForward::load(layer_vb, &name, config, ctx)?;
            layers.push(EncoderLayer { attention, feed_forward });
        }

        let frozen_parameters = frozen_count(config);
        Ok(Self {
            embeddings,
            layers,
            prefix: prefix.to_string(),
            frozen_parameters,
        })
    }

    /// Hidden states `[b, s, hidden]` for `input_ids` and `attention_mask` (both `[b, s]`)
    pub fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let mask_bias = attention_bias(attention_mask)?;
        let mut hidden = self.embeddings.forward(input_ids, train)?;
        for layer in &self.layers {
            hidden = layer.attention.forward(&hidden, &mask_bias, train)?;
            hidden = layer.feed_forward.forward(&hidden, train)?;
        }
        Ok(hidden)
    }

    /// Number of pretrained scalars, all frozen
    pub fn num_frozen_parameters(&self) -> usize {
        self.frozen_parameters
    }

    /// Number of layers
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

/// Additive mask `[b, 1, 1, s]`: zero for real tokens, a large negative value for padding
fn attention_bias(attention_mask: &Tensor) -> Result<Tensor> {
    let (b, s) = attention_mask.dims2()?;
    let mask = attention_mask.to_dtype(DType::F32)?;
    let bias = ((mask - 1.0)? * f32::MAX as f64)?;
    Ok(bias.reshape((b, 1, 1, s))?)
}

/// Scalar count of the pretrained body, derived from the configuration
fn frozen_count(config: &EncoderConfig) -> usize {
    let h = config.hidden_size;
    let i = config.intermediate_size;
    let rows = config.vocab_size + config.max_position_embeddings + config.type_vocab_size;
    let embeddings = rows * h + 2 * h;
    let attention = 4 * (h * h + h) + 2 * h;
    let feed_forward = (h * i + i) + (i * h + h) + 2 * h;
    embeddings + config.num_hidden_layers * (attention + feed_forward)
}

impl fmt::Display for TransformerEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.prefix.is_empty() { "encoder" } else { self.prefix.as_str() };
        writeln!(f, "  ({}): Encoder(", name)?;
        writeln!(f, "    (layer): {} x Layer(", self.layers.len())?;
        if let Some(layer) = self.layers.first() {
            let attn = &layer.attention;
            writeln!(f, "      (query): {}", attn.query)?;
            writeln!(f, "      (key): {}", attn.key)?;
            writeln!(f, "      (value): {}", attn.value)?;
            writeln!(f, "      (attention.output): {}", attn.output)?;
            writeln!(f, "      (intermediate): {}", layer.feed_forward.intermediate)?;
            writeln!(f, "      (output): {}", layer.feed_forward.output)?;
        }
        writeln!(f, "    )")?;
        write!(f, "  )")
    }
}
