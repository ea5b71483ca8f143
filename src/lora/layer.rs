//! Linear layers carrying a low-rank adapter
//!
//! [`AdaptedLinear`] keeps the pretrained projection frozen and adds a
//! trainable branch next to it. With DoRA enabled the adapted weight is
//! decomposed into a trainable per-row magnitude and a direction.

use std::fmt;

use candle_core::{Module, Tensor};
use candle_nn::Linear;

use super::config::LoraConfig;
use super::params::TrainableParams;
use crate::error::Result;
use crate::utils::nn::SeededDropout;

/// Trainable low-rank branch of an adapted linear layer
#[derive(Debug, Clone)]
pub struct LoraBranch {
    /// Down projection `[rank, in]`
    lora_a: Linear,
    /// Up projection `[out, rank]`
    lora_b: Linear,
    /// DoRA magnitude `[out]`
    magnitude: Option<Tensor>,
    /// `alpha / rank`
    scaling: f64,
    /// Dropout on the adapter input
    dropout: SeededDropout,
    /// LoRA rank
    rank: usize,
}

impl LoraBranch {
    /// Create a branch for `base`, registering its parameters under `name`
    pub fn new(
        name: &str,
        base: &Linear,
        config: &LoraConfig,
        params: &mut TrainableParams,
        dropout: SeededDropout,
    ) -> Result<Self> {
        let (out_dim, in_dim) = base.weight().dims2()?;

        let a = params.kaiming_uniform(&format!("{}.lora_A", name), (config.rank, in_dim))?;
        let b = params.zeros(&format!("{}.lora_B", name), &[out_dim, config.rank])?;

        let magnitude = if config.use_dora {
            let norm = base
                .weight()
                .to_dtype(candle_core::DType::F32)?
                .sqr()?
                .sum(1)?
                .sqrt()?;
            Some(params.register(&format!("{}.lora_magnitude", name), norm)?)
        } else {
            None
        };

        Ok(Self {
            lora_a: Linear::new(a, None),
            lora_b: Linear::new(b, None),
            magnitude,
            scaling: config.scaling_factor() as f64,
            dropout,
            rank: config.rank,
        })
    }

    /// Low-rank update `B·A·scaling` as a dense `[out, in]` matrix
    pub fn delta_weight(&self) -> Result<Tensor> {
        let delta = self.lora_b.weight().matmul(self.lora_a.weight())?;
        Ok((delta * self.scaling)?)
    }

    /// Number of trainable scalars in this branch
    pub fn num_parameters(&self) -> usize {
        self.lora_a.weight().elem_count()
            + self.lora_b.weight().elem_count()
            + self.magnitude.as_ref().map(|m| m.elem_count()).unwrap_or(0)
    }

    /// Whether the branch uses weight decomposition
    pub fn is_dora(&self) -> bool {
        self.magnitude.is_some()
    }

    fn low_rank(&self, xs: &Tensor) -> Result<Tensor> {
        let hidden = self.lora_a.forward(xs)?;
        let out = self.lora_b.forward(&hidden)?;
        Ok((out * self.scaling)?)
    }

    fn forward(&self, base: &Linear, xs: &Tensor, base_out: Tensor, train: bool) -> Result<Tensor> {
        let dropped = train && self.dropout.is_active();
        let adapter_in = if dropped {
            self.dropout.forward(xs, train)?
        } else {
            xs.clone()
        };

        let Some(magnitude) = &self.magnitude else {
            return Ok((base_out + self.low_rank(&adapter_in)?)?);
        };

        let weight = base.weight().to_dtype(candle_core::DType::F32)?;
        let weight_norm = (weight + self.delta_weight()?.detach())?
            .sqr()?
            .sum(1)?
            .sqrt()?
            .detach();
        let mag_scale = magnitude.div(&weight_norm)?;

        // Base term without bias, recomputed on the dropped-out input while training.
        let base_term = if dropped {
            Linear::new(base.weight().clone(), None).forward(&adapter_in)?
        } else {
            match base.bias() {
                Some(bias) => base_out.broadcast_sub(bias)?,
                None => base_out.clone(),
            }
        };

        let lora_out = self.low_rank(&adapter_in)?;
        let correction = (base_term.broadcast_mul(&(&mag_scale - 1.0)?)?
            + lora_out.broadcast_mul(&mag_scale)?)?;
        Ok((base_out + correction)?)
    }
}

/// Frozen linear projection with an optional adapter
#[derive(Debug, Clone)]
pub struct AdaptedLinear {
    /// Qualified layer name
    name: String,
    /// Frozen pretrained projection
    base: Linear,
    /// Trainable branch, if this layer is targeted
    branch: Option<LoraBranch>,
}

impl AdaptedLinear {
    /// Wrap a frozen layer without an adapter
    pub fn frozen(name: impl Into<String>, base: Linear) -> Self {
        Self {
            name: name.into(),
            base,
            branch: None,
        }
    }

    /// Wrap a frozen layer and attach an adapter
    pub fn adapted(
        name: impl Into<String>,
        base: Linear,
        config: &LoraConfig,
        params: &mut TrainableParams,
        dropout: SeededDropout,
    ) -> Result<Self> {
        let name = name.into();
        let branch = LoraBranch::new(&name, &base, config, params, dropout)?;
        Ok(Self {
            name,
            base,
            branch: Some(branch),
        })
    }

    /// Apply the layer; `train` enables adapter dropout
    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let base_out = self.base.forward(xs)?;
        match &self.branch {
            Some(branch) => branch.forward(&self.base, xs, base_out, train),
            None => Ok(base_out),
        }
    }

    /// Layer name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adapter branch, if any
    pub fn branch(&self) -> Option<&LoraBranch> {
        self.branch.as_ref()
    }

    /// Frozen scalar count
    pub fn num_frozen_parameters(&self) -> usize {
        self.base.weight().elem_count() + self.base.bias().map(|b| b.elem_count()).unwrap_or(0)
    }

    /// Input and output width
    pub fn dims(&self) -> (usize, usize) {
        let dims = self.base.weight().dims();
        (dims[dims.len() - 1], dims[0])
    }
}

impl fmt::Display for AdaptedLinear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (in_dim, out_dim) = self.dims();
        match &self.branch {
            None => write!(f, "Linear(in_features={}, out_features={})", in_dim, out_dim),
            Some(branch) => write!(
                f,
                "{}(in_features={}, out_features={}, r={}, scaling={}, dropout={})",
                if branch.is_dora() { "dora.Linear" } else { "lora.Linear" },
                in_dim,
                out_dim,
                branch.rank,
                branch.scaling,
                branch.dropout.probability(),
            ),
        }
    }
}
