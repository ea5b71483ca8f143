//! Pretrained text encoder: tokenizer, configuration and transformer body

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::error::Result;

mod bert;
pub mod config;
mod embedding;
pub mod tokenizer;

pub use bert::{AdapterContext, TransformerEncoder};
pub use config::{EncoderConfig, HiddenAct, ModelKind};
pub use embedding::Embeddings;
pub use tokenizer::{TextTokenizer, TokenizedInput};

/// Frozen layer normalisation.
///
/// Computed with composed tensor ops so gradients flow back to the adapters
/// below it; the fused kernel has no backward pass.
#[derive(Debug, Clone)]
pub(crate) struct NormLayer {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl NormLayer {
    /// Load `weight`/`bias`, falling back to the legacy `gamma`/`beta` names
    pub(crate) fn load(size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let (weight_name, bias_name) = if vb.contains_tensor("weight") {
            ("weight", "bias")
        } else {
            ("gamma", "beta")
        };
        Ok(Self {
            weight: vb.get(size, weight_name)?,
            bias: vb.get(size, bias_name)?,
            eps,
        })
    }

    pub(crate) fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        Ok(candle_nn::ops::layer_norm_slow(xs, &self.weight, &self.bias, self.eps as f32)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::{DType, Device, Var};
    use std::collections::HashMap;

    fn norm(device: &Device) -> NormLayer {
        let mut tensors = HashMap::new();
        tensors.insert("gamma".to_string(), Tensor::ones(4, DType::F32, device).unwrap());
        tensors.insert("beta".to_string(), Tensor::zeros(4, DType::F32, device).unwrap());
        NormLayer::load(4, 1e-5, VarBuilder::from_tensors(tensors, DType::F32, device)).unwrap()
    }

    #[test]
    fn test_norm_layer_normalises_last_dim() {
        let device = Device::Cpu;
        let xs = Tensor::new(&[[1.0f32, 2.0, 3.0, 4.0]], &device).unwrap();
        let out: Vec<f32> =
            norm(&device).forward(&xs).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let mean: f32 = out.iter().sum::<f32>() / 4.0;
        let var: f32 = out.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 4.0;
        assert_relative_eq!(mean, 0.0, epsilon = 1e-5);
        assert_relative_eq!(var, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_norm_layer_propagates_gradients() {
        let device = Device::Cpu;
        let xs = Var::new(&[[1.0f32, 2.0, 0.5, 4.0]], &device).unwrap();
        let weights = Tensor::new(&[[1.0f32], [-2.0], [0.5], [3.0]], &device).unwrap();
        let normed = norm(&device).forward(xs.as_tensor()).unwrap();
        let loss = normed.matmul(&weights).unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        assert!(grads.get(xs.as_tensor()).is_some());
    }
}
