//! AdamW optimizer implementation
//!
//! Decoupled weight decay as in Loshchilov & Hutter: parameters are first
//! shrunk by `lr * weight_decay`, then moved by the bias-corrected Adam step.

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use tracing::trace;

use super::Optimizer;
use crate::config::OptimizerSettings;
use crate::error::Result;
use crate::lora::TrainableParams;

/// Moment estimates of one parameter
struct ParamState {
    name: String,
    var: Var,
    /// First moment estimate
    momentum: Tensor,
    /// Second moment estimate
    variance: Tensor,
}

/// AdamW optimizer with decoupled weight decay
pub struct AdamW {
    /// Parameters in name order, with their moments
    params: Vec<ParamState>,

    /// Learning rate
    learning_rate: f64,

    /// Beta1 parameter (momentum)
    beta1: f64,

    /// Beta2 parameter (RMSprop)
    beta2: f64,

    /// Epsilon for numerical stability
    epsilon: f64,

    /// Weight decay coefficient
    weight_decay: f64,

    /// Current step count
    step_count: usize,
}

impl AdamW {
    /// Create an optimizer over every trainable parameter, sorted by name
    pub fn new(
        params: &TrainableParams,
        learning_rate: f64,
        settings: &OptimizerSettings,
    ) -> Result<Self> {
        let params = params
            .named_vars()?
            .into_iter()
            .map(|(name, var)| {
                let zeros = var.as_tensor().zeros_like()?;
                Ok(ParamState {
                    name,
                    var,
                    momentum: zeros.clone(),
                    variance: zeros,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            params,
            learning_rate,
            beta1: settings.beta1,
            beta2: settings.beta2,
            epsilon: settings.epsilon,
            weight_decay: settings.weight_decay,
            step_count: 0,
        })
    }

    /// Apply AdamW update to a parameter
    fn update_parameter(
        state: &mut ParamState,
        grad: &Tensor,
        lr: f64,
        (beta1, beta2, epsilon, weight_decay): (f64, f64, f64, f64),
        step: i32,
    ) -> Result<()> {
        let param = state.var.as_tensor();

        // Update momentum: m_t = β₁ * m_{t-1} + (1 - β₁) * g_t
        state.momentum = ((&state.momentum * beta1)? + (grad * (1.0 - beta1))?)?;

        // Update variance: v_t = β₂ * v_{t-1} + (1 - β₂) * g_t²
        state.variance = ((&state.variance * beta2)? + (grad.sqr()? * (1.0 - beta2))?)?;

        // Bias correction
        let bias_correction1 = 1.0 - beta1.powi(step);
        let bias_correction2 = 1.0 - beta2.powi(step);

        let denominator = ((state.variance.sqrt()? / bias_correction2.sqrt())? + epsilon)?;
        let update = (state.momentum.div(&denominator)? * (lr / bias_correction1))?;

        // θ_t = θ_{t-1}·(1 - α·λ) - α·m̂_t / (√v̂_t + ε)
        let decayed = (param * (1.0 - lr * weight_decay))?;
        state.var.set(&(decayed - update)?)?;
        Ok(())
    }

    /// Names of the optimized parameters, in update order
    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }
}

impl Optimizer for AdamW {
    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        self.step_count += 1;
        let step = self.step_count as i32;
        let hyper = (self.beta1, self.beta2, self.epsilon, self.weight_decay);
        let lr = self.learning_rate;

        for state in &mut self.params {
            match gradients.get(state.var.as_tensor()) {
                Some(grad) => {
                    let grad = grad.detach();
                    Self::update_parameter(state, &grad, lr, hyper, step)?;
                }
                None => trace!("No gradient for {}", state.name),
            }
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    fn parameter_count(&self) -> usize {
        self.params.len()
    }

    fn step_count(&self) -> usize {
        self.step_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::Device;

    fn single_param(value: f32) -> TrainableParams {
        let mut params = TrainableParams::new(0, &Device::Cpu);
        params
            .register("w", Tensor::new(&[value], &Device::Cpu).unwrap())
            .unwrap();
        params
    }

    #[test]
    fn test_adamw_optimizer_creation() {
        let params = single_param(1.0);
        let optimizer = AdamW::new(&params, 0.001, &OptimizerSettings::default()).unwrap();
        assert_eq!(optimizer.learning_rate(), 0.001);
        assert_eq!(optimizer.step_count(), 0);
        assert_eq!(optimizer.parameter_count(), 1);
        assert_eq!(optimizer.parameter_names().collect::<Vec<_>>(), vec!["w"]);
    }

    #[test]
    fn test_first_step_matches_reference_update() {
        let params = single_param(1.0);
        let mut optimizer = AdamW::new(&params, 0.1, &OptimizerSettings::default()).unwrap();

        let (_, var) = params.named_vars().unwrap().remove(0);
        let loss = (var.as_tensor() * 3.0).unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        optimizer.step(&grads).unwrap();

        // First step: m̂ = g, v̂ = g², so the Adam move is lr·g/(|g| + ε) ≈ lr.
        let expected = 1.0 * (1.0 - 0.1 * 0.01) - 0.1 * 3.0 / (3.0 + 1e-8);
        let value: Vec<f32> = var.as_tensor().to_vec1().unwrap();
        assert_relative_eq!(value[0] as f64, expected, epsilon = 1e-6);
        assert_eq!(optimizer.step_count(), 1);
    }

    #[test]
    fn test_zero_learning_rate_leaves_parameters() {
        let params = single_param(2.0);
        let mut optimizer = AdamW::new(&params, 0.0, &OptimizerSettings::default()).unwrap();

        let (_, var) = params.named_vars().unwrap().remove(0);
        let grads = var.as_tensor().sqr().unwrap().sum_all().unwrap().backward().unwrap();
        optimizer.step(&grads).unwrap();

        let value: Vec<f32> = var.as_tensor().to_vec1().unwrap();
        assert_eq!(value[0], 2.0);
    }

    #[test]
    fn test_minimises_quadratic() {
        let params = single_param(5.0);
        let settings = OptimizerSettings { weight_decay: 0.0, ..Default::default() };
        let mut optimizer = AdamW::new(&params, 0.1, &settings).unwrap();
        let (_, var) = params.named_vars().unwrap().remove(0);

        for _ in 0..200 {
            let grads = var.as_tensor().sqr().unwrap().sum_all().unwrap().backward().unwrap();
            optimizer.step(&grads).unwrap();
        }
        let value: Vec<f32> = var.as_tensor().to_vec1().unwrap();
        assert!(value[0].abs() < 0.5, "value did not approach zero: {}", value[0]);
    }
}
