//! Registry of trainable parameters
//!
//! Adapter matrices, DoRA magnitudes and the classifier head live in a single
//! [`VarMap`]. Everything else in the model is a plain tensor and therefore
//! frozen. Initialisation draws from a seeded generator so two runs with the
//! same seed start from identical adapters.

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::VarMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::error::{Error, Result};

/// Trainable parameter store with seeded initialisation
pub struct TrainableParams {
    /// Backing variable map
    varmap: VarMap,
    /// Initialisation generator
    rng: StdRng,
    /// Device for new parameters
    device: Device,
}

impl TrainableParams {
    /// Create an empty store
    pub fn new(seed: u64, device: &Device) -> Self {
        Self {
            varmap: VarMap::new(),
            rng: StdRng::seed_from_u64(seed),
            device: device.clone(),
        }
    }

    /// Register an existing tensor as a trainable variable.
    ///
    /// The returned tensor shares storage with the variable, so optimizer
    /// updates are visible through it.
    pub fn register(&mut self, name: &str, tensor: Tensor) -> Result<Tensor> {
        let var = Var::from_tensor(&tensor.to_dtype(DType::F32)?)?;
        let handle = var.as_tensor().clone();

        let mut data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| Error::model_loading("parameter registry lock poisoned"))?;
        if data.contains_key(name) {
            return Err(Error::model_loading(format!("duplicate trainable parameter: {}", name)));
        }
        data.insert(name.to_string(), var);

        Ok(handle)
    }

    /// Kaiming-uniform initialisation with `a = sqrt(5)`, i.e.
    /// `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`
    pub fn kaiming_uniform(
        &mut self,
        name: &str,
        (rows, fan_in): (usize, usize),
    ) -> Result<Tensor> {
        let bound = 1.0 / (fan_in as f32).sqrt();
        let values: Vec<f32> = (0..rows * fan_in)
            .map(|_| self.rng.random_range(-bound..bound))
            .collect();
        let tensor = Tensor::from_vec(values, (rows, fan_in), &self.device)?;
        self.register(name, tensor)
    }

    /// Normal initialisation with zero mean
    pub fn normal(&mut self, name: &str, shape: (usize, usize), std: f32) -> Result<Tensor> {
        let normal = Normal::new(0.0f32, std)
            .map_err(|e| Error::model_loading(format!("invalid init std {}: {}", std, e)))?;
        let values: Vec<f32> = (0..shape.0 * shape.1)
            .map(|_| normal.sample(&mut self.rng))
            .collect();
        let tensor = Tensor::from_vec(values, shape, &self.device)?;
        self.register(name, tensor)
    }

    /// Zero initialisation
    pub fn zeros(&mut self, name: &str, shape: &[usize]) -> Result<Tensor> {
        let tensor = Tensor::zeros(shape, DType::F32, &self.device)?;
        self.register(name, tensor)
    }

    /// All variables sorted by name
    pub fn named_vars(&self) -> Result<Vec<(String, Var)>> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| Error::model_loading("parameter registry lock poisoned"))?;
        let mut vars: Vec<(String, Var)> = data
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(vars)
    }

    /// Total number of trainable scalars
    pub fn num_parameters(&self) -> usize {
        self.varmap
            .all_vars()
            .iter()
            .map(|v| v.as_tensor().elem_count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_init_is_reproducible() {
        let device = Device::Cpu;
        let mut first = TrainableParams::new(7, &device);
        let mut second = TrainableParams::new(7, &device);

        let a = first.kaiming_uniform("a", (4, 16)).unwrap();
        let b = second.kaiming_uniform("a", (4, 16)).unwrap();

        let a: Vec<f32> = a.flatten_all().unwrap().to_vec1().unwrap();
        let b: Vec<f32> = b.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|v| v.abs() <= 0.25));
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut params = TrainableParams::new(0, &Device::Cpu);
        params.zeros("b", &[2, 2]).unwrap();
        assert!(params.zeros("b", &[2, 2]).is_err());
    }

    #[test]
    fn test_named_vars_sorted_and_counted() {
        let mut params = TrainableParams::new(0, &Device::Cpu);
        params.zeros("z", &[3]).unwrap();
        params.normal("a", (2, 2), 0.02).unwrap();

        let names: Vec<String> = params.named_vars().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a".to_string(), "z".to_string()]);
        assert_eq!(params.num_parameters(), 7);
    }
}
