//! Utility functions and types for the fine-tuning pipeline

use std::path::Path;
use std::fs;

use crate::error::Result;

/// Neural-network helpers
pub mod nn {
    use std::sync::Arc;

    use candle_core::Tensor;
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::error::Result;

    /// Dropout driven by a seeded generator.
    ///
    /// Clones share the generator, so every dropout site in a model draws from
    /// one reproducible stream. On accelerators the mask is drawn on the device
    /// from its own generator, seeded once by [`super::device::select_device`].
    #[derive(Debug, Clone)]
    pub struct SeededDropout {
        p: f32,
        rng: Arc<Mutex<StdRng>>,
    }

    impl SeededDropout {
        /// Create a dropout with its own generator
        pub fn new(p: f32, seed: u64) -> Self {
            Self::with_rng(p, Arc::new(Mutex::new(StdRng::seed_from_u64(seed))))
        }

        /// Create a dropout drawing from a shared generator
        pub fn with_rng(p: f32, rng: Arc<Mutex<StdRng>>) -> Self {
            Self { p, rng }
        }

        /// Drop probability
        pub fn probability(&self) -> f32 {
            self.p
        }

        /// Whether the dropout changes anything in training mode
        pub fn is_active(&self) -> bool {
            self.p > 0.0
        }

        /// Zero elements with probability `p` and rescale the rest; identity outside training
        pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
            if !train || !self.is_active() {
                return Ok(xs.clone());
            }

            if !xs.device().is_cpu() {
                return Ok(candle_nn::ops::dropout(xs, self.p)?);
            }

            let keep_scale = 1.0 / (1.0 - self.p);
            let mask: Vec<f32> = {
                let mut rng = self.rng.lock();
                (0..xs.elem_count())
                    .map(|_| if rng.random::<f32>() < self.p { 0.0 } else { keep_scale })
                    .collect()
            };
            let mask = Tensor::from_vec(mask, xs.shape(), xs.device())?.to_dtype(xs.dtype())?;
            Ok(xs.mul(&mask)?)
        }
    }
}

/// Device selection
pub mod device {
    use candle_core::Device;
    use tracing::{info, warn};

    use crate::config::DevicePreference;
    use crate::error::Result;

    /// Resolve the compute device once for the whole run.
    ///
    /// Accelerator generators are seeded with `seed + 1`, the stream used for
    /// dropout masks on the CPU.
    pub fn select_device(preference: DevicePreference, seed: u64) -> Result<Device> {
        let device = match preference {
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda => Device::new_cuda(0)?,
            DevicePreference::Metal => Device::new_metal(0)?,
            DevicePreference::Auto => {
                let accelerator = if candle_core::utils::cuda_is_available() {
                    Some(Device::new_cuda(0))
                } else if candle_core::utils::metal_is_available() {
                    Some(Device::new_metal(0))
                } else {
                    None
                };
                match accelerator {
                    Some(Ok(device)) => device,
                    Some(Err(e)) => {
                        warn!("Accelerator unavailable ({}), training on CPU", e);
                        Device::Cpu
                    }
                    None => {
                        warn!("No accelerator compiled in, training on CPU");
                        Device::Cpu
                    }
                }
            }
        };

        if !device.is_cpu() {
            device.set_seed(seed.wrapping_add(1))?;
        }

        info!("Using device: {}", describe(&device));
        Ok(device)
    }

    /// Short device name for logs and reports
    pub fn describe(device: &Device) -> &'static str {
        match device {
            Device::Cpu => "cpu",
            Device::Cuda(_) => "cuda",
            Device::Metal(_) => "metal",
        }
    }
}

/// Time formatting
pub mod time {
    use chrono::{DateTime, Local};

    /// Minute-resolution run stamp, `day-month-year-hour-minute`
    pub fn run_stamp(now: &DateTime<Local>) -> String {
        now.format("%d-%m-%Y-%H-%M").to_string()
    }
}

/// File I/O utilities
pub mod io {
    use super::*;

    /// Ensure directory exists
    pub fn ensure_dir_exists<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_dropout_identity_outside_training() {
        let dropout = nn::SeededDropout::new(0.5, 1);
        let xs = Tensor::ones((2, 3), candle_core::DType::F32, &Device::Cpu).unwrap();
        let out: Vec<f32> =
            dropout.forward(&xs, false).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert!(out.iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_dropout_is_seeded() {
        let xs = Tensor::ones((4, 8), candle_core::DType::F32, &Device::Cpu).unwrap();
        let first: Vec<f32> = nn::SeededDropout::new(0.5, 9)
            .forward(&xs, true)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        let second: Vec<f32> = nn::SeededDropout::new(0.5, 9)
            .forward(&xs, true)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(first, second);
        assert!(first.iter().all(|v| *v == 0.0 || *v == 2.0));
    }

    #[test]
    fn test_dropout_on_accelerator_keeps_scaling() {
        if !candle_core::utils::cuda_is_available() {
            return;
        }
        let device = device::select_device(crate::config::DevicePreference::Cuda, 7).unwrap();
        let xs = Tensor::ones((4, 8), candle_core::DType::F32, &device).unwrap();
        let out: Vec<f32> = nn::SeededDropout::new(0.5, 9)
            .forward(&xs, true)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert!(out.iter().all(|v| *v == 0.0 || *v == 2.0));
    }

    #[test]
    fn test_run_stamp_format() {
        let now = chrono::Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 59).unwrap();
        assert_eq!(time::run_stamp(&now), "07-03-2024-09-05");
    }

    #[test]
    fn test_ensure_dir_exists() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        io::ensure_dir_exists(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn test_select_cpu() {
        let device = device::select_device(crate::config::DevicePreference::Cpu, 42).unwrap();
        assert_eq!(device::describe(&device), "cpu");
    }
}
