//! LoRA (Low-Rank Adaptation) module for parameter-efficient fine-tuning

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod layer;
pub mod params;

pub use config::{LoraConfig, TargetModule};
pub use layer::{AdaptedLinear, LoraBranch};
pub use params::TrainableParams;

/// Trainable versus total parameter count of an adapted model
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParameterSummary {
    /// Scalars receiving gradient updates
    pub trainable: usize,
    /// All scalars, frozen and trainable
    pub total: usize,
}

impl ParameterSummary {
    /// Percentage of trainable parameters
    pub fn trainable_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * self.trainable as f64 / self.total as f64
    }
}

impl fmt::Display for ParameterSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trainable params: {} || all params: {} || trainable%: {:.4}",
            self.trainable,
            self.total,
            self.trainable_percent()
        )
    }
}
