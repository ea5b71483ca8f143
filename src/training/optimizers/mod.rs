//! Optimizers and learning rate schedulers
//!
//! AdamW updates every trainable variable; the scheduler sets its learning
//! rate after each step.

pub mod adamw;
pub mod schedulers;

pub use adamw::AdamW;
pub use schedulers::LinearWarmupScheduler;

use candle_core::backprop::GradStore;

use crate::error::Result;

/// Trait for optimizers
pub trait Optimizer {
    /// Perform optimization step
    fn step(&mut self, gradients: &GradStore) -> Result<()>;

    /// Get current learning rate
    fn learning_rate(&self) -> f64;

    /// Set learning rate
    fn set_learning_rate(&mut self, lr: f64);

    /// Get parameter count
    fn parameter_count(&self) -> usize;

    /// Get current step count
    fn step_count(&self) -> usize;
}

/// Trait for learning rate schedulers
pub trait Scheduler {
    /// Advance by one optimizer step
    fn step(&mut self);

    /// Get current learning rate
    fn get_lr(&self) -> f64;
}
