//! Learning rate schedules

use super::Scheduler;

/// Linear warmup followed by linear decay to zero.
///
/// The warmup length may be fractional, so `0.06 · total` steps are honoured
/// exactly instead of being rounded.
#[derive(Debug, Clone)]
pub struct LinearWarmupScheduler {
    /// Peak learning rate
    base_lr: f64,

    /// Total training steps
    total_steps: usize,

    /// Warmup steps
    warmup_steps: f64,

    /// Current step
    current_step: usize,

    /// Current learning rate
    current_lr: f64,
}

impl LinearWarmupScheduler {
    /// Create a scheduler positioned at step 0
    pub fn new(base_lr: f64, total_steps: usize, warmup_steps: f64) -> Self {
        let mut scheduler = Self {
            base_lr,
            total_steps,
            warmup_steps: warmup_steps.max(0.0),
            current_step: 0,
            current_lr: 0.0,
        };
        scheduler.current_lr = scheduler.lr_at(0);
        scheduler
    }

    /// Scheduler whose warmup spans `ratio` of the total steps
    pub fn with_warmup_ratio(base_lr: f64, total_steps: usize, ratio: f64) -> Self {
        Self::new(base_lr, total_steps, ratio * total_steps as f64)
    }

    /// Learning rate at an arbitrary step
    pub fn lr_at(&self, step: usize) -> f64 {
        let step = step as f64;
        let total = self.total_steps as f64;
        let factor = if step < self.warmup_steps {
            step / self.warmup_steps.max(1.0)
        } else {
            ((total - step) / (total - self.warmup_steps).max(1.0)).max(0.0)
        };
        self.base_lr * factor
    }

    /// Fractional warmup length
    pub fn warmup_steps(&self) -> f64 {
        self.warmup_steps
    }
}

impl Scheduler for LinearWarmupScheduler {
    fn step(&mut self) {
        self.current_step += 1;
        self.current_lr = self.lr_at(self.current_step);
    }

    fn get_lr(&self) -> f64 {
        self.current_lr
    }
}
