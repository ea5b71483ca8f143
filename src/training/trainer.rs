//! Training and evaluation loop
//!
//! Each epoch is a full pass of gradient updates over the training partition
//! followed by an accuracy pass over the test partition. The loop never stops
//! early; the final evaluation runs once over the eval partition.

use candle_nn::loss::cross_entropy;
use tracing::{debug, info, instrument};

use super::data::DataLoader;
use super::metrics::{Accuracy, EpochMetrics, MetricReport};
use super::optimizers::{AdamW, LinearWarmupScheduler, Optimizer, Scheduler};
use crate::cli::ProgressReporter;
use crate::config::{OptimizerSettings, TrainingSettings};
use crate::error::{Error, Result};
use crate::model::{argmax_last, SequenceClassifier};

/// Loaders for the three partitions
pub struct PartitionLoaders {
    /// Shuffled training loader
    pub train: DataLoader,
    /// Sequential test loader
    pub test: DataLoader,
    /// Sequential eval loader
    pub eval: DataLoader,
}

/// Outcome of the final evaluation
#[derive(Debug, Clone)]
pub struct FinalEvaluation {
    /// Accuracy over the eval partition
    pub report: MetricReport,
    /// True labels in eval order
    pub references: Vec<u32>,
    /// Predicted labels, index-aligned with `references`
    pub predictions: Vec<u32>,
}

/// Owns the model, optimizer and loaders for the whole run
pub struct Trainer {
    model: SequenceClassifier,
    optimizer: AdamW,
    scheduler: LinearWarmupScheduler,
    loaders: PartitionLoaders,
    accuracy: Accuracy,
    metrics: EpochMetrics,
    show_progress: bool,
}

impl Trainer {
    /// Attach AdamW and the warmup schedule to `model`.
    ///
    /// Total steps are `train batches × epochs`; the warmup spans
    /// `warmup_ratio` of them.
    pub fn new(
        model: SequenceClassifier,
        loaders: PartitionLoaders,
        training: &TrainingSettings,
        optimizer: &OptimizerSettings,
    ) -> Result<Self> {
        if loaders.train.num_batches() == 0 {
            return Err(Error::data("training partition is empty"));
        }

        let total_steps = loaders.train.num_batches() * training.num_epochs;
        let scheduler = LinearWarmupScheduler::with_warmup_ratio(
            training.learning_rate,
            total_steps,
            training.warmup_ratio,
        );
        let optimizer = AdamW::new(model.params(), scheduler.get_lr(), optimizer)?;

        info!(
            "Optimizing {} tensors for {} steps ({:.2} warmup)",
            optimizer.parameter_count(),
            total_steps,
            scheduler.warmup_steps()
        );
        debug!(
            "Trainable tensors: {}",
            optimizer.parameter_names().collect::<Vec<_>>().join(", ")
        );

        Ok(Self {
            model,
            optimizer,
            scheduler,
            loaders,
            accuracy: Accuracy::new(),
            metrics: EpochMetrics::new(),
            show_progress: true,
        })
    }

    /// Disable progress bars
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// Train for one epoch, then measure test accuracy and record it under `epoch`
    #[instrument(skip(self))]
    pub fn run_epoch(&mut self, epoch: usize) -> Result<MetricReport> {
        let mean_loss = self.train_phase(epoch)?;
        info!("Epoch {} mean training loss: {:.4}", epoch, mean_loss);

        self.model.set_training(false);
        self.accuracy.reset();
        let batches = self.loaders.test.num_batches();
        let progress = self.progress(&format!("epoch {epoch} test"), batches);
        evaluate_pass(&self.model, &mut self.loaders.test, &mut self.accuracy, &progress)?;
        progress.finish_and_clear();

        let report = self.accuracy.compute();
        info!("epoch {}: {{'accuracy': {}}}", epoch, report.accuracy);
        self.metrics.insert(epoch, report);
        Ok(report)
    }

    fn train_phase(&mut self, epoch: usize) -> Result<f64> {
        self.model.set_training(true);
        let batches = self.loaders.train.num_batches();
        let progress = self.progress(&format!("epoch {epoch} train"), batches);

        let mut loss_sum = 0.0;
        let mut steps = 0usize;
        for batch in self.loaders.train.epoch() {
            let batch = batch?;
            let logits = self.model.forward(&batch.input_ids, &batch.attention_mask)?;
            let loss = cross_entropy(&logits, &batch.labels)?;
            let loss_value = loss.to_scalar::<f32>()? as f64;

            // The gradient store is dropped after the update.
            let grads = loss.backward()?;
            self.optimizer.step(&grads)?;
            self.scheduler.step();
            self.optimizer.set_learning_rate(self.scheduler.get_lr());

            loss_sum += loss_value;
            steps += 1;
            debug!(
                "step {} loss {:.4} lr {:.3e}",
                self.optimizer.step_count(),
                loss_value,
                self.optimizer.learning_rate()
            );
            progress.advance(&format!("loss: {:.4}", loss_value));
        }
        progress.finish_and_clear();

        Ok(if steps == 0 { 0.0 } else { loss_sum / steps as f64 })
    }

    /// One ordered pass over the eval partition with a fresh accumulator
    #[instrument(skip(self))]
    pub fn evaluate_final(&mut self) -> Result<FinalEvaluation> {
        self.model.set_training(false);
        self.accuracy.reset();

        let progress = self.progress("final evaluation", self.loaders.eval.num_batches());
        let (references, predictions) =
            evaluate_pass(&self.model, &mut self.loaders.eval, &mut self.accuracy, &progress)?;
        progress.finish_and_clear();

        let report = self.accuracy.compute();
        info!("Validation accuracy: {}", report.accuracy);
        Ok(FinalEvaluation {
            report,
            references,
            predictions,
        })
    }

    /// Per-epoch reports so far
    pub fn metrics(&self) -> &EpochMetrics {
        &self.metrics
    }

    /// Model being trained
    pub fn model(&self) -> &SequenceClassifier {
        &self.model
    }

    /// Current learning rate
    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// Optimizer steps taken
    pub fn global_step(&self) -> usize {
        self.optimizer.step_count()
    }

    fn progress(&self, message: &str, total: usize) -> ProgressReporter {
        if self.show_progress {
            ProgressReporter::new_with_total(message, total as u64)
        } else {
            ProgressReporter::hidden()
        }
    }
}

/// Predict every batch of `loader` in order, feeding the accumulator.
///
/// Returns the flat reference and prediction lists.
fn evaluate_pass(
    model: &SequenceClassifier,
    loader: &mut DataLoader,
    accuracy: &mut Accuracy,
    progress: &ProgressReporter,
) -> Result<(Vec<u32>, Vec<u32>)> {
    let mut references = Vec::with_capacity(loader.dataset_size());
    let mut predictions = Vec::with_capacity(loader.dataset_size());

    for batch in loader.epoch() {
        let batch = batch?;
        let logits = model.forward(&batch.input_ids, &batch.attention_mask)?.detach();
        let batch_predictions = argmax_last(&logits)?;

        debug!("predictions: {:?}", batch_predictions);
        debug!("references: {:?}", batch.references);
        accuracy.add_batch(&batch_predictions, &batch.references)?;

        references.extend_from_slice(&batch.references);
        predictions.extend(batch_predictions);
        progress.advance("");
    }

    Ok((references, predictions))
}
