//! End-to-end fine-tuning run
//!
//! Stages run strictly in order: data files are checked, the model files are
//! resolved, partitions are tokenized, the adapted classifier is assembled and
//! trained, and the final evaluation is written out. A failure in any stage
//! aborts the run with the stage name attached.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use candle_core::Device;
use chrono::Local;
use tracing::{debug, info, instrument, warn};

use crate::config::{ConfusionLabels, RunConfig};
use crate::encoder::{EncoderConfig, TextTokenizer};
use crate::model::{ModelFiles, SequenceClassifier};
use crate::report::{write_confusion_matrix, ConfusionOutputs, PartitionSizes, RunSummary};
use crate::training::{
    ConfusionMatrix, DataLoader, DatasetPaths, FinalEvaluation, PaddingCollator, Partition,
    PartitionLoaders, PartitionRole, TokenizedPartition, Trainer,
};
use crate::utils::device::{describe, select_device};

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Summary as written to disk
    pub summary: RunSummary,
    /// Location of the summary file
    pub summary_path: PathBuf,
    /// Confusion matrix over the eval partition
    pub confusion_matrix: ConfusionMatrix,
    /// Locations of the confusion matrix files
    pub confusion_outputs: ConfusionOutputs,
}

/// Tokenized partitions ready for the trainer
pub struct PreparedData {
    /// Train, test and eval loaders
    pub loaders: PartitionLoaders,
    /// Record counts per partition
    pub sizes: PartitionSizes,
}

/// A configured fine-tuning run
pub struct Pipeline {
    config: RunConfig,
    show_progress: bool,
}

impl Pipeline {
    /// Create a run from a validated configuration
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            show_progress: true,
        }
    }

    /// Disable progress bars, for non-interactive runs
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// Configuration of this run
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Execute every stage and write the run outputs
    #[instrument(skip(self), fields(dataset = %self.config.dataset))]
    pub async fn run(self) -> Result<RunOutcome> {
        let started = Instant::now();
        let config = &self.config;
        info!(
            "Fine-tuning {} on dataset {} for {} epochs",
            config.model.model_id, config.dataset, config.training.num_epochs
        );
        debug!("Effective configuration:\n{}", config.to_yaml().context("configuration")?);

        let paths = DatasetPaths::resolve(&config.data.data_dir, &config.dataset);
        paths.ensure_exist().context("data load")?;

        let device =
            select_device(config.model.device, config.training.seed).context("model load")?;
        let files = ModelFiles::resolve(&config.model).await.context("model load")?;
        let encoder_config = EncoderConfig::from_file(&files.config).context("model load")?;
        let tokenizer = TextTokenizer::from_file(
            &files.tokenizer,
            config.data.max_length,
            encoder_config.pad_token_id,
            encoder_config.eos_token_id,
        )
        .context("model load")?;

        let data = prepare_data(config, &paths, &tokenizer, &device).context("data load")?;

        let model = SequenceClassifier::load(
            &files.weights,
            &encoder_config,
            config.training.num_labels,
            &config.lora,
            config.training.seed,
            &device,
        )
        .context("model load")?;
        println!("{model}");
        info!("{}", model.parameter_summary());

        let mut trainer = Trainer::new(model, data.loaders, &config.training, &config.optimizer)
            .context("model load")?;
        if !self.show_progress {
            trainer = trainer.without_progress();
        }

        for epoch in 0..config.training.num_epochs {
            trainer.run_epoch(epoch).with_context(|| format!("epoch {epoch}"))?;
        }

        let evaluation = trainer.evaluate_final().context("final evaluation")?;

        let confusion_matrix = confusion_matrix_for(config, &evaluation).context("final report")?;
        let confusion_outputs = write_confusion_matrix(
            &confusion_matrix,
            &config.report.results_dir,
            &config.dataset,
            config.training.num_epochs,
        )
        .context("final report")?;

        let summary = RunSummary::new(
            config,
            data.sizes,
            trainer.metrics().clone(),
            evaluation.report,
            describe(&device),
            &Local::now(),
            started.elapsed().as_secs_f64() / 60.0,
        );
        let summary_path = summary.write(&config.report.results_dir).context("final report")?;

        info!(
            "Run finished in {:.2} minutes, validation accuracy {}",
            summary.processing_time, summary.validation_metric.accuracy
        );
        Ok(RunOutcome {
            summary,
            summary_path,
            confusion_matrix,
            confusion_outputs,
        })
    }
}

/// Load, check and tokenize the three partitions and wrap them in loaders.
///
/// The train loader reshuffles every epoch with the run seed; test and eval
/// keep file order.
#[instrument(skip_all)]
pub fn prepare_data(
    config: &RunConfig,
    paths: &DatasetPaths,
    tokenizer: &TextTokenizer,
    device: &Device,
) -> crate::Result<PreparedData> {
    let load = |role: PartitionRole| -> crate::Result<TokenizedPartition> {
        let partition = Partition::load(
            role,
            paths.path(role),
            &config.data.text_column,
            &config.data.label_column,
        )?;
        partition.check_labels(config.training.num_labels)?;
        TokenizedPartition::from_partition(partition, tokenizer)
    };

    let train = load(PartitionRole::Train)?;
    let test = load(PartitionRole::Test)?;
    let eval = load(PartitionRole::Eval)?;
    let sizes = PartitionSizes {
        train: train.len(),
        test: test.len(),
        eval: eval.len(),
    };
    info!(
        "Partition sizes: train {}, test {}, eval {}",
        sizes.train, sizes.test, sizes.eval
    );

    let collator = PaddingCollator::new(tokenizer.pad_id(), config.data.padding_side, device);
    let batch_size = config.training.batch_size;
    let loaders = PartitionLoaders {
        train: DataLoader::shuffled(train, batch_size, collator.clone(), config.training.seed),
        test: DataLoader::sequential(test, batch_size, collator.clone()),
        eval: DataLoader::sequential(eval, batch_size, collator),
    };

    Ok(PreparedData { loaders, sizes })
}

/// Confusion matrix over observed labels, or over `0..num_labels` when configured
pub fn confusion_matrix_for(
    config: &RunConfig,
    evaluation: &FinalEvaluation,
) -> crate::Result<ConfusionMatrix> {
    let num_labels = config.training.num_labels;
    match config.report.confusion_labels {
        ConfusionLabels::Observed => {
            let matrix =
                ConfusionMatrix::from_predictions(&evaluation.references, &evaluation.predictions)?;
            if matrix.size() < num_labels {
                warn!(
                    "Only {} of {} label classes occur in the final evaluation; \
                     the confusion matrix is {}x{}",
                    matrix.size(),
                    num_labels,
                    matrix.size(),
                    matrix.size()
                );
            }
            Ok(matrix)
        }
        ConfusionLabels::Configured => ConfusionMatrix::with_labels(
            (0..num_labels as u32).collect(),
            &evaluation.references,
            &evaluation.predictions,
        ),
    }
}
