use anyhow::{Context, Result};
use clap::Parser;
use lorax_finetune::cli::logging::init_logging;
use lorax_finetune::cli::Cli;
use lorax_finetune::{Pipeline, RunConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json)?;

    let config = RunConfig::load(&cli.dataset, &cli.note, cli.config.as_deref())
        .context("configuration")?;

    let outcome = Pipeline::new(config).run().await?;

    info!("Validation metric: {{'accuracy': {}}}", outcome.summary.validation_metric.accuracy);
    info!("Summary: {}", outcome.summary_path.display());
    Ok(())
}
