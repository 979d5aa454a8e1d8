//! Segmask CLI - batch client for a remote image segmentation service.
//!
//! Provides the `segmask` command for submitting images, checking inputs
//! before submission, and managing configuration.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use segmask_core::SegmaskConfig;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use commands::{check, config, submit};

/// Segmask - submit images for background segmentation
#[derive(Parser, Debug)]
#[command(
    name = "segmask",
    author,
    version,
    about = "Segmask - batch client for the image segmentation service",
    long_about = "Uploads images to a segmentation service one at a time, waits for each result,\nand saves the returned mask images."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit images for processing
    ///
    /// Accepts image files and directories. Directories are expanded to the
    /// .jpg, .jpeg, .png and .bmp files they contain.
    Submit(submit::SubmitArgs),

    /// List which inputs would be submitted, without contacting the service
    Check(check::CheckArgs),

    /// Show or initialize configuration
    #[command(subcommand)]
    Config(config::ConfigAction),
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let loaded = SegmaskConfig::discover_and_load();

    // Logs share stderr with the progress bar, so stay quiet unless asked.
    let level = args
        .log_level
        .clone()
        .or_else(|| loaded.as_ref().ok().and_then(|c| c.log_level.clone()))
        .unwrap_or_else(|| "warn".to_string());
    init_tracing(&level)?;

    let cli_config = loaded.context("Failed to load configuration")?;

    match args.command {
        Command::Submit(submit_args) => submit::execute(submit_args, cli_config).await?,
        Command::Check(check_args) => check::execute(&check_args, &cli_config)?,
        Command::Config(action) => config::execute(action, &cli_config)?,
    }

    Ok(())
}
