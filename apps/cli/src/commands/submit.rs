//! Submit command implementation.
//!
//! Uploads images through the batch runner, renders progress, and saves the
//! result images when an output directory is configured.

use anyhow::{Context, bail};
use clap::Args;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use segmask_core::{
    BatchEvent, BatchOutcome, BatchRunner, BatchTerminal, HttpTransportFactory, ProcessingParameters,
    ResultDownloader, SegmaskConfig, collect_inputs,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::signal;

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Image files or directories
    pub paths: Vec<PathBuf>,

    /// Upload URL of the segmentation service (overrides config)
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Mask blur radius (0-10)
    #[arg(long, default_value = "0")]
    pub mask_blur: i32,

    /// Mask edge offset (-10 to 10)
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    pub mask_offset: i32,

    /// Invert the output mask
    #[arg(long)]
    pub invert: bool,

    /// Descend into subdirectories
    #[arg(short, long)]
    pub recursive: bool,

    /// Directory to save result images into (overrides config)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Print events as JSON lines instead of a progress bar
    #[arg(long)]
    pub json: bool,

    /// Skip the confirmation prompt for large batches
    #[arg(short, long)]
    pub yes: bool,
}

pub async fn execute(args: SubmitArgs, mut config: SegmaskConfig) -> anyhow::Result<()> {
    let selection = collect_inputs(&args.paths, args.recursive);
    for (path, reason) in &selection.rejected {
        eprintln!("  {} {} ({})", "✗".red(), path.display(), reason);
    }
    if !selection.rejected.is_empty() {
        bail!("validation error: {} input(s) cannot be submitted", selection.rejected.len());
    }

    let parameters = ProcessingParameters::new(args.mask_blur, args.mask_offset, args.invert)?;
    // Flags are the last configuration layer.
    if let Some(ref endpoint) = args.endpoint {
        config.endpoint = Some(endpoint.clone());
    }
    if let Some(ref dir) = args.output_dir {
        config.output_dir = Some(dir.clone());
    }
    let endpoint = config.endpoint.clone().context(
        "No API endpoint configured. Pass --endpoint, set SEGMASK_ENDPOINT, or run `segmask config init`",
    )?;
    config.validate().context("Invalid configuration")?;
    let output_dir = config.output_dir.clone();
    let files = selection.files;

    if files.len() > config.batch.confirm_threshold() && !args.yes {
        let proceed = inquire::Confirm::new(&format!("Submit {} files?", files.len()))
            .with_default(false)
            .prompt()
            .context("Confirmation required for large batches (use --yes to skip)")?;
        if !proceed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let runner = Arc::new(
        BatchRunner::new(Arc::new(HttpTransportFactory::new(config.http_settings())), Handle::current())
            .with_poll_policy(config.poll_policy())
            .with_limits(config.runner_limits()),
    );

    let (sink, mut events) = segmask_core::channel();
    let handle = runner.submit(files, endpoint, parameters, Arc::new(sink))?;

    // Setup Ctrl+C handler
    let cancel_runner = Arc::clone(&runner);
    let quiet = args.json;
    let ctrl_c = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() && cancel_runner.request_cancel() && !quiet {
            eprintln!("\n{} Cancellation requested, finishing current request...", "⚠".yellow());
        }
    });

    let bar = if args.json { ProgressBar::hidden() } else { progress_bar() };
    let mut total = 0;
    let mut done = 0;

    while let Some(event) = events.recv().await {
        if args.json {
            println!("{}", serde_json::to_string(&event)?);
        }
        match &event {
            BatchEvent::Started { total: count } => {
                total = *count;
                bar.set_message(format!("0/{}", total));
            }
            BatchEvent::Progress { percent } => bar.set_position(u64::from(*percent)),
            BatchEvent::ItemSucceeded { result, .. } => {
                done += 1;
                bar.set_message(format!("{}/{}", done, total));
                if !args.json {
                    bar.suspend(|| {
                        println!(
                            "  {} {} ({} result image(s))",
                            "✓".green(),
                            result.source_path.display(),
                            result.result_image_urls.len()
                        );
                    });
                }
            }
            BatchEvent::ItemFailed { failure, .. } => {
                done += 1;
                bar.set_message(format!("{}/{}", done, total));
                if !args.json {
                    bar.suspend(|| {
                        println!("  {} {}: {}", "✗".red(), failure.source_path.display(), failure.message);
                    });
                }
            }
            BatchEvent::Finished { .. } | BatchEvent::Cancelled | BatchEvent::Failed { .. } => break,
        }
    }
    bar.finish_and_clear();
    ctrl_c.abort();

    match handle.wait().await {
        BatchTerminal::Finished(outcome) => {
            if !args.json {
                print_summary(&outcome);
            }
            if let Some(dir) = output_dir {
                download(&config, &outcome, &dir, args.json).await?;
            }
            Ok(())
        }
        BatchTerminal::Cancelled(outcome) => {
            if !args.json {
                print_summary(&outcome);
            }
            bail!("Batch cancelled after {} file(s)", outcome.processed())
        }
        BatchTerminal::Failed(message) => bail!("Batch failed: {}", message),
    }
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40.cyan/blue} {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar
}

fn print_summary(outcome: &BatchOutcome) {
    println!();
    let summary = outcome.summary();
    if outcome.is_complete_success() {
        println!("{} {}", "✓".green(), summary.bold());
    } else {
        println!("{} {}", "⚠".yellow(), summary.bold());
    }
}

async fn download(
    config: &SegmaskConfig,
    outcome: &BatchOutcome,
    dir: &Path,
    json: bool,
) -> anyhow::Result<()> {
    if outcome.succeeded.is_empty() {
        return Ok(());
    }

    let downloader = ResultDownloader::new(&config.http_settings())?;
    let bar = if json { ProgressBar::hidden() } else { progress_bar() };
    bar.set_message("downloading");

    let report = downloader
        .download_outcome(outcome, dir, |percent| bar.set_position(u64::from(percent)))
        .await
        .with_context(|| format!("Failed to save results to {}", dir.display()))?;
    bar.finish_and_clear();

    if json {
        let line = serde_json::json!({ "type": "download_report", "report": report });
        println!("{}", serde_json::to_string(&line)?);
        return Ok(());
    }

    println!("{} Saved {} image(s) to {}", "✓".green(), report.saved.len(), dir.display());
    for (url, error) in &report.failed {
        eprintln!("  {} {}: {}", "✗".red(), url, error);
    }
    Ok(())
}
