//! Check command implementation.
//!
//! Reports which inputs are eligible for submission without any network
//! activity.

use anyhow::bail;
use clap::Args;
use colored::Colorize;
use segmask_core::{SegmaskConfig, collect_inputs, validate_batch};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Image files or directories
    pub paths: Vec<PathBuf>,

    /// Descend into subdirectories
    #[arg(short, long)]
    pub recursive: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: &CheckArgs, config: &SegmaskConfig) -> anyhow::Result<()> {
    let selection = collect_inputs(&args.paths, args.recursive);
    let verdict = validate_batch(&selection.files, config.batch.max_batch_size);

    if args.json {
        let rejected: Vec<_> = selection
            .rejected
            .iter()
            .map(|(path, reason)| serde_json::json!({ "path": path, "reason": reason }))
            .collect();
        let output = serde_json::json!({
            "files": selection.files,
            "rejected": rejected,
            "error": verdict.as_ref().err().map(ToString::to_string),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for file in &selection.files {
            println!("  {} {}", "✓".green(), file.display());
        }
        for (path, reason) in &selection.rejected {
            println!("  {} {} ({})", "✗".red(), path.display(), reason.dimmed());
        }
        println!();
        println!("{} eligible, {} rejected", selection.files.len(), selection.rejected.len());
        if selection.files.len() > config.batch.confirm_threshold() {
            println!(
                "{} More than {} files; submit will ask for confirmation",
                "⚠".yellow(),
                config.batch.confirm_threshold()
            );
        }
    }

    if !selection.rejected.is_empty() {
        bail!("{} input(s) cannot be submitted", selection.rejected.len());
    }
    verdict?;
    Ok(())
}
