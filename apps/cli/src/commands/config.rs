//! Config command implementation.

use anyhow::{Context, bail};
use clap::Subcommand;
use colored::Colorize;
use segmask_core::SegmaskConfig;

/// Endpoint written by `config init` until the user edits it.
const PLACEHOLDER_ENDPOINT: &str = "http://localhost:58888/image/";

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the merged configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the configuration file locations
    Path,

    /// Write a default global configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn execute(action: ConfigAction, config: &SegmaskConfig) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show { json } => show(config, json),
        ConfigAction::Path => {
            for (label, path) in [
                ("global", SegmaskConfig::default_global_path()),
                ("local", SegmaskConfig::default_local_path()),
            ] {
                let state = if path.exists() { "found".green() } else { "not found".dimmed() };
                println!("{:<7} {} ({})", label, path.display(), state);
            }
            Ok(())
        }
        ConfigAction::Init { force } => init(force),
    }
}

fn show(config: &SegmaskConfig, json: bool) -> anyhow::Result<()> {
    let resolved = config.resolved();
    if json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
    } else {
        let rendered = toml::to_string_pretty(&resolved).context("Failed to render configuration")?;
        println!("{}", rendered.trim_end());
    }
    if let Err(e) = config.validate() {
        eprintln!("{} {}", "⚠".yellow(), e);
    }
    Ok(())
}

fn init(force: bool) -> anyhow::Result<()> {
    let path = SegmaskConfig::default_global_path();
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let config =
        SegmaskConfig { endpoint: Some(PLACEHOLDER_ENDPOINT.to_string()), ..Default::default() }.resolved();
    config
        .save_to_file(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("{} Wrote {}", "✓".green(), path.display());
    println!("  Edit the endpoint before submitting images.");
    Ok(())
}
