//! CLI entry point for the multidownloader tool.

use std::io::{self, IsTerminal};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use multidownloader_core::{TransferOrchestrator, load_settings};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;
mod progress_ui;

use cli::Args;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let loaded = load_settings(args.config.as_deref())?;
    if loaded.loaded_from_file {
        debug!(path = %loaded.path.display(), "settings loaded");
    } else {
        debug!(path = %loaded.path.display(), "no settings file, using defaults");
    }

    let mut settings = loaded.settings;
    args.apply_overrides(&mut settings);
    settings
        .validate()
        .context("Invalid settings after applying command-line options")?;

    info!(
        uris = settings.uris.len(),
        download_location = %settings.download_location.display(),
        segments_per_file = settings.segments_per_file,
        connection_limit = settings.default_connection_limit,
        "Multidownloader starting"
    );

    let orchestrator = TransferOrchestrator::new(&settings.orchestrator_config())?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling downloads");
            ctrl_c.cancel();
        }
    });

    let use_bars = !args.quiet && io::stderr().is_terminal();
    let observer = progress_ui::build_observer(use_bars);

    let summary = orchestrator
        .fetch_all(&settings.uris, observer, &cancel)
        .await;

    info!(
        completed = summary.completed_transfers(),
        failed = summary.failed_transfers(),
        "Download complete"
    );

    if summary.is_success() {
        println!("Finished getting files without issues");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("Finished getting files with issues");
        Ok(ExitCode::FAILURE)
    }
}
