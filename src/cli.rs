//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use multidownloader_core::Settings;

/// Download files over HTTP(S) and FTP, splitting large HTTP files into
/// concurrently fetched segments.
///
/// Settings are read from `Settings.json` in the working directory (or the
/// file given with `--config`); command-line options override them. URIs
/// given on the command line replace the `URIs` list from the settings file.
#[derive(Parser, Debug)]
#[command(name = "multidownloader")]
#[command(author, version, about)]
pub struct Args {
    /// URIs to download (http, https, ftp); `user:password@` enables authentication
    pub uris: Vec<String>,

    /// Settings file (default: ./Settings.json when present)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory downloaded files are written to
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Segments per file when the server supports ranges (1-64)
    #[arg(short = 's', long, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub segments: Option<u8>,

    /// Maximum concurrent connections across all downloads (1-1000)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u16).range(1..=1000))]
    pub connections: Option<u16>,

    /// Per-request timeout in seconds (1-3600)
    #[arg(short = 't', long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: Option<u64>,

    /// Retries for timed-out requests (0-100)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub retries: Option<u8>,

    /// Seconds added to the wait before each further retry (0-3600)
    #[arg(short = 'b', long, value_parser = clap::value_parser!(u64).range(0..=3600))]
    pub backoff: Option<u64>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Applies command-line overrides on top of file settings.
    pub fn apply_overrides(&self, settings: &mut Settings) {
        if !self.uris.is_empty() {
            settings.uris.clone_from(&self.uris);
        }
        if let Some(dir) = &self.output_dir {
            settings.download_location.clone_from(dir);
        }
        if let Some(segments) = self.segments {
            settings.segments_per_file = usize::from(segments);
        }
        if let Some(connections) = self.connections {
            settings.default_connection_limit = usize::from(connections);
        }
        if let Some(timeout) = self.timeout {
            settings.timeout_seconds = timeout;
        }
        if let Some(retries) = self.retries {
            settings.timeout_retries = u32::from(retries);
        }
        if let Some(backoff) = self.backoff {
            settings.linear_backoff_interval = backoff;
        }
    }
}
