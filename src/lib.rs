//! Multidownloader Core Library
//!
//! This library fetches batches of remote files over HTTP(S) and FTP. Large
//! HTTP resources that support byte ranges are split into segments, fetched
//! concurrently into scratch files and reassembled byte-exact.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Transport, probe, segment planning and fetching, retry, reassembly
//! - [`dispatch`] - Protocol dispatchers (HTTP and FTP) over a URI batch
//! - [`orchestrator`] - Runs every dispatcher and reports overall success
//! - [`config`] - `Settings.json` loading and validation

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dispatch;
pub mod download;
pub mod orchestrator;
mod user_agent;

// Re-export commonly used types
pub use config::{LoadedSettings, Settings, load_settings};
pub use dispatch::{BatchReport, ProtocolDownloader, SilentObserver, TransferObserver};
pub use download::{
    DownloadError, EngineError, FailureKind, HttpEngine, ProgressFn, RequestTarget, RetryPolicy,
    TransferOutcome, Transport,
};
pub use orchestrator::{OrchestratorConfig, TransferOrchestrator, TransferSummary};
