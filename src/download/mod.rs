//! Segmented HTTP download engine.
//!
//! This module moves a single HTTP(S) resource to disk by probing it with a
//! one-byte range request, splitting it into byte-range segments, fetching the
//! segments concurrently into scratch files and stitching them back together.
//!
//! # Features
//!
//! - One shared [`Transport`] with a process-wide connection cap
//! - Name discovery from `Content-Disposition` or the final URL path
//! - Linear backoff retries for timeouts and transient failures
//! - Bounded streaming relay per segment (memory use independent of file size)
//! - Basic authentication from `user:password@` URI userinfo
//! - Structured error types with full context
//!
//! # Example
//!
//! ```no_run
//! use multidownloader_core::download::{
//!     EngineOptions, HttpEngine, RequestTarget, Transport, TransportConfig, silent_progress,
//! };
//! use std::path::PathBuf;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Transport::new(TransportConfig::default())?;
//! let engine = HttpEngine::new(
//!     transport,
//!     EngineOptions {
//!         download_dir: PathBuf::from("./downloads"),
//!         ..EngineOptions::default()
//!     },
//! )?;
//! let target = RequestTarget::parse("https://example.com/archive.zip")?;
//! let outcome = engine
//!     .download(&target, silent_progress(), &CancellationToken::new())
//!     .await?;
//! println!("Downloaded: {}", outcome.path.display());
//! # Ok(())
//! # }
//! ```

pub mod constants;
mod engine;
mod error;
mod filename;
mod plan;
mod probe;
mod progress;
mod reassemble;
mod retry;
mod segment;
mod transport;

pub use engine::{EngineOptions, HttpEngine, PreparedTransfer, TransferOutcome};
pub use error::{DownloadError, EngineError, FailureKind};
pub(crate) use filename::{name_from_url, sanitize_filename};
pub use plan::{SegmentPlan, SegmentRange};
pub use probe::{ResourceDescriptor, probe};
pub use progress::{ProgressAggregator, ProgressFn, silent_progress};
pub(crate) use progress::percent_of;
pub use reassemble::reassemble;
pub use retry::{
    FailureType, RetryPolicy, RetryState, classify_error, retry_on_timeout, retry_on_transient,
};
pub use segment::{Segment, StagedSegment};
pub use transport::{Credentials, RequestTarget, Transport, TransportConfig, TransportResponse};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
