//! Protocol dispatchers.
//!
//! A dispatcher takes a whole URI batch, keeps the URIs whose scheme it
//! handles and transfers each of them in its own Tokio task. Individual
//! transfer failures are logged and counted in the [`BatchReport`]. The
//! dispatch call itself fails on an unparsable URI, a panicking task, or an
//! FTP session that could not connect, log in or transfer.
//!
//! New protocols register by adding a [`ProtocolDownloader`] variant.

mod ftp;
mod http;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::download::{
    DownloadError, FailureKind, ProgressFn, RequestTarget, TransferOutcome, silent_progress,
};

pub use ftp::{FtpDownloader, FtpOptions};
pub use http::HttpDownloader;

/// Receives lifecycle and progress events for individual transfers.
///
/// `id` is the URI's position in the batch, so a URI listed twice yields two
/// distinct transfers.
pub trait TransferObserver: Send + Sync {
    /// A transfer of `url` is starting; the returned callback gets its
    /// completion percentage.
    fn started(&self, id: usize, url: &str) -> ProgressFn;

    /// The transfer ended.
    fn finished(&self, id: usize, url: &str, result: &Result<TransferOutcome, DownloadError>);
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl TransferObserver for SilentObserver {
    fn started(&self, _id: usize, _url: &str) -> ProgressFn {
        silent_progress()
    }

    fn finished(&self, _id: usize, _url: &str, _result: &Result<TransferOutcome, DownloadError>) {
    }
}

/// One URI that did not make it to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriFailure {
    /// The URI, without credentials.
    pub url: String,
    /// Failure classification.
    pub kind: FailureKind,
    /// Rendered error message.
    pub message: String,
}

/// Outcome of one dispatcher over one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// URIs in the batch this dispatcher handled.
    pub attempted: usize,
    /// Transfers that finished.
    pub completed: Vec<TransferOutcome>,
    /// Transfers that failed.
    pub failed: Vec<UriFailure>,
}

impl BatchReport {
    /// True when every handled URI was transferred.
    #[must_use]
    pub fn all_completed(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A protocol-specific downloader.
#[derive(Debug, Clone)]
pub enum ProtocolDownloader {
    /// `ftp` URIs.
    Ftp(FtpDownloader),
    /// `http` and `https` URIs.
    Http(HttpDownloader),
}

impl ProtocolDownloader {
    /// Short protocol label for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ftp(_) => "ftp",
            Self::Http(_) => "http",
        }
    }

    /// Whether this dispatcher transfers URIs with `scheme`.
    #[must_use]
    pub fn handles(&self, scheme: &str) -> bool {
        match self {
            Self::Ftp(_) => scheme.eq_ignore_ascii_case("ftp"),
            Self::Http(_) => {
                scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")
            }
        }
    }

    /// Whether a failed transfer fails the whole dispatch call.
    ///
    /// HTTP transfers only ever fail their own URI. FTP connection, login and
    /// transfer errors fail the batch; a missing remote file or a cancelled
    /// run does not.
    #[must_use]
    pub fn fails_batch(&self, error: &DownloadError) -> bool {
        match self {
            Self::Http(_) => false,
            Self::Ftp(_) => !matches!(
                error,
                DownloadError::FtpFileMissing { .. } | DownloadError::Cancelled { .. }
            ),
        }
    }

    /// Transfers one URI.
    ///
    /// # Errors
    ///
    /// Whatever the protocol's transfer reports.
    pub async fn transfer(
        &self,
        target: &RequestTarget,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, DownloadError> {
        match self {
            Self::Ftp(downloader) => downloader.download(target, progress, cancel).await,
            Self::Http(downloader) => downloader.download(target, progress, cancel).await,
        }
    }

    /// Transfers every URI of `uris` this dispatcher handles, concurrently.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::InvalidUrl`] when any URI of the batch cannot be
    ///   parsed; nothing is transferred in that case
    /// - [`DownloadError::TaskFailed`] when a transfer task panicked
    /// - the first transfer error that [`ProtocolDownloader::fails_batch`]
    ///   accepts, once every task has finished
    #[instrument(skip(self, uris, observer, cancel), fields(protocol = self.name(), batch = uris.len()))]
    pub async fn fetch_batch(
        &self,
        uris: &[String],
        observer: Arc<dyn TransferObserver>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, DownloadError> {
        let targets = uris
            .iter()
            .map(|uri| RequestTarget::parse(uri))
            .collect::<Result<Vec<_>, _>>()?;

        let mut handles = Vec::new();
        for (id, target) in targets.into_iter().enumerate() {
            if !self.handles(target.scheme()) {
                continue;
            }

            let url = target.to_string();
            debug!(url = %url, "spawning transfer");

            let downloader = self.clone();
            let observer = Arc::clone(&observer);
            let cancel = cancel.clone();
            handles.push((
                url,
                tokio::spawn(async move {
                    let url = target.to_string();
                    let progress = observer.started(id, &url);
                    let result = downloader.transfer(&target, progress, &cancel).await;
                    observer.finished(id, &url, &result);
                    result
                }),
            ));
        }

        let mut report = BatchReport {
            attempted: handles.len(),
            ..BatchReport::default()
        };
        let mut batch_failure = None;

        for (url, handle) in handles {
            match handle.await {
                Ok(Ok(outcome)) => report.completed.push(outcome),
                Ok(Err(e)) => {
                    let kind = e.failure_kind();
                    warn!(url = %url, kind = %kind, error = %e, "transfer failed");
                    report.failed.push(UriFailure {
                        url,
                        kind,
                        message: e.to_string(),
                    });
                    if self.fails_batch(&e) && batch_failure.is_none() {
                        batch_failure = Some(e);
                    }
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "transfer task panicked");
                    batch_failure.get_or_insert(DownloadError::TaskFailed {
                        url,
                        message: e.to_string(),
                    });
                }
            }
        }

        if let Some(e) = batch_failure {
            return Err(e);
        }

        info!(
            attempted = report.attempted,
            completed = report.completed.len(),
            failed = report.failed.len(),
            "batch dispatched"
        );
        Ok(report)
    }
}
