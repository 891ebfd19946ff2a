//! HTTP(S) dispatcher backed by the segmented engine.

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::download::{DownloadError, HttpEngine, ProgressFn, RequestTarget, TransferOutcome};

/// Transfers `http` and `https` URIs with an [`HttpEngine`].
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    engine: HttpEngine,
}

impl HttpDownloader {
    /// Wraps an engine.
    #[must_use]
    pub fn new(engine: HttpEngine) -> Self {
        Self { engine }
    }

    /// The engine doing the work.
    #[must_use]
    pub fn engine(&self) -> &HttpEngine {
        &self.engine
    }

    /// Downloads one resource.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::UnsupportedScheme`] for non-HTTP targets, or
    /// whatever the engine reports.
    #[instrument(skip(self, target, progress, cancel), fields(url = %target))]
    pub async fn download(
        &self,
        target: &RequestTarget,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, DownloadError> {
        let scheme = target.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(DownloadError::UnsupportedScheme {
                url: target.to_string(),
                scheme: scheme.to_string(),
            });
        }
        self.engine.download(target, progress, cancel).await
    }
}
