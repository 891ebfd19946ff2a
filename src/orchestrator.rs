//! Transfer orchestrator: runs every registered dispatcher over one batch.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::dispatch::{
    BatchReport, FtpDownloader, FtpOptions, HttpDownloader, ProtocolDownloader, TransferObserver,
};
use crate::download::{
    DownloadError, EngineError, EngineOptions, HttpEngine, RequestTarget, Transport, TransportConfig,
};

/// Everything needed to build an orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Shared transport settings.
    pub transport: TransportConfig,
    /// HTTP engine settings.
    pub engine: EngineOptions,
}

impl OrchestratorConfig {
    fn ftp_options(&self) -> FtpOptions {
        FtpOptions {
            download_dir: self.engine.download_dir.clone(),
            timeout: self.transport.timeout,
            retry: self.engine.retry,
        }
    }
}

/// Result of one orchestrated run.
#[derive(Debug, Default)]
pub struct TransferSummary {
    /// Per-dispatcher reports, in dispatch order.
    pub reports: Vec<(&'static str, BatchReport)>,
    /// Dispatchers whose batch call failed.
    pub dispatcher_errors: Vec<(&'static str, DownloadError)>,
    /// The batch contained no URIs.
    pub empty_batch: bool,
}

impl TransferSummary {
    /// True iff the batch was non-empty and no dispatcher failed.
    ///
    /// Individual URIs that failed inside a dispatcher do not count against
    /// this; see [`TransferSummary::failed_transfers`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.empty_batch && self.dispatcher_errors.is_empty()
    }

    /// Number of URIs that were attempted but did not finish.
    #[must_use]
    pub fn failed_transfers(&self) -> usize {
        self.reports.iter().map(|(_, r)| r.failed.len()).sum()
    }

    /// Number of URIs that were written to disk.
    #[must_use]
    pub fn completed_transfers(&self) -> usize {
        self.reports.iter().map(|(_, r)| r.completed.len()).sum()
    }
}

/// Owns the shared transport and the registered dispatchers.
#[derive(Debug, Clone)]
pub struct TransferOrchestrator {
    transport: Transport,
    dispatchers: Vec<ProtocolDownloader>,
}

impl TransferOrchestrator {
    /// Builds the transport and registers the FTP and HTTP dispatchers.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the transport or engine options are invalid.
    #[instrument(level = "debug")]
    pub fn new(config: &OrchestratorConfig) -> Result<Self, EngineError> {
        let transport = Transport::new(config.transport)?;
        let engine = HttpEngine::new(transport.clone(), config.engine.clone())?;

        let dispatchers = vec![
            ProtocolDownloader::Ftp(FtpDownloader::new(config.ftp_options())),
            ProtocolDownloader::Http(HttpDownloader::new(engine)),
        ];

        Ok(Self {
            transport,
            dispatchers,
        })
    }

    /// Registered dispatchers, in run order.
    #[must_use]
    pub fn dispatchers(&self) -> &[ProtocolDownloader] {
        &self.dispatchers
    }

    /// The shared transport.
    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Runs every dispatcher over `uris`, one dispatcher at a time.
    ///
    /// A dispatcher that fails is logged and counted; the remaining
    /// dispatchers still run.
    #[instrument(skip(self, uris, observer, cancel), fields(batch = uris.len()))]
    pub async fn fetch_all(
        &self,
        uris: &[String],
        observer: Arc<dyn TransferObserver>,
        cancel: &CancellationToken,
    ) -> TransferSummary {
        if uris.is_empty() {
            warn!("no URIs to download");
            return TransferSummary {
                empty_batch: true,
                ..TransferSummary::default()
            };
        }

        self.warn_unhandled(uris);

        let mut summary = TransferSummary::default();
        for dispatcher in &self.dispatchers {
            let name = dispatcher.name();
            debug!(protocol = name, "running dispatcher");
            match dispatcher
                .fetch_batch(uris, Arc::clone(&observer), cancel)
                .await
            {
                Ok(report) => summary.reports.push((name, report)),
                Err(e) => {
                    warn!(protocol = name, kind = %e.failure_kind(), error = %e, "dispatcher failed");
                    summary.dispatcher_errors.push((name, e));
                }
            }
        }

        info!(
            completed = summary.completed_transfers(),
            failed = summary.failed_transfers(),
            dispatcher_errors = summary.dispatcher_errors.len(),
            "batch finished"
        );
        summary
    }

    fn warn_unhandled(&self, uris: &[String]) {
        for uri in uris {
            if let Ok(target) = RequestTarget::parse(uri)
                && !self.dispatchers.iter().any(|d| d.handles(target.scheme()))
            {
                warn!(url = %target, scheme = target.scheme(), "no downloader handles this scheme");
            }
        }
    }
}
