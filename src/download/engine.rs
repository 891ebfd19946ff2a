//! Segmented HTTP transfer engine.
//!
//! The [`HttpEngine`] moves one resource from a URI to disk in two steps:
//!
//! 1. [`HttpEngine::load`] probes the resource (retrying timeouts with linear
//!    backoff) and plans its segments.
//! 2. [`HttpEngine::fetch`] requests every planned segment concurrently,
//!    streams each into a scratch file and reassembles them in order.
//!
//! [`HttpEngine::download`] runs both steps.
//!
//! # Concurrency Model
//!
//! - Segments of one resource are polled concurrently from the caller's task
//! - Every request holds one permit of the shared [`Transport`] connection cap
//!   for as long as its body is streaming
//! - The first failing segment cancels its siblings through a child token
//!
//! # Example
//!
//! ```no_run
//! use multidownloader_core::download::{
//!     EngineOptions, HttpEngine, RequestTarget, Transport, TransportConfig, silent_progress,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Transport::new(TransportConfig::default())?;
//! let engine = HttpEngine::new(transport, EngineOptions::default())?;
//! let target = RequestTarget::parse("https://example.com/5MB.zip")?;
//! let outcome = engine
//!     .download(&target, silent_progress(), &CancellationToken::new())
//!     .await?;
//! println!("saved {} ({} bytes)", outcome.path.display(), outcome.bytes);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use futures_util::future::try_join_all;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::constants::DEFAULT_SEGMENTS_PER_FILE;
use super::error::{DownloadError, EngineError};
use super::plan::SegmentPlan;
use super::probe::{ResourceDescriptor, probe};
use super::progress::{ProgressAggregator, ProgressFn};
use super::reassemble::reassemble;
use super::retry::{RetryPolicy, retry_on_timeout};
use super::segment::{FetchContext, fetch_segment, scratch_dir_or_default};
use super::transport::{RequestTarget, Transport, TransportResponse};

/// Options for the HTTP engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Directory finished files are written to.
    pub download_dir: PathBuf,
    /// Segments per resource when the server supports ranges.
    pub segments_per_file: usize,
    /// Retry policy for probes and segment requests.
    pub retry: RetryPolicy,
    /// Directory for scratch files; the system temp dir when `None`.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("Download"),
            segments_per_file: DEFAULT_SEGMENTS_PER_FILE,
            retry: RetryPolicy::default(),
            scratch_dir: None,
        }
    }
}

/// A probed and planned resource, ready to be fetched.
#[derive(Debug)]
pub struct PreparedTransfer {
    /// The resource being transferred.
    pub target: RequestTarget,
    /// What the probe found out.
    pub descriptor: ResourceDescriptor,
    /// Segment ranges to request.
    pub plan: SegmentPlan,
    /// Where the file will be written.
    pub destination: PathBuf,
}

/// Result of a finished transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Path of the written file.
    pub path: PathBuf,
    /// Bytes written.
    pub bytes: u64,
    /// Segments actually requested (0 when the probe body was used directly).
    pub segments: usize,
}

/// Segmented HTTP transfer engine.
#[derive(Debug, Clone)]
pub struct HttpEngine {
    transport: Transport,
    options: EngineOptions,
}

impl HttpEngine {
    /// Creates an engine over a shared transport.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidSegmentCount`] when `segments_per_file`
    /// is zero.
    #[instrument(level = "debug", skip(transport))]
    pub fn new(transport: Transport, options: EngineOptions) -> Result<Self, EngineError> {
        if options.segments_per_file == 0 {
            return Err(EngineError::InvalidSegmentCount {
                value: options.segments_per_file,
            });
        }

        debug!(
            segments_per_file = options.segments_per_file,
            max_retries = options.retry.max_retries(),
            backoff_ms = options.retry.backoff_interval().as_millis(),
            "creating HTTP engine"
        );

        Ok(Self { transport, options })
    }

    /// Configured options.
    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Shared transport.
    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Probes `target` and plans its segments.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::RetriesExhausted`] when every probe attempt timed out
    /// - [`DownloadError::NotAFile`] when the URI names a directory
    /// - any non-timeout probe failure, returned on first occurrence
    #[instrument(skip(self, target, cancel), fields(url = %target))]
    pub async fn load(
        &self,
        target: &RequestTarget,
        cancel: &CancellationToken,
    ) -> Result<PreparedTransfer, DownloadError> {
        let url = target.url().as_str();
        let descriptor = self
            .options
            .retry
            .run(url, cancel, retry_on_timeout, || {
                probe(&self.transport, target, cancel)
            })
            .await?;

        let segment_count = if descriptor.range_supported {
            self.options.segments_per_file
        } else {
            if self.options.segments_per_file > 1 {
                info!(url, "segmented downloading not supported, continuing with normal download");
            }
            1
        };

        let plan = SegmentPlan::new(descriptor.size, segment_count);
        let destination = self.options.download_dir.join(&descriptor.name);

        debug!(
            name = %descriptor.name,
            size = descriptor.size,
            range_supported = descriptor.range_supported,
            segments = ?plan.bounds(),
            destination = %destination.display(),
            "transfer prepared"
        );

        Ok(PreparedTransfer {
            target: target.clone(),
            descriptor,
            plan,
            destination,
        })
    }

    /// Fetches a prepared transfer and writes the destination file.
    ///
    /// When the probe reported no size, the probe's own body is streamed
    /// straight to the destination. Otherwise every planned segment is
    /// fetched concurrently and the file is reassembled from scratch files.
    ///
    /// # Errors
    ///
    /// Any segment failure aborts the resource; siblings are cancelled and
    /// every scratch file is deleted.
    #[instrument(skip(self, prepared, progress, cancel), fields(url = %prepared.target, size = prepared.descriptor.size))]
    pub async fn fetch(
        &self,
        prepared: PreparedTransfer,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, DownloadError> {
        let PreparedTransfer {
            target,
            mut descriptor,
            plan,
            destination,
        } = prepared;
        let url = target.url().as_str();

        if descriptor.size == 0
            && let Some(body) = descriptor.initial_body.take()
        {
            let bytes = stream_to_destination(body, &destination, url, cancel).await?;
            progress(100.0);
            info!(url, path = %destination.display(), bytes, "download completed");
            return Ok(TransferOutcome {
                path: destination,
                bytes,
                segments: 0,
            });
        }

        // Give the probe's connection back before asking for more.
        descriptor.release_initial_body();

        let scratch_dir = scratch_dir_or_default(self.options.scratch_dir.as_deref());
        tokio::fs::create_dir_all(&scratch_dir)
            .await
            .map_err(|e| DownloadError::io(&scratch_dir, e))?;
        let ranges: Vec<_> = plan.fetchable().copied().collect();
        let aggregator = ProgressAggregator::new(ranges.len(), progress);
        let segment_cancel = cancel.child_token();

        let ctx = FetchContext {
            transport: &self.transport,
            target: &target,
            resource_size: descriptor.size,
            scratch_dir: &scratch_dir,
            retry: self.options.retry,
        };

        let fetches = ranges.iter().map(|range| {
            let aggregator = &aggregator;
            let id = range.id;
            fetch_segment(ctx, *range, move |pct| aggregator.update(id, pct), &segment_cancel)
        });

        let staged = match try_join_all(fetches).await {
            Ok(staged) => staged,
            Err(e) => {
                segment_cancel.cancel();
                return Err(e);
            }
        };

        let bytes = reassemble(&destination, staged).await?;
        info!(
            url,
            path = %destination.display(),
            bytes,
            segments = ranges.len(),
            "download completed"
        );

        Ok(TransferOutcome {
            path: destination,
            bytes,
            segments: ranges.len(),
        })
    }

    /// Probes, plans and fetches `target`.
    ///
    /// # Errors
    ///
    /// See [`HttpEngine::load`] and [`HttpEngine::fetch`].
    pub async fn download(
        &self,
        target: &RequestTarget,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, DownloadError> {
        let prepared = self.load(target, cancel).await?;
        self.fetch(prepared, progress, cancel).await
    }
}

/// Streams a response body directly into `destination`, returning bytes written.
async fn stream_to_destination(
    body: TransportResponse,
    destination: &Path,
    url: &str,
    cancel: &CancellationToken,
) -> Result<u64, DownloadError> {
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::io(parent, e))?;
    }

    let file = File::create(destination)
        .await
        .map_err(|e| DownloadError::io(destination, e))?;
    let mut writer = BufWriter::new(file);

    let (response, _permit) = body.into_parts();
    let mut stream = response.bytes_stream();
    let mut bytes_written = 0_u64;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DownloadError::cancelled(url)),
            next = stream.next() => next,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(destination, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(destination, e))?;

    Ok(bytes_written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::download::progress::silent_progress;
    use crate::download::transport::TransportConfig;

    fn transport() -> Transport {
        Transport::new(TransportConfig {
            connection_limit: 4,
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn options(dir: &Path) -> EngineOptions {
        EngineOptions {
            download_dir: dir.to_path_buf(),
            segments_per_file: 4,
            retry: RetryPolicy::new(1, Duration::ZERO),
            scratch_dir: Some(dir.join("scratch")),
        }
    }

    #[test]
    fn test_engine_rejects_zero_segments() {
        let result = HttpEngine::new(
            transport(),
            EngineOptions {
                segments_per_file: 0,
                ..EngineOptions::default()
            },
        );
        assert!(matches!(
            result,
            Err(EngineError::InvalidSegmentCount { value: 0 })
        ));
    }

    #[test]
    fn test_engine_default_options() {
        let options = EngineOptions::default();
        assert_eq!(options.segments_per_file, 4);
        assert_eq!(options.download_dir, PathBuf::from("Download"));
        assert!(options.scratch_dir.is_none());
    }

    #[tokio::test]
    async fn test_load_forces_single_segment_without_range_support() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plain.txt"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 0-0/100")
                    .set_body_bytes(b"x".to_vec()),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let engine = HttpEngine::new(transport(), options(dir.path())).unwrap();
        let target = RequestTarget::parse(&format!("{}/plain.txt", server.uri())).unwrap();
        let prepared = engine
            .load(&target, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(prepared.descriptor.size, 100);
        assert!(!prepared.descriptor.range_supported);
        assert_eq!(prepared.plan.bounds(), vec![(0, 100)]);
        assert_eq!(prepared.destination, dir.path().join("plain.txt"));
    }

    #[tokio::test]
    async fn test_download_without_size_uses_probe_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hello.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello world"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let engine = HttpEngine::new(transport(), options(dir.path())).unwrap();
        let target = RequestTarget::parse(&format!("{}/hello.txt", server.uri())).unwrap();
        let outcome = engine
            .download(&target, silent_progress(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.segments, 0);
        assert_eq!(outcome.bytes, 11);
        assert_eq!(std::fs::read_to_string(&outcome.path).unwrap(), "hello world");
        // Only the probe went over the wire.
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_load_root_uri_is_not_a_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let engine = HttpEngine::new(transport(), options(dir.path())).unwrap();
        let target = RequestTarget::parse(&server.uri()).unwrap();
        let result = engine.load(&target, &CancellationToken::new()).await;
        assert!(matches!(result, Err(DownloadError::NotAFile { .. })));
    }

    #[tokio::test]
    async fn test_fetch_creates_missing_scratch_dir() {
        let server = MockServer::start().await;
        let body: Vec<u8> = (0..10_000_u32).map(|i| (i % 251) as u8).collect();
        // The last planned end is one past the final byte.
        for (start, end) in [(0_usize, 2500_usize), (2501, 5000), (5001, 7500), (7501, 10_000)] {
            let last = end.min(9999);
            Mock::given(method("GET"))
                .and(path("/scratch.bin"))
                .and(header("Range", format!("bytes={start}-{end}").as_str()))
                .respond_with(
                    ResponseTemplate::new(206)
                        .insert_header("Accept-Ranges", "bytes")
                        .insert_header(
                            "Content-Range",
                            format!("bytes {start}-{last}/10000").as_str(),
                        )
                        .set_body_bytes(body[start..=last].to_vec()),
                )
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/scratch.bin"))
            .and(header("Range", "bytes=0-0"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Accept-Ranges", "bytes")
                    .insert_header("Content-Range", "bytes 0-0/10000")
                    .set_body_bytes(vec![body[0]]),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        assert!(!scratch.exists());

        let engine = HttpEngine::new(transport(), options(dir.path())).unwrap();
        let target = RequestTarget::parse(&format!("{}/scratch.bin", server.uri())).unwrap();
        let outcome = engine
            .download(&target, silent_progress(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.segments, 4);
        assert_eq!(std::fs::read(&outcome.path).unwrap(), body);
        assert!(scratch.is_dir());
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }
}
