//! Segment fetching: one range request streamed into a private scratch file.
//!
//! The response body is drained through a bounded channel. The producer half
//! reads network chunks, counts them and reports progress; the consumer half
//! appends each chunk to the segment's scratch file. When the channel is full
//! the producer stops reading from the network until the disk catches up.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::StatusCode;
use tempfile::TempPath;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use super::DownloadError;
use super::constants::{RELAY_CAPACITY, SCRATCH_PREFIX};
use super::plan::SegmentRange;
use super::progress::percent_of;
use super::retry::{RetryPolicy, retry_on_transient};
use super::transport::{RequestTarget, Transport, TransportResponse};

/// Everything a segment fetch needs that is shared by all segments of one
/// resource.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FetchContext<'a> {
    pub transport: &'a Transport,
    pub target: &'a RequestTarget,
    pub resource_size: u64,
    pub scratch_dir: &'a Path,
    pub retry: RetryPolicy,
}

/// A segment whose bytes sit in its scratch file, ready for reassembly.
#[derive(Debug)]
pub struct StagedSegment {
    /// Planned range.
    pub range: SegmentRange,
    /// Bytes written to the scratch file.
    pub bytes_read: u64,
    /// Scratch file; deleted when dropped.
    pub temp_path: TempPath,
}

/// An in-flight segment: the range response plus the scratch file it drains into.
#[derive(Debug)]
pub struct Segment {
    range: SegmentRange,
    bytes_read: u64,
    temp_path: TempPath,
    body: TransportResponse,
}

impl Segment {
    /// Pairs a range response with a fresh scratch file under `scratch_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] when the scratch file cannot be created.
    pub fn open(
        range: SegmentRange,
        body: TransportResponse,
        scratch_dir: &Path,
    ) -> Result<Self, DownloadError> {
        let temp_path = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .suffix(&format!(".part{}", range.id))
            .tempfile_in(scratch_dir)
            .map_err(|e| DownloadError::io(scratch_dir, e))?
            .into_temp_path();

        trace!(segment = range.id, path = %temp_path.display(), "scratch file created");

        Ok(Self {
            range,
            bytes_read: 0,
            temp_path,
            body,
        })
    }

    /// Planned range.
    #[must_use]
    pub fn range(&self) -> SegmentRange {
        self.range
    }

    /// Scratch file path.
    #[must_use]
    pub fn temp_storage_path(&self) -> &Path {
        &self.temp_path
    }

    /// Streams the body into the scratch file.
    ///
    /// `on_progress` receives this segment's completion percentage after every
    /// chunk.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::Network`] / [`DownloadError::Timeout`] when the body
    ///   stream fails
    /// - [`DownloadError::Io`] when the scratch file cannot be written
    /// - [`DownloadError::Integrity`] when fewer or more bytes arrive than the
    ///   response declared
    /// - [`DownloadError::Cancelled`] when `cancel` fires mid-stream
    pub async fn relay<F>(
        mut self,
        url: &str,
        resource_size: u64,
        on_progress: F,
        cancel: &CancellationToken,
    ) -> Result<StagedSegment, DownloadError>
    where
        F: Fn(f64) + Send + Sync,
    {
        let (response, _permit) = self.body.into_parts();
        let declared_len = response.content_length();
        let segment_len = declared_len.unwrap_or_else(|| self.range.expected_len(resource_size));

        let path = self.temp_path.to_path_buf();
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|e| DownloadError::io(&path, e))?;
        file.seek(std::io::SeekFrom::End(0))
            .await
            .map_err(|e| DownloadError::io(&path, e))?;

        let (read, written) = pump(
            response.bytes_stream(),
            &mut file,
            &path,
            url,
            |bytes_read| on_progress(percent_of(bytes_read, segment_len)),
            cancel,
        )
        .await?;
        self.bytes_read = written;

        if let Some(expected) = declared_len
            && (expected != read || read != written)
        {
            return Err(DownloadError::integrity(path, expected, written));
        }

        debug!(
            segment = self.range.id,
            start = self.range.start,
            end = self.range.end,
            bytes = self.bytes_read,
            "segment staged"
        );

        Ok(StagedSegment {
            range: self.range,
            bytes_read: self.bytes_read,
            temp_path: self.temp_path,
        })
    }
}

/// Drains `stream` into `sink` through a bounded channel of
/// [`RELAY_CAPACITY`] chunks and returns `(bytes read, bytes written)`.
///
/// The producer stops pulling from `stream` while the channel is full. Either
/// half failing ends the other: a dropped receiver stops the producer, a
/// dropped sender lets the consumer drain and flush.
async fn pump<S, W, F>(
    stream: S,
    sink: &mut W,
    sink_path: &Path,
    url: &str,
    on_read: F,
    cancel: &CancellationToken,
) -> Result<(u64, u64), DownloadError>
where
    S: Stream<Item = reqwest::Result<Bytes>>,
    W: AsyncWrite + Unpin,
    F: Fn(u64),
{
    let (tx, mut rx) = mpsc::channel::<Bytes>(RELAY_CAPACITY);

    let producer = async move {
        let mut stream = std::pin::pin!(stream);
        let mut bytes_read = 0_u64;
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

            bytes_read += chunk.len() as u64;
            on_read(bytes_read);

            // A closed channel means the consumer already failed; its error
            // wins the join below.
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
        Ok::<u64, DownloadError>(bytes_read)
    };

    let consumer = async {
        let mut written = 0_u64;
        while let Some(chunk) = rx.recv().await {
            sink.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io(sink_path, e))?;
            written += chunk.len() as u64;
        }
        sink.flush()
            .await
            .map_err(|e| DownloadError::io(sink_path, e))?;
        Ok::<u64, DownloadError>(written)
    };

    tokio::try_join!(producer, consumer)
}

/// Requests one planned range and stages it, retrying transient failures.
///
/// Each attempt starts over with a fresh scratch file; the previous attempt's
/// file is deleted when it is dropped.
#[instrument(level = "debug", skip(ctx, on_progress, cancel), fields(url = %ctx.target, segment = range.id))]
pub(crate) async fn fetch_segment<F>(
    ctx: FetchContext<'_>,
    range: SegmentRange,
    on_progress: F,
    cancel: &CancellationToken,
) -> Result<StagedSegment, DownloadError>
where
    F: Fn(f64) + Send + Sync,
{
    let url = ctx.target.url().as_str();
    let on_progress = &on_progress;

    ctx.retry
        .run(url, cancel, retry_on_transient, || async move {
            on_progress(0.0);
            let response = ctx
                .transport
                .get_range(ctx.target, range.start, range.end, cancel)
                .await?;
            check_range_honored(&response, range, ctx.resource_size, url)?;
            let segment = Segment::open(range, response, ctx.scratch_dir)?;
            segment
                .relay(url, ctx.resource_size, on_progress, cancel)
                .await
        })
        .await
}

/// A `200` to a range request carries the whole body, which is only
/// acceptable when the range asked for the whole body anyway.
fn check_range_honored(
    response: &TransportResponse,
    range: SegmentRange,
    resource_size: u64,
    url: &str,
) -> Result<(), DownloadError> {
    let status = response.status();
    let whole_resource = range.start == 0 && range.expected_len(resource_size) == resource_size;
    if status == StatusCode::PARTIAL_CONTENT || whole_resource {
        return Ok(());
    }
    Err(DownloadError::RangeNotHonored {
        url: url.to_string(),
        start: range.start,
        end: range.end,
        status: status.as_u16(),
    })
}

/// Directory for scratch files: the configured one, else the system temp dir.
pub(crate) fn scratch_dir_or_default(configured: Option<&Path>) -> PathBuf {
    configured.map_or_else(std::env::temp_dir, Path::to_path_buf)
}
