//! FTP dispatcher.
//!
//! Connection handling, authentication and the data channel are delegated to
//! `suppaftp`. Its client is synchronous, so every attempt runs on the
//! blocking pool and is wrapped in the same linear backoff policy the HTTP
//! path uses: attempts that time out are retried, anything else is final.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Status};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::download::{
    Credentials, DownloadError, ProgressFn, RequestTarget, RetryPolicy, TransferOutcome,
    name_from_url, percent_of, retry_on_timeout, sanitize_filename,
};

const FTP_DEFAULT_PORT: u16 = 21;
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// FTP transfer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpOptions {
    /// Directory files are saved to.
    pub download_dir: PathBuf,
    /// Connect and read timeout.
    pub timeout: Duration,
    /// Retry policy for timed-out attempts.
    pub retry: RetryPolicy,
}

/// Transfers `ftp` URIs.
#[derive(Debug, Clone)]
pub struct FtpDownloader {
    options: FtpOptions,
}

/// Everything one blocking attempt needs, owned so it can cross threads.
#[derive(Debug, Clone)]
struct FtpJob {
    url: String,
    host: String,
    port: u16,
    remote_path: String,
    credentials: Option<Credentials>,
    destination: PathBuf,
    timeout: Duration,
}

impl FtpDownloader {
    /// Creates a downloader.
    #[must_use]
    pub fn new(options: FtpOptions) -> Self {
        Self { options }
    }

    /// Configured options.
    #[must_use]
    pub fn options(&self) -> &FtpOptions {
        &self.options
    }

    /// Downloads one file, saving it under its last path segment.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::FtpFileMissing`] when the server does not know the path
    /// - [`DownloadError::NotAFile`] when the URI names a directory
    /// - [`DownloadError::RetriesExhausted`] when every attempt timed out
    /// - [`DownloadError::Ftp`] / [`DownloadError::Io`] for other failures
    #[instrument(skip(self, target, progress, cancel), fields(url = %target))]
    pub async fn download(
        &self,
        target: &RequestTarget,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, DownloadError> {
        let job = self.plan_job(target)?;
        if let Some(credentials) = &job.credentials {
            info!(url = %job.url, username = %credentials.username, "authenticating");
        }

        let bytes = self
            .options
            .retry
            .run(&job.url, cancel, retry_on_timeout, || {
                let job = job.clone();
                let progress = progress.clone();
                let cancel = cancel.clone();
                async move {
                    let url = job.url.clone();
                    tokio::task::spawn_blocking(move || retrieve(&job, &progress, &cancel))
                        .await
                        .map_err(|e| DownloadError::TaskFailed {
                            url,
                            message: e.to_string(),
                        })?
                }
            })
            .await?;

        info!(url = %job.url, path = %job.destination.display(), bytes, "download completed");
        Ok(TransferOutcome {
            path: job.destination,
            bytes,
            segments: 1,
        })
    }

    fn plan_job(&self, target: &RequestTarget) -> Result<FtpJob, DownloadError> {
        let url = target.url();
        if url.scheme() != "ftp" {
            return Err(DownloadError::UnsupportedScheme {
                url: url.to_string(),
                scheme: url.scheme().to_string(),
            });
        }
        let host = url
            .host_str()
            .ok_or_else(|| DownloadError::invalid_url(url.as_str(), "missing host"))?
            .to_string();
        let name = name_from_url(url).ok_or_else(|| DownloadError::NotAFile {
            url: url.to_string(),
        })?;
        let remote_path = urlencoding::decode(url.path())
            .map_or_else(|_| url.path().to_string(), std::borrow::Cow::into_owned);

        Ok(FtpJob {
            url: url.to_string(),
            host,
            port: url.port().unwrap_or(FTP_DEFAULT_PORT),
            remote_path,
            credentials: target.credentials().cloned(),
            destination: self.options.download_dir.join(sanitize_filename(&name)),
            timeout: self.options.timeout,
        })
    }
}

/// One blocking attempt: connect, log in, check the file, stream it to disk.
fn retrieve(
    job: &FtpJob,
    progress: &ProgressFn,
    cancel: &CancellationToken,
) -> Result<u64, DownloadError> {
    let url = job.url.as_str();
    let ftp_err = |e: FtpError| DownloadError::ftp(url, e);

    let addr = resolve(&job.host, job.port).map_err(ftp_err)?;
    let mut ftp = FtpStream::connect_timeout(addr, job.timeout).map_err(ftp_err)?;
    ftp.get_ref()
        .set_read_timeout(Some(job.timeout))
        .map_err(|e| ftp_err(FtpError::ConnectionError(e)))?;

    match &job.credentials {
        Some(credentials) => ftp.login(&credentials.username, &credentials.password),
        None => ftp.login("anonymous", "anonymous"),
    }
    .map_err(ftp_err)?;
    ftp.transfer_type(FileType::Binary).map_err(ftp_err)?;

    // 0 when the server cannot report a size; progress is then only
    // reported on completion.
    let size = match ftp.size(&job.remote_path) {
        Ok(size) => size as u64,
        Err(e) if is_missing_file(&e) => {
            warn!(url, "file does not exist");
            quit(&mut ftp, url);
            return Err(DownloadError::FtpFileMissing {
                url: url.to_string(),
            });
        }
        Err(FtpError::UnexpectedResponse(response)) => {
            debug!(url, status = ?response.status, "SIZE rejected, size unknown");
            0
        }
        Err(e) => return Err(ftp_err(e)),
    };
    debug!(url, size, remote_path = %job.remote_path, "remote file found");

    let mut output = create_destination(&job.destination)?;
    let mut reader = ftp.retr_as_stream(&job.remote_path).map_err(ftp_err)?;
    let mut buffer = vec![0_u8; COPY_BUFFER_SIZE];
    let mut written = 0_u64;

    loop {
        if cancel.is_cancelled() {
            return Err(DownloadError::cancelled(url));
        }
        let n = reader
            .read(&mut buffer)
            .map_err(|e| ftp_err(FtpError::ConnectionError(e)))?;
        if n == 0 {
            break;
        }
        output
            .write_all(&buffer[..n])
            .map_err(|e| DownloadError::io(&job.destination, e))?;
        written += n as u64;
        if size > 0 {
            progress(percent_of(written, size));
        }
    }

    ftp.finalize_retr_stream(reader).map_err(ftp_err)?;
    output
        .flush()
        .map_err(|e| DownloadError::io(&job.destination, e))?;
    quit(&mut ftp, url);
    if size == 0 {
        progress(100.0);
    }

    Ok(written)
}

/// `550` is the only reply that means the path is unknown; other rejections
/// (e.g. `502` for an unsupported `SIZE`) say nothing about the file.
fn is_missing_file(error: &FtpError) -> bool {
    matches!(
        error,
        FtpError::UnexpectedResponse(response) if matches!(response.status, Status::FileUnavailable)
    )
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, FtpError> {
    (host, port)
        .to_socket_addrs()
        .map_err(FtpError::ConnectionError)?
        .next()
        .ok_or_else(|| {
            FtpError::ConnectionError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no address found for {host}"),
            ))
        })
}

fn create_destination(destination: &Path) -> Result<BufWriter<File>, DownloadError> {
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| DownloadError::io(parent, e))?;
    }
    let file = File::create(destination).map_err(|e| DownloadError::io(destination, e))?;
    Ok(BufWriter::new(file))
}

fn quit(ftp: &mut FtpStream, url: &str) {
    if let Err(e) = ftp.quit() {
        debug!(url, error = %e, "FTP quit failed");
    }
}
