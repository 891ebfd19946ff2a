//! Error types for the download module.
//!
//! [`DownloadError`] covers everything that can go wrong while transferring a
//! single resource. [`EngineError`] covers construction-time validation of the
//! transport and engine options.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while transferring a resource.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request exceeded its timeout without anyone asking for cancellation.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The caller cancelled the transfer.
    #[error("download of {url} was cancelled")]
    Cancelled {
        /// The URL whose transfer was cancelled.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Authentication or authorization required to access the resource.
    #[error("authentication required for {domain} (HTTP {status}) downloading {url}")]
    AuthRequired {
        /// The URL that requires authentication.
        url: String,
        /// The HTTP status code (401, 403 or 407).
        status: u16,
        /// The domain requiring authentication.
        domain: String,
    },

    /// The provided URI could not be parsed.
    #[error("invalid URI '{url}': {reason}")]
    InvalidUrl {
        /// The invalid URI string.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// The URI scheme is not handled by the component it was given to.
    #[error("unsupported scheme '{scheme}' for {url}")]
    UnsupportedScheme {
        /// The offending URI.
        url: String,
        /// Its scheme.
        scheme: String,
    },

    /// The probe resolved a directory-like name instead of a document.
    #[error("{url} is not a file")]
    NotAFile {
        /// The probed URI.
        url: String,
    },

    /// The server sent a `Content-Range` header whose total could not be read.
    #[error("malformed Content-Range '{value}' from {url}")]
    MalformedContentRange {
        /// The probed URI.
        url: String,
        /// Raw header value.
        value: String,
    },

    /// The server answered a non-initial range request with the whole body.
    #[error("server ignored range {start}-{end} for {url} (HTTP {status})")]
    RangeNotHonored {
        /// The URI being fetched.
        url: String,
        /// Requested first byte.
        start: u64,
        /// Requested last byte (inclusive).
        end: u64,
        /// Status the server answered with.
        status: u16,
    },

    /// Retry budget consumed without a successful attempt.
    #[error("gave up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// The URI being fetched.
        url: String,
        /// Total attempts made, including the initial one.
        attempts: u32,
        /// The failure of the final attempt.
        #[source]
        last: Box<DownloadError>,
    },

    /// File system error while staging a segment or writing a file.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// File system error while copying staged segments into the destination.
    #[error("reassembly of {path} failed: {source}")]
    Reassembly {
        /// Destination file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A segment delivered a different number of bytes than the server declared.
    #[error(
        "integrity check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Integrity {
        /// Scratch file that failed verification.
        path: PathBuf,
        /// Expected size in bytes.
        expected_bytes: u64,
        /// Actual size in bytes.
        actual_bytes: u64,
    },

    /// FTP protocol or connection failure reported by the FTP client.
    #[error("FTP error downloading {url}: {source}")]
    Ftp {
        /// The FTP URI.
        url: String,
        /// The underlying client error.
        #[source]
        source: suppaftp::FtpError,
    },

    /// The FTP server does not know the requested path.
    #[error("{url}: file does not exist")]
    FtpFileMissing {
        /// The FTP URI.
        url: String,
    },

    /// A transfer task panicked or was aborted.
    #[error("transfer task for {url} failed: {message}")]
    TaskFailed {
        /// The URI the task was handling.
        url: String,
        /// Join error message.
        message: String,
    },
}

/// Coarse failure classification used in log lines and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Probe or segment request failed for a non-timeout reason.
    RequestFailed,
    /// Request exceeded its timeout.
    Timeout,
    /// Retry budget consumed.
    RetriesExhausted,
    /// Resolved name is not a document.
    NotAFile,
    /// Disk error while reassembling.
    ReassemblyIo,
    /// Disk error while staging.
    StagingIo,
    /// URI could not be parsed or has the wrong scheme.
    InvalidUri,
    /// Caller-initiated cancellation.
    Cancelled,
    /// FTP collaborator failure.
    Ftp,
    /// Task panicked.
    Internal,
}

impl FailureKind {
    /// Stable label for log output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestFailed => "request_failed",
            Self::Timeout => "timeout",
            Self::RetriesExhausted => "retries_exhausted",
            Self::NotAFile => "not_a_file",
            Self::ReassemblyIo => "reassembly_io",
            Self::StagingIo => "staging_io",
            Self::InvalidUri => "invalid_uri",
            Self::Cancelled => "cancelled",
            Self::Ftp => "ftp",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a reassembly IO error.
    pub fn reassembly(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Reassembly {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URI error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an integrity mismatch error.
    pub fn integrity(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates an authentication-required error.
    pub fn auth_required(url: impl Into<String>, status: u16, domain: impl Into<String>) -> Self {
        Self::AuthRequired {
            url: url.into(),
            status,
            domain: domain.into(),
        }
    }

    /// Creates an FTP client error.
    pub fn ftp(url: impl Into<String>, source: suppaftp::FtpError) -> Self {
        Self::Ftp {
            url: url.into(),
            source,
        }
    }

    /// Returns true for failures caused by a request timing out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Ftp { source, .. } => is_ftp_timeout(source),
            _ => false,
        }
    }

    /// Maps the error onto the failure taxonomy used in log output.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Network { .. }
            | Self::HttpStatus { .. }
            | Self::AuthRequired { .. }
            | Self::MalformedContentRange { .. }
            | Self::RangeNotHonored { .. }
            | Self::Integrity { .. } => FailureKind::RequestFailed,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Cancelled { .. } => FailureKind::Cancelled,
            Self::InvalidUrl { .. } | Self::UnsupportedScheme { .. } => FailureKind::InvalidUri,
            Self::NotAFile { .. } => FailureKind::NotAFile,
            Self::RetriesExhausted { .. } => FailureKind::RetriesExhausted,
            Self::Io { .. } => FailureKind::StagingIo,
            Self::Reassembly { .. } => FailureKind::ReassemblyIo,
            Self::Ftp { .. } | Self::FtpFileMissing { .. } => FailureKind::Ftp,
            Self::TaskFailed { .. } => FailureKind::Internal,
        }
    }
}

fn is_ftp_timeout(error: &suppaftp::FtpError) -> bool {
    matches!(
        error,
        suppaftp::FtpError::ConnectionError(io)
            if matches!(io.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock)
    )
}

// Note on From trait implementations:
// We intentionally do NOT implement `From<reqwest::Error>` or `From<std::io::Error>`
// because our error variants require context (url, path) that the source errors
// don't provide. The helper constructors are used instead.

/// Errors raised while validating transport and engine options.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Connection limit outside the accepted range.
    #[error("invalid connection limit {value}: must be at least 1")]
    InvalidConnectionLimit {
        /// The rejected value.
        value: usize,
    },

    /// Segment count outside the accepted range.
    #[error("invalid segment count {value}: must be at least 1")]
    InvalidSegmentCount {
        /// The rejected value.
        value: usize,
    },

    /// Timeout of zero length.
    #[error("request timeout must be greater than zero")]
    ZeroTimeout,

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),
}
