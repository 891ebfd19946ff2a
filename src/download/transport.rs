//! Range-capable HTTP transport shared by every probe and segment request.
//!
//! The [`Transport`] owns one reqwest [`Client`] (connection pool, automatic
//! gzip/deflate decompression) plus a semaphore that caps the number of
//! in-flight connections for the whole process. It is built once by the
//! orchestrator and handed to every transfer.
//!
//! Each request carries its own timeout. A request that runs out of time while
//! nobody asked for cancellation fails with [`DownloadError::Timeout`]; a
//! request interrupted by the caller's [`CancellationToken`] fails with
//! [`DownloadError::Cancelled`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, RANGE};
use reqwest::{Client, StatusCode};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};
use url::Url;

use super::constants::{DEFAULT_CONNECTION_LIMIT, DEFAULT_TIMEOUT};
use super::error::{DownloadError, EngineError};
use crate::user_agent;

/// Transport settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Maximum number of concurrent connections across all transfers.
    pub connection_limit: usize,
    /// Timeout applied to every request (and to each body read).
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connection_limit: DEFAULT_CONNECTION_LIMIT,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Basic-auth credentials taken from a URI's userinfo.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Percent-decoded user name.
    pub username: String,
    /// Percent-decoded password.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A parsed request URI with any embedded credentials split off.
///
/// The URL kept here never contains userinfo, so it is safe to log and to put
/// into error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    url: Url,
    credentials: Option<Credentials>,
}

impl RequestTarget {
    /// Parses `uri`, extracting `user:password` userinfo when both parts exist.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] when the string is not an absolute URI.
    pub fn parse(uri: &str) -> Result<Self, DownloadError> {
        let url = Url::parse(uri).map_err(|e| DownloadError::invalid_url(uri, e.to_string()))?;
        Ok(Self::from_url(url))
    }

    /// Splits credentials off an already parsed URL.
    #[must_use]
    pub fn from_url(mut url: Url) -> Self {
        let credentials = match (url.username(), url.password()) {
            (user, Some(password)) if !user.is_empty() => Some(Credentials {
                username: decode_userinfo(user),
                password: decode_userinfo(password),
            }),
            _ => None,
        };
        if !url.username().is_empty() || url.password().is_some() {
            // Only fails for cannot-be-a-base URLs, which never carry userinfo.
            let _ = url.set_username("");
            let _ = url.set_password(None);
        }
        Self { url, credentials }
    }

    /// URL without credentials.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Credentials parsed from the URI, if any.
    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Lower-case URI scheme.
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }
}

impl fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

fn decode_userinfo(raw: &str) -> String {
    urlencoding::decode(raw).map_or_else(|_| raw.to_string(), std::borrow::Cow::into_owned)
}

/// A successful response that keeps its connection permit until dropped.
#[derive(Debug)]
pub struct TransportResponse {
    response: reqwest::Response,
    permit: OwnedSemaphorePermit,
}

impl TransportResponse {
    /// HTTP status of the response.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    /// Final URL after redirects.
    #[must_use]
    pub fn url(&self) -> &Url {
        self.response.url()
    }

    /// Body length declared by the server, if any.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    /// Splits the response from its permit so the body can be streamed while
    /// the permit stays alive in the caller's scope.
    #[must_use]
    pub fn into_parts(self) -> (reqwest::Response, OwnedSemaphorePermit) {
        (self.response, self.permit)
    }
}

/// Shared HTTP transport with a process-wide connection cap.
///
/// Cloning is cheap and clones share the pool and the connection cap.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    permits: Arc<Semaphore>,
    config: TransportConfig,
}

impl Transport {
    /// Builds the transport.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the connection limit or timeout is zero, or
    /// when the HTTP client cannot be built.
    #[instrument(level = "debug")]
    pub fn new(config: TransportConfig) -> Result<Self, EngineError> {
        if config.connection_limit == 0 {
            return Err(EngineError::InvalidConnectionLimit {
                value: config.connection_limit,
            });
        }
        if config.timeout.is_zero() {
            return Err(EngineError::ZeroTimeout);
        }

        let client = Client::builder()
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            .gzip(true)
            .deflate(true)
            .pool_max_idle_per_host(config.connection_limit)
            .user_agent(user_agent::default_download_user_agent())
            .build()?;

        debug!(
            connection_limit = config.connection_limit,
            timeout_ms = config.timeout.as_millis(),
            "creating transport"
        );

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(config.connection_limit)),
            config,
        })
    }

    /// Configured settings.
    #[must_use]
    pub fn config(&self) -> TransportConfig {
        self.config
    }

    /// Connection permits currently free.
    #[must_use]
    pub fn available_connections(&self) -> usize {
        self.permits.available_permits()
    }

    /// Issues `GET` with `Range: bytes=start-end` (inclusive end).
    ///
    /// Attaches HTTP Basic authentication when the target carries credentials.
    /// Waits for a connection permit first; the permit travels with the
    /// returned response.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::Cancelled`] when `cancel` fires first
    /// - [`DownloadError::Timeout`] when the request exceeds its timeout
    /// - [`DownloadError::Network`] for connection-level failures
    /// - [`DownloadError::AuthRequired`] for 401/403/407
    /// - [`DownloadError::HttpStatus`] for any other non-success status
    #[instrument(level = "debug", skip(self, target, cancel), fields(url = %target))]
    pub async fn get_range(
        &self,
        target: &RequestTarget,
        start: u64,
        end: u64,
        cancel: &CancellationToken,
    ) -> Result<TransportResponse, DownloadError> {
        let url = target.url().as_str();

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DownloadError::cancelled(url)),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| DownloadError::cancelled(url))?
            }
        };

        let mut request = self
            .client
            .get(target.url().clone())
            .header(RANGE, format!("bytes={start}-{end}"));
        if let Some(credentials) = target.credentials() {
            trace!(username = %credentials.username, "attaching basic authentication");
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let send = tokio::time::timeout(self.config.timeout, request.send());
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DownloadError::cancelled(url)),
            result = send => match result {
                Err(_elapsed) => return Err(DownloadError::timeout(url)),
                Ok(Err(e)) if e.is_timeout() => return Err(DownloadError::timeout(url)),
                Ok(Err(e)) => return Err(DownloadError::network(url, e)),
                Ok(Ok(response)) => response,
            }
        };

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            if matches!(status_code, 401 | 403 | 407) {
                let domain = target.url().host_str().unwrap_or(url).to_string();
                return Err(DownloadError::auth_required(url, status_code, domain));
            }
            return Err(DownloadError::http_status(url, status_code));
        }

        debug!(status = status.as_u16(), start, end, "range response received");
        Ok(TransportResponse { response, permit })
    }
}
