//! Metadata probe: a `bytes=0-0` request that discovers a resource's name,
//! total size and range support before any segment is planned.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::{ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_RANGE, HeaderMap};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::error::DownloadError;
use super::filename::{name_from_url, parse_content_disposition, sanitize_filename};
use super::transport::{RequestTarget, Transport, TransportResponse};

#[allow(clippy::expect_used)]
static CONTENT_RANGE_TOTAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^bytes\s+\d+-\d+/(\d+)$").expect("Content-Range regex is valid") // Static pattern, safe to panic
});

/// What the probe learned about a resource.
#[derive(Debug)]
pub struct ResourceDescriptor {
    /// File name to save the resource under (already sanitized).
    pub name: String,
    /// Total size from `Content-Range`; 0 when the server sent none.
    pub size: u64,
    /// Whether the server advertised `Accept-Ranges: bytes`.
    pub range_supported: bool,
    /// The probe's own response, positioned at offset 0.
    ///
    /// Only consumed when `size` is 0; dropped otherwise so its connection
    /// permit goes back to the pool before segments are requested.
    pub initial_body: Option<TransportResponse>,
}

impl ResourceDescriptor {
    /// Drops the probe body, releasing its connection.
    pub fn release_initial_body(&mut self) {
        self.initial_body = None;
    }
}

/// Probes `target` once.
///
/// # Errors
///
/// - [`DownloadError::NotAFile`] when the resolved name is a directory/root
/// - [`DownloadError::MalformedContentRange`] when the total size cannot be read
/// - any transport error from [`Transport::get_range`]
#[instrument(level = "debug", skip(transport, target, cancel), fields(url = %target))]
pub async fn probe(
    transport: &Transport,
    target: &RequestTarget,
    cancel: &CancellationToken,
) -> Result<ResourceDescriptor, DownloadError> {
    if target.credentials().is_some() {
        info!(url = %target, "authenticating with basic authentication");
    }

    let response = transport.get_range(target, 0, 0, cancel).await?;
    let url = target.url().as_str();

    let name = resolve_name(response.headers(), response.url())
        .ok_or_else(|| DownloadError::NotAFile { url: url.to_string() })?;
    let size = resolve_size(response.headers(), url)?;
    let range_supported = accepts_byte_ranges(response.headers());

    debug!(
        name = %name,
        size,
        range_supported,
        status = response.status().as_u16(),
        "resource probed"
    );

    Ok(ResourceDescriptor {
        name,
        size,
        range_supported,
        initial_body: Some(response),
    })
}

fn resolve_name(headers: &HeaderMap, final_url: &url::Url) -> Option<String> {
    headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_disposition)
        .or_else(|| name_from_url(final_url))
        .map(|name| sanitize_filename(&name))
}

fn resolve_size(headers: &HeaderMap, url: &str) -> Result<u64, DownloadError> {
    let Some(raw) = headers.get(CONTENT_RANGE) else {
        return Ok(0);
    };
    let value = raw.to_str().unwrap_or_default().trim();
    parse_content_range_total(value).ok_or_else(|| DownloadError::MalformedContentRange {
        url: url.to_string(),
        value: value.to_string(),
    })
}

/// Reads the total-size component of `bytes a-b/total`.
pub(crate) fn parse_content_range_total(value: &str) -> Option<u64> {
    CONTENT_RANGE_TOTAL
        .captures(value.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn accepts_byte_ranges(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_RANGES)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"))
}
