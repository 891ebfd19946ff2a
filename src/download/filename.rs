//! Resource name resolution from `Content-Disposition` headers and URL paths.

use std::path::{Component, Path};

use tracing::debug;
use url::Url;

/// Parses a raw `Content-Disposition` header value and extracts the filename.
///
/// Lenient about what servers actually send: trailing `;` is ignored and
/// quotes are stripped. Handles:
/// - `attachment; filename="example.zip"`
/// - `attachment; filename=example.zip;`
/// - `attachment; filename*=UTF-8''example%20file.zip` (RFC 5987, preferred)
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    let header = header.trim().trim_end_matches(';');

    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            let encoded_name = encoded[..end].trim().replace('"', "");
            if let Ok(decoded) = urlencoding::decode(&encoded_name)
                && !decoded.is_empty()
            {
                return Some(decoded.into_owned());
            }
        }
    }

    // Skip over a `filename*=` match so `filename=` finds the plain parameter.
    let mut search_from = 0;
    while let Some(rel) = header[search_from..].find("filename") {
        let pos = search_from + rel;
        let rest = &header[pos + 8..];
        if let Some(value) = rest.strip_prefix('=') {
            let end = value.find(';').unwrap_or(value.len());
            let filename = value[..end].trim().replace('"', "");
            let filename = filename.trim();
            if !filename.is_empty() {
                return Some(filename.to_string());
            }
            return None;
        }
        search_from = pos + 8;
    }

    None
}

/// Final path segment of `url`, percent-decoded.
///
/// Returns `None` when the path is the root or ends with `/`: such a URI names
/// a directory, not a document.
pub(crate) fn name_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last).unwrap_or_else(|e| {
        debug!(segment = %last, error = %e, "URL decoding failed, using raw segment");
        last.into()
    });
    Some(decoded.into_owned())
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}
