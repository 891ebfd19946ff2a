//! Wiremock responder that serves a fixed body honoring `Range: bytes=a-b`.

use std::sync::Arc;

use wiremock::{Request, Respond, ResponseTemplate};

/// Deterministic, non-repeating-looking test payload.
#[must_use]
pub fn payload(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 7) ^ (i >> 15)) as u8)
        .collect()
}

/// How the fake server treats range requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeMode {
    /// Answers ranges with 206 and advertises `Accept-Ranges: bytes`.
    Supported,
    /// Answers ranges with 206 but advertises `Accept-Ranges: none`.
    NotAdvertised,
    /// Ignores `Range` and always sends the whole body with 200.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct RangeResponder {
    body: Arc<Vec<u8>>,
    mode: RangeMode,
    content_disposition: Option<String>,
}

impl RangeResponder {
    #[must_use]
    pub fn new(body: Vec<u8>, mode: RangeMode) -> Self {
        Self {
            body: Arc::new(body),
            mode,
            content_disposition: None,
        }
    }

    #[must_use]
    pub fn with_content_disposition(mut self, value: &str) -> Self {
        self.content_disposition = Some(value.to_string());
        self
    }

    fn template(&self, status: u16) -> ResponseTemplate {
        let mut template = ResponseTemplate::new(status);
        if let Some(value) = &self.content_disposition {
            template = template.insert_header("Content-Disposition", value.as_str());
        }
        match self.mode {
            RangeMode::Supported => template.insert_header("Accept-Ranges", "bytes"),
            RangeMode::NotAdvertised => template.insert_header("Accept-Ranges", "none"),
            RangeMode::Ignored => template,
        }
    }
}

/// Parses `bytes=a-b` into `(a, b)`.
#[must_use]
pub fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let total = self.body.len() as u64;
        let requested = request
            .headers
            .get("range")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_range);

        let Some((start, end)) = requested.filter(|_| self.mode != RangeMode::Ignored) else {
            return self.template(200).set_body_bytes(self.body.as_slice());
        };

        if start >= total {
            return ResponseTemplate::new(416)
                .insert_header("Content-Range", format!("bytes */{total}").as_str());
        }

        let last = end.min(total - 1);
        let slice = &self.body[start as usize..=last as usize];
        self.template(206)
            .insert_header(
                "Content-Range",
                format!("bytes {start}-{last}/{total}").as_str(),
            )
            .set_body_bytes(slice)
    }
}
