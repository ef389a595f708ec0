//! Display rendering of captured bodies.
//!
//! Everything here produces text for traffic records only. Nothing in this
//! module may touch the bytes that are forwarded on the wire, and nothing here
//! returns an error: a body that cannot be decoded is shown as it was captured.

use std::borrow::Cow;
use std::io::Read;

use axum::http::{header::CONTENT_ENCODING, HeaderMap};
use flate2::read::GzDecoder;

/// Share of non-printable bytes above which a body counts as binary.
const BINARY_THRESHOLD: f64 = 0.2;

/// Decompress a gzip-encoded body for display.
///
/// At most `limit` decompressed bytes are produced. Any failure, including
/// output larger than `limit`, falls back to the captured bytes.
pub fn decompress_for_display<'a>(body: &'a [u8], headers: &HeaderMap, limit: u64) -> Cow<'a, [u8]> {
    let gzip = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"));
    if !gzip {
        return Cow::Borrowed(body);
    }

    let mut decoded = Vec::new();
    let mut reader = GzDecoder::new(body).take(limit.saturating_add(1));
    match reader.read_to_end(&mut decoded) {
        Ok(n) if (n as u64) <= limit => Cow::Owned(decoded),
        Ok(_) => {
            tracing::debug!(limit, "Decompressed body exceeds display limit, showing raw bytes");
            Cow::Borrowed(body)
        }
        Err(e) => {
            tracing::debug!(error = %e, "Failed to decompress gzip content");
            Cow::Borrowed(body)
        }
    }
}

/// True when more than 20% of the bytes are NUL, control characters other
/// than tab/newline/carriage return, or above printable ASCII.
pub fn is_binary(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }
    let non_printable = data
        .iter()
        .filter(|&&b| b == 0 || (b < 32 && !matches!(b, b'\t' | b'\n' | b'\r')) || b > 126)
        .count();
    non_printable as f64 / data.len() as f64 > BINARY_THRESHOLD
}

fn looks_like_json(s: &str) -> bool {
    let s = s.trim();
    (s.starts_with('{') && s.ends_with('}')) || (s.starts_with('[') && s.ends_with(']'))
}

fn pretty_json(s: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(s).ok()?;
    serde_json::to_string_pretty(&value).ok()
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}

/// Render a body for a traffic record, or `None` when it is empty.
pub fn render_body(data: &[u8], max_chars: usize) -> Option<String> {
    if data.is_empty() {
        return None;
    }
    if is_binary(data) {
        return Some(format!("[Binary/Compressed content, {} bytes]", data.len()));
    }

    let text = String::from_utf8_lossy(data);
    let shown = if looks_like_json(&text) {
        pretty_json(&text).unwrap_or_else(|| text.into_owned())
    } else {
        text.into_owned()
    };
    Some(truncate_chars(&shown, max_chars))
}
