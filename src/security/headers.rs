//! Header classification for forwarding and display.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers from requests before they leave the proxy
//! - Select the allow-listed headers that appear in traffic records
//!
//! # Design Decisions
//! - Both lists are fixed and matched case-insensitively
//! - The display allow-list never influences what is sent on the wire
//! - Responses are copied back verbatim; only the request direction is sanitized

use axum::http::HeaderMap;

/// Headers scoped to the client-to-proxy link.
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "Connection",
    "Keep-Alive",
    "Proxy-Authenticate",
    "Proxy-Authorization",
    "TE",
    "Trailers",
    "Transfer-Encoding",
    "Upgrade",
];

/// Headers shown in traffic records, in display order.
pub const DISPLAY_HEADERS: [&str; 7] = [
    "Authorization",
    "Content-Type",
    "Content-Length",
    "User-Agent",
    "Accept",
    "Cookie",
    "Set-Cookie",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

/// Copy every header that is not hop-by-hop, keeping all values in order.
pub fn sanitize_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name.as_str()) {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}

/// Allow-listed headers as display pairs; multiple values are joined with ", ".
pub fn display_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    DISPLAY_HEADERS
        .iter()
        .filter_map(|name| {
            let values: Vec<_> = headers
                .get_all(*name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect();
            (!values.is_empty()).then(|| (name.to_string(), values.join(", ")))
        })
        .collect()
}
