//! Request handling and transformation.
//!
//! # Responsibilities
//! - Resolve the absolute URL a forwarded request goes to
//! - Extract the `host:port` of a CONNECT request
//! - Build the outbound request from sanitized headers and the bounded body
//!
//! # Design Decisions
//! - Absolute targets are forwarded unchanged
//! - Scheme for origin-form targets follows the listening side, not the origin
//! - Only hop-by-hop headers are removed, and Host is rewritten to the target authority

use axum::http::{header::HOST, uri::Authority, HeaderMap, HeaderValue, Method, Request, Uri};
use bytes::Bytes;
use http_body_util::Full;

use crate::proxy::error::ProxyError;
use crate::security::headers::sanitize_request_headers;

/// Resolve the absolute target of an inbound request.
///
/// Origin-form targets become `scheme://Host + path (+ "?" + query)`, where the
/// scheme is `https` only when the inbound connection itself was TLS.
pub fn resolve_target(uri: &Uri, headers: &HeaderMap, secure: bool) -> Result<Uri, ProxyError> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Ok(uri.clone());
    }

    let host = headers
        .get(HOST)
        .ok_or_else(|| ProxyError::InvalidTarget("missing Host header".into()))?
        .to_str()
        .map_err(|_| ProxyError::InvalidTarget("Host header is not valid text".into()))?;
    if host.is_empty() {
        return Err(ProxyError::InvalidTarget("empty Host header".into()));
    }

    let mut path_and_query = match uri.path() {
        "" => "/".to_string(),
        path => path.to_string(),
    };
    if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }

    Uri::builder()
        .scheme(if secure { "https" } else { "http" })
        .authority(host)
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::InvalidTarget(e.to_string()))
}

/// The `host:port` a CONNECT request asks to reach.
pub fn connect_target(uri: &Uri) -> Result<Authority, ProxyError> {
    let authority = uri
        .authority()
        .ok_or_else(|| ProxyError::InvalidTarget(format!("CONNECT target '{uri}' is not host:port")))?;
    if authority.port_u16().is_none() {
        return Err(ProxyError::InvalidTarget(format!(
            "CONNECT target '{authority}' has no port"
        )));
    }
    Ok(authority.clone())
}

/// Build the request sent to the origin.
///
/// The `Host` header always names the target's authority.
pub fn build_outbound(
    method: Method,
    target: Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Request<Full<Bytes>>, ProxyError> {
    let host = target
        .authority()
        .ok_or_else(|| ProxyError::InvalidTarget(format!("'{target}' has no host")))
        .and_then(|authority| {
            HeaderValue::from_str(authority.as_str())
                .map_err(|e| ProxyError::InvalidTarget(e.to_string()))
        })?;

    let mut request = Request::builder()
        .method(method)
        .uri(target)
        .body(Full::new(body))
        .map_err(|e| ProxyError::InvalidTarget(e.to_string()))?;
    let outbound = request.headers_mut();
    *outbound = sanitize_request_headers(headers);
    outbound.insert(HOST, host);
    Ok(request)
}
