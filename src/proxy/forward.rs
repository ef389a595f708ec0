//! Forwarding pipeline for plain HTTP requests.
//!
//! # Responsibilities
//! - Read the inbound body under the size limit and the server timeout
//! - Resolve the target, strip hop-by-hop headers, dispatch through the pool
//! - Buffer the origin response under the same size limit
//! - Hand the origin bytes back unchanged and record a display copy
//!
//! # Design Decisions
//! - One deadline covers dispatch and the response body read
//! - Dropping the cycle future (client gone) drops the outbound request with it
//! - Response headers are returned verbatim; only the request side is sanitized

use std::error::Error as StdError;
use std::fmt::Display;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{header::CONTENT_LENGTH, HeaderMap, Request, Response, Uri},
    response::IntoResponse,
};
use http_body::Body as HttpBody;
use uuid::Uuid;

use crate::http::request::{build_outbound, resolve_target};
use crate::http::response::verbatim_response;
use crate::observability::inspect::{decompress_for_display, render_body};
use crate::observability::metrics;
use crate::observability::{DeferredRecord, FailureRecord, Record, RequestRecord, ResponseRecord};
use crate::proxy::{ProxyError, ProxyState};
use crate::security::{display_headers, read_bounded};

/// Run one HTTP cycle. Failures become a plain-text error response.
pub async fn forward<B>(state: &ProxyState, request: Request<B>) -> Response<Body>
where
    B: HttpBody + Unpin,
    B::Error: Display,
{
    let start = Instant::now();
    let id = Uuid::new_v4();
    let method = request.method().clone();
    let target = resolve_target(request.uri(), request.headers(), false);
    let url = match &target {
        Ok(uri) => uri.to_string(),
        Err(_) => request.uri().to_string(),
    };

    match forward_cycle(state, request, target, &url, id, start).await {
        Ok(response) => response,
        Err(err) => {
            let status = err.status();
            tracing::warn!(
                request_id = %id,
                method = %method,
                url = %url,
                status = status.as_u16(),
                error = %err,
                "Forwarding failed"
            );
            state.sink.emit(Record::Failure(FailureRecord {
                id,
                method: method.to_string(),
                url,
                status: status.as_u16(),
                error: err.to_string(),
                duration: start.elapsed(),
            }));
            metrics::record_request(method.as_str(), status.as_u16(), start);
            err.into_response()
        }
    }
}

/// `target` is the already resolved destination. A resolution error is
/// reported only after the body checks, so size and timeout failures win.
async fn forward_cycle<B>(
    state: &ProxyState,
    request: Request<B>,
    target: Result<Uri, ProxyError>,
    url: &str,
    id: Uuid,
    start: Instant,
) -> Result<Response<Body>, ProxyError>
where
    B: HttpBody + Unpin,
    B::Error: Display,
{
    let limit = state.config.limits.max_body_size;
    let preview = state.config.observability.body_preview_chars;
    let (parts, body) = request.into_parts();

    if declared_length(&parts.headers).is_some_and(|len| len > limit) {
        return Err(ProxyError::ClientBodyTooLarge { limit });
    }

    let inbound = tokio::time::timeout(state.config.timeouts.server(), read_bounded(body, limit))
        .await
        .map_err(|_| ProxyError::ClientBodyTimeout)?
        .map_err(|e| ProxyError::RequestBody(e.to_string()))?;
    if inbound.truncated {
        return Err(ProxyError::ClientBodyTooLarge { limit });
    }

    let target = target?;

    state.sink.emit(Record::Request(RequestRecord {
        id,
        method: parts.method.to_string(),
        url: url.to_string(),
        headers: display_headers(&parts.headers),
        body: render_body(&inbound.bytes, preview),
    }));

    let outbound = build_outbound(parts.method.clone(), target, &parts.headers, inbound.bytes)?;

    let request_timeout = state.config.timeouts.request();
    let deadline = tokio::time::Instant::now() + request_timeout;

    tracing::debug!(request_id = %id, method = %parts.method, url = %url, "Dispatching request");

    let response = tokio::time::timeout_at(deadline, state.client.request(outbound))
        .await
        .map_err(|_| ProxyError::UpstreamTimeout(request_timeout))?
        .map_err(|e| ProxyError::Upstream(error_chain(&e)))?;

    let (response_parts, response_body) = response.into_parts();
    let origin = tokio::time::timeout_at(deadline, read_bounded(response_body, limit))
        .await
        .map_err(|_| ProxyError::UpstreamTimeout(request_timeout))?
        .map_err(|e| ProxyError::ResponseBody(error_chain(&e)))?;
    if origin.truncated {
        return Err(ProxyError::ResponseBodyTooLarge { limit });
    }

    let status = response_parts.status;
    let display = decompress_for_display(&origin.bytes, &response_parts.headers, limit);
    let record = ResponseRecord {
        id,
        status: status.as_u16(),
        url: url.to_string(),
        headers: display_headers(&response_parts.headers),
        body: render_body(&display, preview),
        duration: Duration::ZERO,
        completed: false,
    };

    tracing::debug!(
        request_id = %id,
        url = %url,
        status = status.as_u16(),
        bytes = origin.bytes.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Origin responded"
    );
    metrics::record_request(parts.method.as_str(), status.as_u16(), start);

    let deferred = DeferredRecord::new(state.sink.clone(), record, start);
    Ok(verbatim_response(
        &parts.method,
        status,
        response_parts.headers,
        origin.bytes,
        deferred,
    ))
}

/// The body length the client declared, when it parses.
fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Render an error with its sources, outermost first.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
