//! Response handling.
//!
//! The body handed back to the client is exactly the buffered origin body.
//! It is wrapped so the cycle's response record fires once hyper is done with it.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderMap, Method, Response, StatusCode};
use bytes::Bytes;
use http_body::{Frame, SizeHint};
use http_body_util::Full;

use crate::observability::DeferredRecord;

/// Buffered response body that completes a [`DeferredRecord`].
///
/// The record is marked complete once the data frame (or end of stream) has
/// been handed to the connection, and emitted when hyper drops the body.
pub struct RecordingBody {
    inner: Full<Bytes>,
    record: DeferredRecord,
}

impl RecordingBody {
    pub fn new(bytes: Bytes, record: DeferredRecord) -> Self {
        Self {
            inner: Full::new(bytes),
            record,
        }
    }
}

impl http_body::Body for RecordingBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let frame = Pin::new(&mut this.inner).poll_frame(cx);
        if frame.is_ready() {
            this.record.complete();
        }
        frame
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Whether hyper will write a body for this response at all.
fn carries_body(method: &Method, status: StatusCode) -> bool {
    !(method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// Rebuild the origin response: same status, headers copied verbatim, same bytes.
pub fn verbatim_response(
    method: &Method,
    status: StatusCode,
    headers: HeaderMap,
    bytes: Bytes,
    mut record: DeferredRecord,
) -> Response<Body> {
    // Nothing will be polled for these, so the hand-off is already done.
    if bytes.is_empty() || !carries_body(method, status) {
        record.complete();
    }

    let mut response = Response::new(Body::new(RecordingBody::new(bytes, record)));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
