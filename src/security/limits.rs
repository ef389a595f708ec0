//! Bounded body reading.
//!
//! # Responsibilities
//! - Read a request or response body into memory, never past a byte limit
//! - Report whether the limit cut the body short
//!
//! # Design Decisions
//! - Truncation is not an error here; callers turn it into 413 or 502
//! - Trailers are ignored, only data frames count toward the limit

use bytes::{Buf, BufMut, Bytes, BytesMut};
use http_body::Body as HttpBody;
use http_body_util::BodyExt;

/// Bytes read from a body, up to the configured limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedBody {
    pub bytes: Bytes,
    /// True when the source held more data than the limit allowed.
    pub truncated: bool,
}

/// Read at most `limit` bytes from `body`.
///
/// Stops at the first data frame that would cross the limit, keeping exactly
/// `limit` bytes. Errors from the underlying body are returned as-is.
pub async fn read_bounded<B>(mut body: B, limit: u64) -> Result<BoundedBody, B::Error>
where
    B: HttpBody + Unpin,
{
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    let hint = usize::try_from(body.size_hint().lower()).unwrap_or(usize::MAX);
    let mut buf = BytesMut::with_capacity(hint.min(limit));

    while let Some(frame) = body.frame().await {
        let Ok(data) = frame?.into_data() else {
            continue;
        };
        let remaining = limit - buf.len();
        if data.remaining() > remaining {
            buf.put(data.take(remaining));
            return Ok(BoundedBody {
                bytes: buf.freeze(),
                truncated: true,
            });
        }
        buf.put(data);
    }

    Ok(BoundedBody {
        bytes: buf.freeze(),
        truncated: false,
    })
}
