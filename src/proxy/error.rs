//! Per-cycle failures and their HTTP mapping.

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Everything that can end a single HTTP cycle or CONNECT session early.
///
/// Each variant is terminal for its own cycle only.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Request body too large: limit is {limit} bytes")]
    ClientBodyTooLarge { limit: u64 },

    #[error("Timed out reading request body")]
    ClientBodyTimeout,

    #[error("Failed to read request body: {0}")]
    RequestBody(String),

    #[error("Invalid request URL: {0}")]
    InvalidTarget(String),

    #[error("Failed to connect to target {target}: {reason}")]
    Dial { target: String, reason: String },

    #[error("Failed to make request: {0}")]
    Upstream(String),

    #[error("Failed to make request: timed out after {0:?}")]
    UpstreamTimeout(Duration),

    #[error("Response body too large: limit is {limit} bytes")]
    ResponseBodyTooLarge { limit: u64 },

    #[error("Failed to read response body: {0}")]
    ResponseBody(String),

    #[error("Hijacking not supported")]
    HijackUnsupported,
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::ClientBodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::ClientBodyTimeout => StatusCode::REQUEST_TIMEOUT,
            ProxyError::RequestBody(_) | ProxyError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            ProxyError::Dial { .. }
            | ProxyError::Upstream(_)
            | ProxyError::UpstreamTimeout(_)
            | ProxyError::ResponseBodyTooLarge { .. }
            | ProxyError::ResponseBody(_) => StatusCode::BAD_GATEWAY,
            ProxyError::HijackUnsupported => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("{self}\n"),
        )
            .into_response()
    }
}
