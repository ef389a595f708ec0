//! Proxy engines.
//!
//! # Data Flow
//! ```text
//! Inbound request (http::server)
//!     → Dispatch::Forward → forward.rs (bounded read, sanitize, dispatch, record)
//!     → Dispatch::Tunnel  → tunnel.rs (dial, take the connection, relay bytes)
//! ```
//!
//! # Design Decisions
//! - Dispatch is a closed two-way choice on the request method
//! - Shared state is read-only config, the pooled client, the sink, and the tracker
//! - Every failure is terminal for its own cycle only

pub mod error;
pub mod forward;
pub mod tunnel;

use std::sync::Arc;

use axum::http::Method;

use crate::config::ProxyConfig;
use crate::http::client::HttpClient;
use crate::net::ConnectionTracker;
use crate::observability::RecordSink;

pub use error::ProxyError;

/// Which engine handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Tunnel,
    Forward,
}

impl Dispatch {
    pub fn for_method(method: &Method) -> Self {
        if method == Method::CONNECT {
            Dispatch::Tunnel
        } else {
            Dispatch::Forward
        }
    }
}

/// State shared by every connection task.
#[derive(Clone)]
pub struct ProxyState {
    pub config: Arc<ProxyConfig>,
    pub client: HttpClient,
    pub sink: Arc<dyn RecordSink>,
    pub tracker: ConnectionTracker,
}
