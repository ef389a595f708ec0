//! Lucy: a forward HTTP debugging proxy.
//!
//! Plain HTTP requests are relayed to their origin while request and response
//! metadata are captured for display. CONNECT requests open opaque tunnels.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::listener ──▶ http::server ──┬─▶ proxy::forward ──▶ http::client ──▶ Origin
//!                                                 │        │
//!                                                 │        └─▶ observability (records, metrics)
//!                                                 │
//!                                                 └─▶ proxy::tunnel ◀═══ raw bytes ═══▶ Target
//!
//!     Cross-cutting: config, security (headers, body limits), lifecycle (signals, shutdown)
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod proxy;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::ProxyConfig;
pub use http::{ProxyServer, ServerError};
pub use lifecycle::Shutdown;
