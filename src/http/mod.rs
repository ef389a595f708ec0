//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper HTTP/1.1, trace layer, CONNECT vs forward dispatch)
//!     → request.rs (resolve target, sanitized outbound request)
//!     → client.rs (pooled outbound client, plain HTTP or TLS)
//!     → response.rs (origin bytes back unchanged, response record on hand-off)
//!     → Send to client
//! ```

pub mod client;
pub mod request;
pub mod response;
pub mod server;

pub use client::{build_client, HttpClient};
pub use server::{ProxyServer, ServerError};
