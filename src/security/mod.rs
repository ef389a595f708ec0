//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → limits.rs (bounded body read, 413 on overflow)
//!     → headers.rs (strip hop-by-hop headers)
//!     → Pass to forwarding pipeline
//!
//! Upstream response:
//!     → limits.rs (bounded body read, 502 on overflow)
//! ```
//!
//! # Design Decisions
//! - Untrusted bodies are never read unboundedly into memory
//! - No trust in client input

pub mod headers;
pub mod limits;

pub use headers::{display_headers, is_hop_by_hop, sanitize_request_headers};
pub use limits::{read_bounded, BoundedBody};
