//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Forwarding pipeline / tunnel engine produce:
//!     → record.rs (traffic records → injected RecordSink)
//!     → inspect.rs (display copy of bodies, never the wire bytes)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Everything else:
//!     → logging.rs (structured tracing events on stderr)
//! ```
//!
//! # Design Decisions
//! - Traffic records are a side channel; they never change forwarded bytes
//! - Metrics are cheap (atomic increments)

pub mod inspect;
pub mod logging;
pub mod metrics;
pub mod record;

pub use record::{
    ClosedBy, ConsoleSink, DeferredRecord, FailureRecord, Record, RecordSink, RequestRecord,
    ResponseRecord, TracingSink, TunnelRecord,
};
