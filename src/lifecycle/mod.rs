//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs → http::server):
//!     Signal received → Stop accepting → Drain (grace period) → Force close → Exit
//! ```
//!
//! # Design Decisions
//! - Shutdown has timeout: forced close after deadline, reported as an error
//! - Normal signal-triggered shutdown exits successfully

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
