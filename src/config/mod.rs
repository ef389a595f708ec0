//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → command-line / environment overrides (main.rs)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to every connection task
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the server starts; there is no reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, read_config, ConfigError};
pub use schema::{
    ListenerConfig, LimitConfig, LogFormat, ObservabilityConfig, ProxyConfig, RelayMode,
    TimeoutConfig, TrafficOutput, TunnelConfig,
};
pub use validation::{validate_config, ValidationError};
