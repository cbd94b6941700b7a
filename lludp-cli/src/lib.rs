//! LLUDP CLI Library
//!
//! Shared functionality for the LLUDP command-line tools.

pub mod config;
pub mod stats;

pub use config::{CircuitConfig, ClientConfig, Config, ConfigError, ServerConfig};
pub use stats::{compact_stats, display_connection_stats, format_bytes, format_duration, format_rtt};
