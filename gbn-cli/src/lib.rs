//! GBN CLI Library
//!
//! Shared functionality for the GBN command-line tools.

pub mod config;
pub mod logging;
pub mod stats;

pub use config::{Config, ConfigError, DigestConfig, ReceiverConfig, SenderConfig};
pub use logging::{init_for_tests, init_logging};
pub use stats::{
    display_compact_stats, display_transfer_summary, format_bandwidth, format_bytes,
    format_duration,
};
