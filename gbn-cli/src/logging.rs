//! Tracing subscriber setup for the GBN tools
//!
//! - ERROR: transport failures, retry exhaustion, digest mismatch
//! - WARN: dropped packets, forced duplicate acknowledgments
//! - INFO: transfer start, completion, close
//! - DEBUG: window slides, flushes, Go-Back-N rewinds
//! - TRACE: every datagram

use tracing_subscriber::EnvFilter;

/// Initialize logging to stderr
///
/// `RUST_LOG` wins when set. Otherwise the level is `info`, or `debug`
/// with `verbose`.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize logging for tests; safe to call more than once
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
