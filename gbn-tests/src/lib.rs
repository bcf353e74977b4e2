//! Shared fixtures for the GBN integration tests

use gbn_protocol::ArqConfig;
use std::time::Duration;

/// Deterministic, non-repeating-looking payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x9e37_79b9;
    (0..len)
        .map(|_| {
            // xorshift32
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

/// Engine settings with short timeouts for wall-clock tests
pub fn fast_config(window_size: usize, chunk_size: usize) -> ArqConfig {
    ArqConfig {
        window_size,
        chunk_size,
        standby_timeout: Duration::from_millis(20),
        retransmit_timeout: Duration::from_millis(200),
        ..ArqConfig::default()
    }
}
