//! Engine event model
//!
//! Both ARQ engines are plain state machines. The surrounding event loop
//! turns socket reads, send completions and timer expiry into [`Event`]s,
//! feeds them to [`Engine::handle`], and carries out the returned
//! [`Action`]s in order. Engines never touch sockets, and they read the
//! clock only for statistics.

use crate::packet::{PacketError, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use crate::stats::TransferStats;
use bytes::Bytes;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Default window size (packets)
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// Default receiver debounce timeout
pub const STANDBY_TIMEOUT: Duration = Duration::from_millis(100);

/// Default sender retransmit timeout
pub const RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default ceiling on consecutive non-progress retransmissions
pub const MAX_RETRANSMITS: u32 = 16;

/// Input to an engine step
#[derive(Debug)]
pub enum Event {
    /// A datagram arrived from the peer
    PacketArrived(Bytes),
    /// The transport finished a `Transmit` action
    SendCompleted(io::Result<usize>),
    /// The engine's single timer expired
    TimerFired,
}

/// Output of an engine step, to be executed in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send this datagram to the peer
    Transmit(Bytes),
    /// Arm the engine timer, replacing any pending deadline
    ArmTimer(Duration),
    /// Cancel the pending timer, if any
    CancelTimer,
    /// The transfer is over; stop the event loop
    Close,
}

/// A single-transmission ARQ state machine
pub trait Engine {
    /// Actions to perform when the event loop starts
    fn start(&mut self) -> Vec<Action>;

    /// Advance the state machine by one event
    fn handle(&mut self, event: Event) -> Result<Vec<Action>, TransferError>;

    /// Whether the engine has reached a terminal state
    fn is_finished(&self) -> bool;

    /// Counters accumulated so far
    fn stats(&self) -> &TransferStats;
}

/// ARQ tunables shared by both peers
#[derive(Debug, Clone)]
pub struct ArqConfig {
    /// Window size W (packets)
    pub window_size: usize,
    /// Data bytes per packet
    pub chunk_size: usize,
    /// Receiver quiet period before a forced duplicate acknowledgment
    pub standby_timeout: Duration,
    /// Sender quiet period before it resends from the last acknowledged packet
    pub retransmit_timeout: Duration,
    /// Consecutive non-progress retransmissions tolerated before aborting
    pub max_retransmits: u32,
}

impl Default for ArqConfig {
    fn default() -> Self {
        ArqConfig {
            window_size: DEFAULT_WINDOW_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            standby_timeout: STANDBY_TIMEOUT,
            retransmit_timeout: RETRANSMIT_TIMEOUT,
            max_retransmits: MAX_RETRANSMITS,
        }
    }
}

impl ArqConfig {
    /// Check the configuration for values the engines cannot work with
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.window_size == 0 {
            return Err(TransferError::InvalidConfig(
                "window size must be at least 1".to_string(),
            ));
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(TransferError::InvalidConfig(format!(
                "chunk size must be between 1 and {} bytes",
                MAX_CHUNK_SIZE
            )));
        }
        if self.standby_timeout.is_zero() || self.retransmit_timeout.is_zero() {
            return Err(TransferError::InvalidConfig(
                "timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Terminal transfer conditions reported to the operator
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("Transport send failed: {0}")]
    TransportSend(#[source] io::Error),

    #[error("Retry limit exceeded: {attempts} consecutive retransmissions without progress (max {max})")]
    RetryLimitExceeded { attempts: u32, max: u32 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),
}

/// Lowercase hex rendering used in digest reports
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
