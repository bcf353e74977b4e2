//! Transfer statistics
//!
//! Counters kept by each engine for progress output and the final report.

use std::time::{Duration, Instant};

/// Per-transfer statistics
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    /// Packets handed to the transport, retransmissions included
    pub packets_sent: u64,
    /// Packets sent again after a Go-Back-N rewind
    pub packets_retransmitted: u64,
    /// Packets accepted into a receive window
    pub packets_received: u64,
    /// Packets dropped (malformed, foreign, duplicate, outside the window)
    pub packets_dropped: u64,
    /// Bytes handed to the transport
    pub bytes_sent: u64,
    /// Payload bytes written to the reassembly buffer
    pub bytes_received: u64,
    /// Acknowledgments emitted (receiver) or processed (sender)
    pub acks: u64,
    /// Duplicate acknowledgments forced by the receiver debounce timer
    pub duplicate_acks: u64,
    /// Go-Back-N rewinds triggered by stale acknowledgments or timeouts
    pub go_back_n_rounds: u64,
    /// Timer expirations
    pub timer_fires: u64,
    /// Total packets in the transfer, once known
    pub expected_packets: Option<u64>,
    /// Time the transfer started
    pub started_at: Option<Instant>,
    /// Time the transfer reached its terminal state
    pub finished_at: Option<Instant>,
}

impl TransferStats {
    /// Record the start time, if not already set
    pub fn mark_started(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    /// Record the finish time
    pub fn mark_finished(&mut self) {
        self.finished_at = Some(Instant::now());
    }

    /// Time between start and finish (or now, while running)
    pub fn elapsed(&self) -> Duration {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Average throughput in bits per second over the elapsed time
    ///
    /// Uses bytes sent on the sender side and bytes reassembled on the
    /// receiver side, whichever is larger.
    pub fn throughput_bps(&self) -> u64 {
        let secs = self.elapsed().as_secs_f64();
        if secs <= 0.0 {
            return 0;
        }
        let bytes = self.bytes_sent.max(self.bytes_received);
        ((bytes as f64 * 8.0) / secs) as u64
    }
}
