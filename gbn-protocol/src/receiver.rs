//! Windowed receiver
//!
//! Arrivals are collected into a window of at most W packets. The window is
//! flushed when it is full, or when the last outstanding packet of the
//! transfer arrives. A flush sorts the window, appends the data chunks to
//! the reassembly buffer in sequence order, and acknowledges the highest
//! sequence number in the batch. Reordering is tolerated only inside the
//! current window.
//!
//! Every arrival re-arms a debounce timer. If it fires, the input has
//! stalled (something in the window was lost). The receiver then repeats
//! its last acknowledgment, which the sender treats as stale and answers
//! with a Go-Back-N resend. The partial window is discarded.
//!
//! Only packets inside `[next_expected, next_expected + W)` that are not
//! already held are counted. So a full window is always exactly the next
//! W contiguous sequence numbers, and duplicates or stray retransmissions
//! cannot leave a gap in the reassembly buffer.

use crate::engine::{hex, Action, ArqConfig, Engine, Event, TransferError};
use crate::packet::{encode_ack, HeaderInfo, Packet, TransmissionId};
use crate::stats::TransferStats;
use bytes::{Bytes, BytesMut};
use gbn_crypto::{verify, PayloadDigest};
use std::io;
use std::time::Duration;

/// Upper bound on the reassembly buffer reserved up front from a header
const MAX_PREALLOCATION: usize = 64 * 1024 * 1024;

/// Receiver state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Accepting packets into the current window
    Collecting,
    /// Trailer flushed and acknowledged
    Closed,
}

/// Result of a completed transfer
#[derive(Debug, Clone)]
pub struct ReceiverOutcome {
    /// Transmission the payload belongs to
    pub transmission_id: TransmissionId,
    /// Reassembled payload
    pub payload: Bytes,
    /// Header metadata (file name)
    pub metadata: Bytes,
    /// Digest carried by the trailer
    pub expected_digest: Bytes,
    /// Digest of the reassembled payload
    pub actual_digest: Bytes,
    /// Total packets in the transfer
    pub total_packets: u32,
}

impl ReceiverOutcome {
    /// Whether the reassembled payload matches the trailer digest
    pub fn digest_matches(&self) -> bool {
        verify(&self.expected_digest, &self.actual_digest)
    }

    /// Report a digest mismatch as an error
    pub fn verify(&self) -> Result<(), TransferError> {
        if self.digest_matches() {
            Ok(())
        } else {
            Err(TransferError::DigestMismatch {
                expected: hex(&self.expected_digest),
                actual: hex(&self.actual_digest),
            })
        }
    }

    /// Header metadata as a file name, if valid UTF-8
    pub fn file_name(&self) -> Option<&str> {
        std::str::from_utf8(&self.metadata)
            .ok()
            .filter(|name| !name.is_empty())
    }
}

/// Windowed receiver for one transmission
pub struct Receiver {
    window_size: usize,
    chunk_size: usize,
    standby_timeout: Duration,
    digest: Box<dyn PayloadDigest>,
    /// Locked on the first well-formed packet
    transmission_id: Option<TransmissionId>,
    window: Vec<Packet>,
    /// Packets counted into the current window
    window_count: usize,
    total_packets: Option<u32>,
    /// Packets accepted so far, flushed or still in the window
    received: u32,
    /// First sequence number not yet flushed
    next_expected: u32,
    last_acked: Option<u32>,
    metadata: Bytes,
    received_digest: Bytes,
    buffer: BytesMut,
    state: ReceiverState,
    outcome: Option<ReceiverOutcome>,
    stats: TransferStats,
}

impl Receiver {
    /// Create a receiver that verifies the payload with `digest`
    pub fn new(config: &ArqConfig, digest: Box<dyn PayloadDigest>) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Receiver {
            window_size: config.window_size,
            chunk_size: config.chunk_size,
            standby_timeout: config.standby_timeout,
            digest,
            transmission_id: None,
            window: Vec::with_capacity(config.window_size),
            window_count: 0,
            total_packets: None,
            received: 0,
            next_expected: 0,
            last_acked: None,
            metadata: Bytes::new(),
            received_digest: Bytes::new(),
            buffer: BytesMut::new(),
            state: ReceiverState::Collecting,
            outcome: None,
            stats: TransferStats::default(),
        })
    }

    /// Get current state
    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Transmission ID, once the first packet has been seen
    pub fn transmission_id(&self) -> Option<TransmissionId> {
        self.transmission_id
    }

    /// Total packet count, once the header has arrived
    pub fn total_packets(&self) -> Option<u32> {
        self.total_packets
    }

    /// Packets accepted so far
    pub fn received(&self) -> u32 {
        self.received
    }

    /// Packets held in the current, unflushed window
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Last acknowledged sequence number
    pub fn last_acked(&self) -> Option<u32> {
        self.last_acked
    }

    /// Bytes reassembled so far
    pub fn reassembled_len(&self) -> usize {
        self.buffer.len()
    }

    /// Final outcome, available once closed
    pub fn outcome(&self) -> Option<&ReceiverOutcome> {
        self.outcome.as_ref()
    }

    /// Get transfer statistics
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    fn on_packet(&mut self, bytes: Bytes) -> Result<Vec<Action>, TransferError> {
        if self.state == ReceiverState::Closed {
            return Ok(Vec::new());
        }

        let packet = match Packet::decode_bytes(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("Dropping malformed packet: {}", e);
                self.stats.packets_dropped += 1;
                return Ok(Vec::new());
            }
        };

        match self.transmission_id {
            None => {
                tracing::info!("Transmission {:#06x} started", packet.transmission_id);
                self.transmission_id = Some(packet.transmission_id);
                self.stats.mark_started();
            }
            Some(id) if id != packet.transmission_id => {
                tracing::warn!(
                    "Dropping packet {} of foreign transmission {:#06x}",
                    packet.seq,
                    packet.transmission_id
                );
                self.stats.packets_dropped += 1;
                return Ok(Vec::new());
            }
            Some(_) => {}
        }

        if packet.seq == 0 && self.total_packets.is_none() {
            match HeaderInfo::parse(&packet.payload) {
                Ok(info) if info.total_packets >= 2 => self.learn_total(info.total_packets),
                Ok(info) => {
                    tracing::warn!("Dropping header announcing {} packets", info.total_packets);
                    self.stats.packets_dropped += 1;
                    return Ok(Vec::new());
                }
                Err(e) => {
                    tracing::warn!("Dropping malformed header packet: {}", e);
                    self.stats.packets_dropped += 1;
                    return Ok(Vec::new());
                }
            }
        }

        if !self.accepts(packet.seq) {
            tracing::trace!(
                "Discarding packet {} outside window starting at {}",
                packet.seq,
                self.next_expected
            );
            self.stats.packets_dropped += 1;
            return Ok(vec![Action::ArmTimer(self.standby_timeout)]);
        }

        self.received += 1;
        self.window_count += 1;
        debug_assert!(self.window_count <= self.window_size);
        self.stats.packets_received += 1;
        tracing::trace!("Packet {} accepted ({} in window)", packet.seq, self.window_count);
        self.window.push(packet);

        if self.window_count == self.window_size || Some(self.received) == self.total_packets {
            Ok(self.flush())
        } else {
            Ok(vec![Action::ArmTimer(self.standby_timeout)])
        }
    }

    /// Whether `seq` belongs to the current window and is not already held
    fn accepts(&self, seq: u32) -> bool {
        if seq < self.next_expected {
            return false;
        }
        if (seq - self.next_expected) as usize >= self.window_size {
            return false;
        }
        if let Some(total) = self.total_packets {
            if seq >= total {
                return false;
            }
        }
        !self.window.iter().any(|p| p.seq == seq)
    }

    fn learn_total(&mut self, total: u32) {
        self.total_packets = Some(total);
        self.stats.expected_packets = Some(u64::from(total));
        let data_packets = total.saturating_sub(2) as usize;
        self.buffer
            .reserve(data_packets.saturating_mul(self.chunk_size).min(MAX_PREALLOCATION));
        tracing::debug!("Header announces {} packets", total);
    }

    fn flush(&mut self) -> Vec<Action> {
        self.window.sort_unstable_by_key(|p| p.seq);

        let total = self.total_packets;
        let mut highest = self.next_expected;
        for packet in self.window.drain(..) {
            highest = packet.seq;
            if packet.seq == 0 {
                if let Ok(info) = HeaderInfo::parse(&packet.payload) {
                    self.metadata = info.metadata;
                    if self.total_packets.is_none() {
                        self.total_packets = Some(info.total_packets);
                    }
                }
            } else if Some(packet.seq + 1) == total {
                self.received_digest = packet.payload;
            } else {
                self.stats.bytes_received += packet.payload.len() as u64;
                self.buffer.extend_from_slice(&packet.payload);
            }
        }

        self.window_count = 0;
        self.next_expected = highest + 1;
        self.last_acked = Some(highest);
        self.stats.acks += 1;

        let id = self.transmission_id.unwrap_or_default();
        tracing::debug!("Flushed window, acknowledging {}", highest);

        let mut actions = vec![Action::CancelTimer, Action::Transmit(encode_ack(id, highest))];
        if Some(highest + 1) == self.total_packets {
            self.close();
            actions.push(Action::Close);
        }
        actions
    }

    fn on_timeout(&mut self) -> Vec<Action> {
        if self.state == ReceiverState::Closed {
            return Vec::new();
        }
        self.stats.timer_fires += 1;

        let discarded = self.window.len();
        self.window.clear();
        self.window_count = 0;
        self.received -= discarded as u32;

        match (self.transmission_id, self.last_acked) {
            (Some(id), Some(seq)) => {
                tracing::warn!(
                    "Input stalled, discarded {} packets, repeating acknowledgment {}",
                    discarded,
                    seq
                );
                self.stats.duplicate_acks += 1;
                vec![Action::Transmit(encode_ack(id, seq))]
            }
            _ => {
                tracing::warn!(
                    "Input stalled before the first flush, discarded {} packets",
                    discarded
                );
                Vec::new()
            }
        }
    }

    fn on_send_completed(&mut self, result: io::Result<usize>) -> Result<Vec<Action>, TransferError> {
        match result {
            Ok(n) => {
                self.stats.bytes_sent += n as u64;
                Ok(Vec::new())
            }
            Err(e) => {
                tracing::error!("Acknowledgment send failed: {}", e);
                Err(TransferError::TransportSend(e))
            }
        }
    }

    fn close(&mut self) {
        self.state = ReceiverState::Closed;
        self.stats.mark_finished();

        let payload = std::mem::take(&mut self.buffer).freeze();
        let actual_digest = self.digest.digest(&payload);
        let outcome = ReceiverOutcome {
            transmission_id: self.transmission_id.unwrap_or_default(),
            payload,
            metadata: self.metadata.clone(),
            expected_digest: self.received_digest.clone(),
            actual_digest,
            total_packets: self.total_packets.unwrap_or(self.received),
        };

        if outcome.digest_matches() {
            tracing::info!(
                "Transmission {:#06x} closed: {} bytes in {} packets, digest verified",
                outcome.transmission_id,
                outcome.payload.len(),
                outcome.total_packets
            );
        } else {
            tracing::error!(
                "Transmission {:#06x} closed with digest mismatch: expected {}, computed {}",
                outcome.transmission_id,
                hex(&outcome.expected_digest),
                hex(&outcome.actual_digest)
            );
        }
        self.outcome = Some(outcome);
    }
}

impl Engine for Receiver {
    fn start(&mut self) -> Vec<Action> {
        tracing::debug!("Receiver ready, window {}", self.window_size);
        Vec::new()
    }

    fn handle(&mut self, event: Event) -> Result<Vec<Action>, TransferError> {
        match event {
            Event::PacketArrived(bytes) => self.on_packet(bytes),
            Event::SendCompleted(result) => self.on_send_completed(result),
            Event::TimerFired => Ok(self.on_timeout()),
        }
    }

    fn is_finished(&self) -> bool {
        self.state == ReceiverState::Closed
    }

    fn stats(&self) -> &TransferStats {
        &self.stats
    }
}
