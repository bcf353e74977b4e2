//! Go-Back-N sender
//!
//! The sender splits its payload into an immutable packet array once, up
//! front: a header at index 0, data chunks, and a trailer carrying the
//! payload digest at index `N-1`. It then keeps at most W of them in
//! flight.
//!
//! ```text
//!        base                sent
//!         │                   │
//!  ───────┼───────────────────┼──────────────▶ packet index
//!  acked  │ <── in flight ──▶ │  not yet sent
//! ```
//!
//! The receiver acknowledges cumulatively, one ack per flushed window:
//!
//! - `ack == N-1` ends the transfer.
//! - `ack == sent-1` slides the window: the next `min(W, N-sent)` packets go out.
//! - `ack < sent-1` means the receiver is missing something behind the
//!   window. The sender goes back to `ack+1` and resends a full window.
//! - `ack >= sent` acknowledges something never sent and is ignored.
//!
//! A retransmit timer, armed whenever a batch goes out, covers the two
//! stalls the receiver's duplicate acknowledgment cannot: a first window
//! lost entirely, and a lost forced duplicate ack. Consecutive rewinds that
//! do not move `base` forward are counted against
//! [`ArqConfig::max_retransmits`].

use crate::engine::{Action, ArqConfig, Engine, Event, TransferError};
use crate::packet::{
    encode_data, encode_header, encode_trailer, packet_count, Ack, PacketError, TransmissionId,
    MAX_CHUNK_SIZE, TOTAL_PACKETS_SIZE,
};
use crate::stats::TransferStats;
use bytes::Bytes;
use gbn_crypto::PayloadDigest;
use std::io;
use std::time::Duration;

/// Sender state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// Packets built, nothing transmitted
    Idle,
    /// First window being transmitted
    Sending,
    /// Waiting for acknowledgments
    AwaitingAck,
    /// Trailer acknowledged
    Complete,
    /// Gave up after too many retransmissions without progress
    Aborted,
}

/// Go-Back-N sender for one transmission
pub struct Sender {
    transmission_id: TransmissionId,
    /// Encoded packets, index == sequence number
    packets: Vec<Bytes>,
    window_size: usize,
    /// Packets transmitted in the current pass (next index to send)
    sent: usize,
    /// First unacknowledged index
    base: usize,
    /// Highest index ever transmitted, plus one
    high_water: usize,
    /// Highest base ever reached through an acknowledgment
    progress: usize,
    consecutive_retransmits: u32,
    max_retransmits: u32,
    retransmit_timeout: Duration,
    payload_len: usize,
    state: SenderState,
    stats: TransferStats,
}

impl Sender {
    /// Build the packet array for `payload`
    ///
    /// `metadata` travels in the header packet, by convention the file name.
    pub fn new(
        transmission_id: TransmissionId,
        payload: &[u8],
        metadata: &[u8],
        config: &ArqConfig,
        digest: &dyn PayloadDigest,
    ) -> Result<Self, TransferError> {
        config.validate()?;

        let header_payload = TOTAL_PACKETS_SIZE + metadata.len();
        if header_payload > MAX_CHUNK_SIZE {
            return Err(PacketError::PayloadTooLarge {
                size: header_payload,
                max: MAX_CHUNK_SIZE,
            }
            .into());
        }

        let total = packet_count(payload.len(), config.chunk_size);
        let total_u32 = u32::try_from(total).map_err(|_| {
            TransferError::InvalidConfig(format!(
                "payload of {} bytes needs {} packets, more than a 32-bit sequence space",
                payload.len(),
                total
            ))
        })?;

        let mut packets = Vec::with_capacity(total);
        packets.push(encode_header(transmission_id, total_u32, metadata));
        for (index, chunk) in payload.chunks(config.chunk_size).enumerate() {
            packets.push(encode_data(transmission_id, index as u32 + 1, chunk));
        }
        packets.push(encode_trailer(
            transmission_id,
            total_u32 - 1,
            &digest.digest(payload),
        ));
        debug_assert_eq!(packets.len(), total);

        tracing::debug!(
            "Built {} packets for transmission {:#06x} ({} bytes, chunk {})",
            total,
            transmission_id,
            payload.len(),
            config.chunk_size
        );

        Ok(Sender {
            transmission_id,
            packets,
            window_size: config.window_size,
            sent: 0,
            base: 0,
            high_water: 0,
            progress: 0,
            consecutive_retransmits: 0,
            max_retransmits: config.max_retransmits,
            retransmit_timeout: config.retransmit_timeout,
            payload_len: payload.len(),
            state: SenderState::Idle,
            stats: TransferStats {
                expected_packets: Some(total as u64),
                ..TransferStats::default()
            },
        })
    }

    /// Get the transmission ID
    pub fn transmission_id(&self) -> TransmissionId {
        self.transmission_id
    }

    /// Total number of packets N
    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    /// Size of the source payload in bytes
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Encoded packet with the given sequence number
    pub fn packet(&self, seq: usize) -> Option<&Bytes> {
        self.packets.get(seq)
    }

    /// Packets transmitted in the current pass
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// First unacknowledged packet index
    pub fn base(&self) -> usize {
        self.base
    }

    /// Packets transmitted but not yet acknowledged
    pub fn in_flight(&self) -> usize {
        self.sent - self.base
    }

    /// Get current state
    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Get transfer statistics
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// Process a cumulative acknowledgment
    pub fn on_ack(&mut self, ack: Ack) -> Result<Vec<Action>, TransferError> {
        if matches!(self.state, SenderState::Complete | SenderState::Aborted) {
            return Ok(Vec::new());
        }
        if ack.transmission_id != self.transmission_id {
            tracing::warn!(
                "Ignoring {} for foreign transmission (expected {:#06x})",
                ack,
                self.transmission_id
            );
            return Ok(Vec::new());
        }

        let seq = ack.seq as usize;
        let last = self.packets.len() - 1;
        self.stats.acks += 1;

        if seq == last {
            self.base = self.packets.len();
            self.sent = self.packets.len();
            self.state = SenderState::Complete;
            self.stats.mark_finished();
            tracing::info!(
                "Transmission {:#06x} complete: {} packets, {} retransmitted, {:?}",
                self.transmission_id,
                self.packets.len(),
                self.stats.packets_retransmitted,
                self.stats.elapsed()
            );
            return Ok(vec![Action::CancelTimer, Action::Close]);
        }

        if seq >= self.sent {
            tracing::debug!("Ignoring {} beyond sent={}", ack, self.sent);
            return Ok(Vec::new());
        }

        let mut actions = Vec::new();
        if seq == self.sent - 1 {
            self.record_progress(seq + 1);
            self.base = seq + 1;
            let n = self.window_size.min(self.packets.len() - self.sent);
            tracing::trace!("{} slides window, sending {} from {}", ack, n, self.sent);
            self.transmit(self.sent, n, &mut actions);
        } else {
            // Stale: the receiver is missing something behind the window
            if !self.record_progress(seq + 1) {
                self.count_retransmission()?;
            }
            self.sent = seq + 1;
            self.base = self.sent;
            let n = self.window_size.min(self.packets.len() - self.sent);
            self.stats.go_back_n_rounds += 1;
            tracing::debug!("Stale {}: going back to {} and resending {}", ack, self.sent, n);
            self.transmit(self.sent, n, &mut actions);
        }

        self.state = SenderState::AwaitingAck;
        actions.push(Action::ArmTimer(self.retransmit_timeout));
        Ok(actions)
    }

    fn on_timeout(&mut self) -> Result<Vec<Action>, TransferError> {
        if matches!(self.state, SenderState::Complete | SenderState::Aborted) {
            return Ok(Vec::new());
        }
        self.stats.timer_fires += 1;
        self.count_retransmission()?;

        self.sent = self.base;
        let n = self.window_size.min(self.packets.len() - self.sent);
        self.stats.go_back_n_rounds += 1;
        tracing::warn!(
            "No acknowledgment within {:?}, resending {} from {}",
            self.retransmit_timeout,
            n,
            self.sent
        );

        let mut actions = Vec::new();
        self.transmit(self.sent, n, &mut actions);
        actions.push(Action::ArmTimer(self.retransmit_timeout));
        Ok(actions)
    }

    fn on_send_completed(&mut self, result: io::Result<usize>) -> Result<Vec<Action>, TransferError> {
        match result {
            Ok(n) => {
                self.stats.bytes_sent += n as u64;
                Ok(Vec::new())
            }
            Err(e) => {
                tracing::error!("Send failed for transmission {:#06x}: {}", self.transmission_id, e);
                Err(TransferError::TransportSend(e))
            }
        }
    }

    /// Queue `n` packets starting at `start` and advance `sent`
    fn transmit(&mut self, start: usize, n: usize, actions: &mut Vec<Action>) {
        for index in start..start + n {
            actions.push(Action::Transmit(self.packets[index].clone()));
            if index < self.high_water {
                self.stats.packets_retransmitted += 1;
            }
        }
        self.stats.packets_sent += n as u64;
        self.sent = start + n;
        self.high_water = self.high_water.max(self.sent);
        debug_assert!(self.in_flight() <= self.window_size);
    }

    /// Returns true if `new_base` moves past every base reached before
    fn record_progress(&mut self, new_base: usize) -> bool {
        if new_base > self.progress {
            self.progress = new_base;
            self.consecutive_retransmits = 0;
            true
        } else {
            false
        }
    }

    fn count_retransmission(&mut self) -> Result<(), TransferError> {
        self.consecutive_retransmits += 1;
        if self.consecutive_retransmits > self.max_retransmits {
            self.state = SenderState::Aborted;
            self.stats.mark_finished();
            tracing::error!(
                "Aborting transmission {:#06x} after {} retransmissions without progress",
                self.transmission_id,
                self.max_retransmits
            );
            return Err(TransferError::RetryLimitExceeded {
                attempts: self.consecutive_retransmits,
                max: self.max_retransmits,
            });
        }
        Ok(())
    }
}

impl Engine for Sender {
    fn start(&mut self) -> Vec<Action> {
        if self.state != SenderState::Idle {
            return Vec::new();
        }
        self.state = SenderState::Sending;
        self.stats.mark_started();

        let n = self.window_size.min(self.packets.len());
        tracing::info!(
            "Starting transmission {:#06x}: {} packets, window {}",
            self.transmission_id,
            self.packets.len(),
            self.window_size
        );

        let mut actions = Vec::with_capacity(n + 1);
        self.transmit(0, n, &mut actions);
        actions.push(Action::ArmTimer(self.retransmit_timeout));
        self.state = SenderState::AwaitingAck;
        actions
    }

    fn handle(&mut self, event: Event) -> Result<Vec<Action>, TransferError> {
        match event {
            Event::PacketArrived(bytes) => match Ack::decode(&bytes) {
                Ok(ack) => self.on_ack(ack),
                Err(e) => {
                    tracing::warn!("Dropping malformed acknowledgment: {}", e);
                    self.stats.packets_dropped += 1;
                    Ok(Vec::new())
                }
            },
            Event::SendCompleted(result) => self.on_send_completed(result),
            Event::TimerFired => self.on_timeout(),
        }
    }

    fn is_finished(&self) -> bool {
        matches!(self.state, SenderState::Complete | SenderState::Aborted)
    }

    fn stats(&self) -> &TransferStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use gbn_crypto::RingDigest;

    fn config(window_size: usize, chunk_size: usize) -> ArqConfig {
        ArqConfig {
            window_size,
            chunk_size,
            ..ArqConfig::default()
        }
    }

    fn sender(payload_len: usize, window: usize, chunk: usize) -> Sender {
        let payload: Vec<u8> = (0..payload_len).map(|i| i as u8).collect();
        Sender::new(1, &payload, b"test.bin", &config(window, chunk), &RingDigest::default()).unwrap()
    }

    fn transmitted_seqs(actions: &[Action]) -> Vec<u32> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Transmit(bytes) => Some(Packet::decode(bytes).unwrap().seq),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_packet_array_layout() {
        let s = sender(1_048_576, 10, 500);
        assert_eq!(s.packet_count(), 2100);

        let header = Packet::decode(s.packet(0).unwrap()).unwrap();
        let info = crate::packet::HeaderInfo::parse(&header.payload).unwrap();
        assert_eq!(info.total_packets, 2100);
        assert_eq!(info.file_name(), Some("test.bin"));

        let last_data = Packet::decode(s.packet(2098).unwrap()).unwrap();
        assert_eq!(last_data.payload.len(), 1_048_576 % 500);

        let trailer = Packet::decode(s.packet(2099).unwrap()).unwrap();
        assert_eq!(trailer.seq, 2099);
        assert_eq!(trailer.payload.len(), 16);
    }

    #[test]
    fn test_start_sends_first_window() {
        let mut s = sender(5000, 4, 500);
        let actions = s.start();

        assert_eq!(transmitted_seqs(&actions), vec![0, 1, 2, 3]);
        assert_eq!(actions.last(), Some(&Action::ArmTimer(RETRANSMIT)));
        assert_eq!(s.sent(), 4);
        assert_eq!(s.in_flight(), 4);
        assert_eq!(s.state(), SenderState::AwaitingAck);
    }

    const RETRANSMIT: Duration = crate::engine::RETRANSMIT_TIMEOUT;

    #[test]
    fn test_start_with_fewer_packets_than_window() {
        let mut s = sender(0, 10, 500);
        let actions = s.start();
        assert_eq!(transmitted_seqs(&actions), vec![0, 1]);
    }

    #[test]
    fn test_expected_ack_slides() {
        let mut s = sender(5000, 4, 500); // 12 packets
        s.start();

        let actions = s.on_ack(Ack::new(1, 3)).unwrap();
        assert_eq!(transmitted_seqs(&actions), vec![4, 5, 6, 7]);
        assert_eq!(s.base(), 4);
        assert_eq!(s.sent(), 8);
    }

    #[test]
    fn test_partial_final_window() {
        let mut s = sender(5000, 4, 500); // 12 packets
        s.start();
        s.on_ack(Ack::new(1, 3)).unwrap();
        let actions = s.on_ack(Ack::new(1, 7)).unwrap();
        assert_eq!(transmitted_seqs(&actions), vec![8, 9, 10, 11]);

        let actions = s.on_ack(Ack::new(1, 11)).unwrap();
        assert_eq!(actions, vec![Action::CancelTimer, Action::Close]);
        assert_eq!(s.state(), SenderState::Complete);
        assert!(s.is_finished());
    }

    #[test]
    fn test_stale_ack_goes_back_n() {
        let mut s = sender(5000, 4, 500);
        s.start();
        s.on_ack(Ack::new(1, 3)).unwrap(); // sent = 8

        let actions = s.on_ack(Ack::new(1, 3)).unwrap();
        assert_eq!(transmitted_seqs(&actions), vec![4, 5, 6, 7]);
        assert_eq!(s.sent(), 8);
        assert_eq!(s.stats().go_back_n_rounds, 1);
        assert_eq!(s.stats().packets_retransmitted, 4);
    }

    #[test]
    fn test_go_back_n_near_end_still_resends() {
        let mut s = sender(5000, 4, 500); // 12 packets
        s.start();
        s.on_ack(Ack::new(1, 3)).unwrap();
        s.on_ack(Ack::new(1, 7)).unwrap(); // sent = 12

        // Window recomputed from the rewound position, not from sent=N
        let actions = s.on_ack(Ack::new(1, 7)).unwrap();
        assert_eq!(transmitted_seqs(&actions), vec![8, 9, 10, 11]);
    }

    #[test]
    fn test_future_ack_ignored() {
        let mut s = sender(5000, 4, 500);
        s.start();

        let actions = s.on_ack(Ack::new(1, 6)).unwrap();
        assert!(actions.is_empty());
        assert_eq!(s.sent(), 4);
    }

    #[test]
    fn test_foreign_ack_ignored() {
        let mut s = sender(5000, 4, 500);
        s.start();

        let actions = s.on_ack(Ack::new(2, 3)).unwrap();
        assert!(actions.is_empty());
        assert_eq!(s.base(), 0);
    }

    #[test]
    fn test_malformed_ack_dropped() {
        let mut s = sender(5000, 4, 500);
        s.start();

        let actions = s
            .handle(Event::PacketArrived(Bytes::from_static(&[0, 1, 0])))
            .unwrap();
        assert!(actions.is_empty());
        assert_eq!(s.stats().packets_dropped, 1);
    }

    #[test]
    fn test_timeout_resends_from_base() {
        let mut s = sender(5000, 4, 500);
        s.start();
        s.on_ack(Ack::new(1, 3)).unwrap();

        let actions = s.handle(Event::TimerFired).unwrap();
        assert_eq!(transmitted_seqs(&actions), vec![4, 5, 6, 7]);
        assert_eq!(s.stats().timer_fires, 1);
    }

    #[test]
    fn test_retry_limit() {
        let payload = vec![0u8; 5000];
        let cfg = ArqConfig {
            window_size: 4,
            max_retransmits: 2,
            ..ArqConfig::default()
        };
        let mut s = Sender::new(1, &payload, b"", &cfg, &RingDigest::default()).unwrap();
        s.start();

        assert!(s.handle(Event::TimerFired).is_ok());
        assert!(s.handle(Event::TimerFired).is_ok());
        let err = s.handle(Event::TimerFired).unwrap_err();
        assert!(matches!(
            err,
            TransferError::RetryLimitExceeded { attempts: 3, max: 2 }
        ));
        assert_eq!(s.state(), SenderState::Aborted);
    }

    #[test]
    fn test_progress_resets_retry_counter() {
        let payload = vec![0u8; 5000];
        let cfg = ArqConfig {
            window_size: 4,
            max_retransmits: 1,
            ..ArqConfig::default()
        };
        let mut s = Sender::new(1, &payload, b"", &cfg, &RingDigest::default()).unwrap();
        s.start();

        s.handle(Event::TimerFired).unwrap();
        s.on_ack(Ack::new(1, 3)).unwrap();
        s.handle(Event::TimerFired).unwrap();
        s.on_ack(Ack::new(1, 7)).unwrap();
        assert!(s.handle(Event::TimerFired).is_ok());
    }

    #[test]
    fn test_send_failure_surfaces() {
        let mut s = sender(100, 4, 50);
        s.start();

        let err = s
            .handle(Event::SendCompleted(Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "unreachable",
            ))))
            .unwrap_err();
        assert!(matches!(err, TransferError::TransportSend(_)));

        s.handle(Event::SendCompleted(Ok(56))).unwrap();
        assert_eq!(s.stats().bytes_sent, 56);
    }

    #[test]
    fn test_zero_window_rejected() {
        let result = Sender::new(1, b"abc", b"", &config(0, 500), &RingDigest::default());
        assert!(matches!(result, Err(TransferError::InvalidConfig(_))));
    }

    #[test]
    fn test_oversized_metadata_rejected() {
        let name = vec![b'x'; MAX_CHUNK_SIZE];
        let result = Sender::new(1, b"abc", &name, &config(4, 500), &RingDigest::default());
        assert!(matches!(
            result,
            Err(TransferError::Packet(PacketError::PayloadTooLarge { .. }))
        ));
    }
}
