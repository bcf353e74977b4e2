//! Property-based tests for whole transfers
//!
//! These tests use proptest to generate payloads, packet sizes, window sizes
//! and loss patterns, and check the protocol invariants on every run.

use gbn::sim::{simulate, FaultPlan, SimConfig};
use gbn_crypto::RingDigest;
use gbn_protocol::packet::{encode_ack, packet_count, Packet};
use gbn_protocol::{Action, ArqConfig, Engine, Event, Sender};
use proptest::prelude::*;

fn sim_config(window_size: usize, chunk_size: usize) -> SimConfig {
    SimConfig {
        arq: ArqConfig {
            window_size,
            chunk_size,
            ..ArqConfig::default()
        },
        ..SimConfig::default()
    }
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

proptest! {
    #[test]
    fn prop_lossless_round_trip(
        data in proptest::collection::vec(any::<u8>(), 0..3000),
        chunk_size in 1usize..200,
        window_size in 1usize..20,
    ) {
        let report = simulate(&data, b"p", &sim_config(window_size, chunk_size), FaultPlan::new())
            .unwrap();

        prop_assert!(report.result.is_ok());
        let outcome = report.outcome.unwrap();
        prop_assert_eq!(&outcome.payload[..], &data[..]);
        prop_assert!(outcome.digest_matches());
        prop_assert_eq!(
            outcome.total_packets as usize,
            packet_count(data.len(), chunk_size)
        );
        prop_assert_eq!(report.sender_stats.packets_retransmitted, 0);
    }

    #[test]
    fn prop_single_loss_recovers(
        data in proptest::collection::vec(any::<u8>(), 0..2000),
        chunk_size in 1usize..100,
        window_size in 1usize..16,
        drop_index in any::<prop::sample::Index>(),
    ) {
        let total = packet_count(data.len(), chunk_size);
        let drop_seq = drop_index.index(total) as u32;
        let plan = FaultPlan::new().drop_data(drop_seq, 1);
        let report = simulate(&data, b"p", &sim_config(window_size, chunk_size), plan).unwrap();

        prop_assert!(report.result.is_ok());
        prop_assert_eq!(report.dropped, 1);
        prop_assert_eq!(&report.outcome.unwrap().payload[..], &data[..]);
        // One window resent, once
        prop_assert!(report.sender_stats.packets_retransmitted <= window_size as u64);
        prop_assert_eq!(report.sender_stats.go_back_n_rounds, 1);
    }

    #[test]
    fn prop_window_bound_under_loss(
        data in proptest::collection::vec(any::<u8>(), 1..2000),
        chunk_size in 1usize..64,
        window_size in 1usize..12,
        drops in proptest::collection::vec((0u32..200, 1u32..3), 0..6),
        ack_drops in proptest::collection::vec((0u32..200, 1u32..2), 0..3),
        reverse in any::<bool>(),
    ) {
        let mut plan = FaultPlan::new();
        for (seq, times) in drops {
            plan = plan.drop_data(seq, times);
        }
        for (seq, times) in ack_drops {
            plan = plan.drop_ack(seq, times);
        }
        if reverse {
            plan = plan.reverse_batches();
        }

        let report = simulate(&data, b"p", &sim_config(window_size, chunk_size), plan).unwrap();

        prop_assert!(report.max_in_flight <= window_size);
        // The receiver never acknowledges past what it flushed
        let total = packet_count(data.len(), chunk_size) as u32;
        prop_assert!(report.acks.iter().all(|&ack| ack < total));
        if report.result.is_ok() {
            prop_assert_eq!(&report.outcome.unwrap().payload[..], &data[..]);
        }
    }

    #[test]
    fn prop_stale_ack_goes_back_n(
        window_size in 2usize..16,
        windows_acked in 1usize..5,
        behind in 1usize..16,
    ) {
        // Enough packets that the sender never runs out
        let data = vec![7u8; 100 * window_size * 10];
        let config = ArqConfig { window_size, chunk_size: 100, ..ArqConfig::default() };
        let mut sender = Sender::new(1, &data, b"", &config, &RingDigest::default()).unwrap();
        sender.start();

        for w in 1..=windows_acked {
            let ack = (w * window_size - 1) as u32;
            sender.handle(Event::PacketArrived(encode_ack(1, ack))).unwrap();
        }
        let sent = sender.sent();
        prop_assert!(sent - sender.base() <= window_size);

        // Any ack below sent-1 rewinds to just past it
        let stale = (sent - 1).saturating_sub(behind.min(window_size)) as u32;
        prop_assume!((stale as usize) < sent - 1);
        let actions = sender.handle(Event::PacketArrived(encode_ack(1, stale))).unwrap();
        let seqs = transmitted_seqs(&actions);

        prop_assert_eq!(seqs.first().copied(), Some(stale + 1));
        prop_assert_eq!(seqs.len(), window_size);
        prop_assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));
        prop_assert_eq!(sender.sent(), stale as usize + 1 + window_size);
        prop_assert!(sender.in_flight() <= window_size);
    }
}
