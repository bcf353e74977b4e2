//! End-to-end transfer scenarios on the simulated network
//!
//! Each test runs a real sender and receiver back to back on a virtual
//! clock, so timer-driven recovery is exact and fast.

use gbn::sim::{simulate, FaultPlan, SimConfig, SimError};
use gbn_protocol::{ArqConfig, TransferError};
use gbn_tests::payload;
use std::time::Duration;

const MIB: usize = 1024 * 1024;

#[test]
fn test_one_mib_lossless() {
    let data = payload(MIB);
    let report = simulate(&data, b"big.bin", &SimConfig::default(), FaultPlan::new()).unwrap();

    assert!(report.result.is_ok());
    let outcome = report.outcome.unwrap();
    assert_eq!(outcome.total_packets, 2100);
    assert_eq!(report.receiver_stats.packets_received, 2100);
    assert_eq!(&outcome.payload[..], &data[..]);
    assert!(outcome.digest_matches());
    assert_eq!(outcome.file_name(), Some("big.bin"));

    assert_eq!(report.transmitted.len(), 2100);
    assert_eq!(report.sender_stats.packets_retransmitted, 0);
    assert_eq!(report.max_in_flight, 10);
    // 2100 packets fill exactly 210 windows of 10
    assert_eq!(report.acks.len(), 210);
    assert_eq!(report.acks.last(), Some(&2099));
}

#[test]
fn test_one_mib_with_packet_fifty_lost() {
    let data = payload(MIB);
    let report = simulate(
        &data,
        b"big.bin",
        &SimConfig::default(),
        FaultPlan::new().drop_data(50, 1),
    )
    .unwrap();

    assert!(report.result.is_ok());
    assert_eq!(report.dropped, 1);

    // Receiver times out on the incomplete window and repeats ack 49
    assert_eq!(&report.acks[..7], &[9, 19, 29, 39, 49, 49, 59]);
    assert_eq!(report.receiver_stats.duplicate_acks, 1);

    // Sender goes back to 50 and resends the whole window
    let expected: Vec<u32> = (0..60).chain(50..60).chain(60..70).collect();
    assert_eq!(&report.transmitted[..80], &expected[..]);
    assert_eq!(report.sender_stats.go_back_n_rounds, 1);
    assert_eq!(report.sender_stats.packets_retransmitted, 10);

    let outcome = report.outcome.unwrap();
    assert_eq!(&outcome.payload[..], &data[..]);
    assert!(outcome.digest_matches());
}

#[test]
fn test_partial_final_window() {
    // 23 chunks: 25 packets, windows of 10, 10 and 5
    let data = payload(23 * 100);
    let config = SimConfig {
        arq: ArqConfig {
            chunk_size: 100,
            ..ArqConfig::default()
        },
        ..SimConfig::default()
    };
    let report = simulate(&data, b"", &config, FaultPlan::new()).unwrap();

    assert!(report.result.is_ok());
    assert_eq!(report.acks, vec![9, 19, 24]);
    let outcome = report.outcome.unwrap();
    assert_eq!(&outcome.payload[..], &data[..]);
    assert_eq!(outcome.file_name(), None);
}

#[test]
fn test_empty_payload() {
    let report = simulate(b"", b"empty", &SimConfig::default(), FaultPlan::new()).unwrap();

    assert!(report.result.is_ok());
    assert_eq!(report.transmitted, vec![0, 1]);
    assert_eq!(report.acks, vec![1]);
    let outcome = report.outcome.unwrap();
    assert!(outcome.payload.is_empty());
    assert!(outcome.digest_matches());
}

#[test]
fn test_lost_ack_recovered() {
    let data = payload(5000);
    let report = simulate(
        &data,
        b"f",
        &SimConfig::default(),
        FaultPlan::new().drop_ack(9, 1),
    )
    .unwrap();

    assert!(report.result.is_ok());
    // Retransmit timer resends the first window, the receiver discards it
    // and repeats its last ack once its own timer fires
    assert_eq!(report.acks, vec![9, 9, 11]);
    assert!(report.elapsed >= Duration::from_millis(1000));
    assert_eq!(&report.outcome.unwrap().payload[..], &data[..]);
}

#[test]
fn test_lost_first_window_header() {
    let data = payload(5000);
    let report = simulate(
        &data,
        b"f",
        &SimConfig::default(),
        FaultPlan::new().drop_data(0, 1),
    )
    .unwrap();

    assert!(report.result.is_ok());
    // Nothing flushed yet, so only the sender's retransmit timer can help
    assert_eq!(report.receiver_stats.duplicate_acks, 0);
    assert_eq!(report.sender_stats.timer_fires, 1);
    assert_eq!(&report.outcome.unwrap().payload[..], &data[..]);
}

#[test]
fn test_reordered_windows() {
    let data = payload(MIB / 8);
    let report = simulate(
        &data,
        b"f",
        &SimConfig::default(),
        FaultPlan::new().reverse_batches(),
    )
    .unwrap();

    assert!(report.result.is_ok());
    assert_eq!(report.sender_stats.packets_retransmitted, 0);
    assert_eq!(&report.outcome.unwrap().payload[..], &data[..]);
}

#[test]
fn test_retry_limit_aborts() {
    let config = SimConfig {
        arq: ArqConfig {
            max_retransmits: 4,
            ..ArqConfig::default()
        },
        ..SimConfig::default()
    };
    let report = simulate(
        &payload(5000),
        b"f",
        &config,
        FaultPlan::new().drop_data(0, u32::MAX),
    )
    .unwrap();

    match report.result {
        Err(SimError::Transfer(TransferError::RetryLimitExceeded { attempts, max })) => {
            assert_eq!(max, 4);
            assert_eq!(attempts, 5);
        }
        other => panic!("expected retry limit, got {:?}", other),
    }
    assert!(report.outcome.is_none());
    assert_eq!(report.sender_stats.timer_fires, 5);
}

#[test]
fn test_window_of_one() {
    let data = payload(1234);
    let config = SimConfig {
        arq: ArqConfig {
            window_size: 1,
            chunk_size: 100,
            ..ArqConfig::default()
        },
        ..SimConfig::default()
    };
    let report = simulate(&data, b"f", &config, FaultPlan::new().drop_data(7, 1)).unwrap();

    assert!(report.result.is_ok());
    assert_eq!(report.max_in_flight, 1);
    assert_eq!(&report.outcome.unwrap().payload[..], &data[..]);
}
