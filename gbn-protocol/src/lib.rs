//! Go-Back-N Transfer Protocol Core
//!
//! This crate implements the core of a one-shot reliable transfer over UDP:
//! the datagram codec, the Go-Back-N sliding-window sender, the windowed
//! receiver with its debounce timer, and per-transfer statistics. Both
//! engines are sans-IO state machines driven by [`Event`]s.

pub mod engine;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod stats;

pub use engine::{
    Action, ArqConfig, Engine, Event, TransferError, DEFAULT_WINDOW_SIZE, MAX_RETRANSMITS,
    RETRANSMIT_TIMEOUT, STANDBY_TIMEOUT,
};
pub use packet::{
    packet_count, Ack, HeaderInfo, Packet, PacketError, PacketKind, TransmissionId,
    DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MAX_DATAGRAM_SIZE,
};
pub use receiver::{Receiver, ReceiverOutcome, ReceiverState};
pub use sender::{Sender, SenderState};
pub use stats::TransferStats;
