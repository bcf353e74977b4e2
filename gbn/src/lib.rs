//! GBN - Go-Back-N file transfer over UDP
//!
//! High-level API: the event loop that runs an engine over a transport, and
//! a deterministic virtual-time simulator for exercising loss recovery.

pub use gbn_crypto as crypto;
pub use gbn_io as io;
pub use gbn_protocol as protocol;

pub mod driver;
pub mod sim;

pub use driver::{run, run_with_progress, DriverConfig, DriverError};
pub use sim::{simulate, FaultPlan, SimConfig, SimError, SimReport};

// Re-export commonly used types
pub use protocol::{
    Action, ArqConfig, Engine, Event, Receiver, ReceiverOutcome, Sender, TransferError,
    TransferStats,
};
