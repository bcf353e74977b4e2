//! GBN I/O and Platform Abstraction
//!
//! This crate provides the datagram transports the engines run over: a
//! blocking UDP socket wrapper, an in-memory transport pair for tests, and
//! the one-shot timer the event loop uses for engine deadlines.

pub mod memory;
pub mod socket;
pub mod time;

pub use memory::{DropFilter, MemoryTransport};
pub use socket::{GbnSocket, SocketError};
pub use time::Timer;

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Unreliable datagram transport
///
/// Sends may be lost, duplicated or reordered. Reliability is the engines'
/// job.
pub trait Transport: Send {
    /// Send one datagram to `target`
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Wait up to `timeout` for one datagram
    ///
    /// `None` waits indefinitely. Returns `Ok(None)` when the wait expires.
    fn recv_timeout(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> io::Result<Option<(usize, SocketAddr)>>;

    /// Local address datagrams are received on
    fn local_addr(&self) -> io::Result<SocketAddr>;
}
