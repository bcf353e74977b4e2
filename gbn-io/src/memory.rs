//! In-memory datagram transport
//!
//! A connected pair of endpoints backed by crossbeam channels. Each endpoint
//! can carry a drop filter that decides, per outgoing datagram, whether the
//! "network" loses it. Used to exercise loss recovery deterministically.

use crate::Transport;
use bytes::Bytes;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Decides whether an outgoing datagram is lost (`true` drops it)
pub type DropFilter = Box<dyn FnMut(&[u8]) -> bool + Send>;

type Datagram = (Bytes, SocketAddr);

/// One end of an in-memory datagram link
pub struct MemoryTransport {
    local: SocketAddr,
    peer: SocketAddr,
    tx: Sender<Datagram>,
    rx: Receiver<Datagram>,
    filter: Mutex<Option<DropFilter>>,
    dropped: Arc<AtomicU64>,
}

impl MemoryTransport {
    /// Create a connected pair of endpoints with the given addresses
    pub fn pair(a: SocketAddr, b: SocketAddr) -> (Self, Self) {
        let (a_tx, b_rx) = channel::unbounded();
        let (b_tx, a_rx) = channel::unbounded();

        let left = MemoryTransport {
            local: a,
            peer: b,
            tx: a_tx,
            rx: a_rx,
            filter: Mutex::new(None),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        let right = MemoryTransport {
            local: b,
            peer: a,
            tx: b_tx,
            rx: b_rx,
            filter: Mutex::new(None),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (left, right)
    }

    /// Install a filter for datagrams sent from this endpoint
    pub fn set_drop_filter<F>(&self, filter: F)
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        *self.filter.lock() = Some(Box::new(filter));
    }

    /// Remove the drop filter
    pub fn clear_drop_filter(&self) {
        *self.filter.lock() = None;
    }

    /// Datagrams lost by the filter so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Shared handle to the drop counter
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

impl Transport for MemoryTransport {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        if target != self.peer {
            // Nobody listens there; a datagram socket would not notice either
            tracing::trace!("Discarding datagram for unknown address {}", target);
            return Ok(buf.len());
        }

        if let Some(filter) = self.filter.lock().as_mut() {
            if filter(buf) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Dropping {} byte datagram to {}", buf.len(), target);
                return Ok(buf.len());
            }
        }

        // A vanished peer is indistinguishable from loss
        let _ = self.tx.send((Bytes::copy_from_slice(buf), self.local));
        Ok(buf.len())
    }

    fn recv_timeout(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        let received = match timeout {
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(datagram) => Some(datagram),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => {
                    // Peer gone: behave like a quiet network until the deadline
                    std::thread::sleep(timeout);
                    None
                }
            },
            None => match self.rx.recv() {
                Ok(datagram) => Some(datagram),
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "memory transport peer dropped",
                    ))
                }
            },
        };

        Ok(received.map(|(bytes, from)| {
            let n = bytes.len().min(buf.len());
            buf[..n].copy_from_slice(&bytes[..n]);
            (n, from)
        }))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }
}

impl MemoryTransport {
    /// Datagrams waiting to be received
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Take the next waiting datagram without blocking
    pub fn try_recv(&self) -> Option<(Bytes, SocketAddr)> {
        match self.rx.try_recv() {
            Ok(datagram) => Some(datagram),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs() -> (SocketAddr, SocketAddr) {
        (
            "127.0.0.1:8001".parse().unwrap(),
            "127.0.0.1:8000".parse().unwrap(),
        )
    }

    #[test]
    fn test_pair_delivers_both_ways() {
        let (a_addr, b_addr) = addrs();
        let (a, b) = MemoryTransport::pair(a_addr, b_addr);

        a.send_to(b"ping", b_addr).unwrap();
        b.send_to(b"pong", a_addr).unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = b.recv_timeout(&mut buf, Some(Duration::from_millis(100))).unwrap().unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, a_addr);

        let (n, from) = a.recv_timeout(&mut buf, None).unwrap().unwrap();
        assert_eq!(&buf[..n], b"pong");
        assert_eq!(from, b_addr);
    }

    #[test]
    fn test_recv_times_out() {
        let (a_addr, b_addr) = addrs();
        let (_a, b) = MemoryTransport::pair(a_addr, b_addr);

        let mut buf = [0u8; 16];
        assert!(b.recv_timeout(&mut buf, Some(Duration::from_millis(10))).unwrap().is_none());
    }

    #[test]
    fn test_drop_filter() {
        let (a_addr, b_addr) = addrs();
        let (a, b) = MemoryTransport::pair(a_addr, b_addr);

        let mut first = true;
        a.set_drop_filter(move |_| std::mem::replace(&mut first, false));

        a.send_to(b"lost", b_addr).unwrap();
        a.send_to(b"kept", b_addr).unwrap();
        assert_eq!(a.dropped(), 1);
        assert_eq!(b.pending(), 1);
        assert_eq!(&b.try_recv().unwrap().0[..], b"kept");

        a.clear_drop_filter();
        a.send_to(b"again", b_addr).unwrap();
        assert_eq!(b.pending(), 1);
    }

    #[test]
    fn test_send_to_dropped_peer_succeeds() {
        let (a_addr, b_addr) = addrs();
        let (a, b) = MemoryTransport::pair(a_addr, b_addr);
        drop(b);

        assert_eq!(a.send_to(b"anyone?", b_addr).unwrap(), 7);
        let mut buf = [0u8; 16];
        assert!(a.recv_timeout(&mut buf, None).is_err());
    }
}
