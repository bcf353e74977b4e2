//! Event loop
//!
//! Runs one engine over one transport until the engine closes. The loop
//! blocks on the transport for at most the time left on the engine timer,
//! turns what happens into events, and executes the returned actions in
//! order. A `Transmit` is completed before the next action runs, so a
//! `Close` queued behind a final acknowledgment only takes effect once that
//! acknowledgment has been handed to the transport.

use bytes::Bytes;
use gbn_io::{Timer, Transport};
use gbn_protocol::{Action, Engine, Event, TransferError, TransferStats, MAX_DATAGRAM_SIZE};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Event loop errors
#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("Transport receive failed: {0}")]
    Io(#[from] io::Error),

    #[error("No traffic for {0:?}")]
    IdleTimeout(Duration),
}

/// Event loop settings
#[derive(Debug, Clone, Default)]
pub struct DriverConfig {
    /// Give up after this long without a datagram while no timer is armed
    pub idle_timeout: Option<Duration>,
    /// How often the progress observer is called
    pub progress_interval: Option<Duration>,
}

/// Run `engine` over `transport`, exchanging datagrams with `peer`
pub fn run<E, T>(
    engine: &mut E,
    transport: &T,
    peer: SocketAddr,
    config: &DriverConfig,
) -> Result<(), DriverError>
where
    E: Engine + ?Sized,
    T: Transport + ?Sized,
{
    run_with_progress(engine, transport, peer, config, |_| {})
}

/// Like [`run`], calling `progress` every `config.progress_interval`
pub fn run_with_progress<E, T, F>(
    engine: &mut E,
    transport: &T,
    peer: SocketAddr,
    config: &DriverConfig,
    mut progress: F,
) -> Result<(), DriverError>
where
    E: Engine + ?Sized,
    T: Transport + ?Sized,
    F: FnMut(&TransferStats),
{
    let mut timer = Timer::new();
    let mut report = Timer::new();
    if let Some(interval) = config.progress_interval {
        report.arm(interval);
    }
    let mut last_traffic = Instant::now();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut pending: VecDeque<Action> = engine.start().into();

    loop {
        while let Some(action) = pending.pop_front() {
            match action {
                Action::Transmit(bytes) => {
                    let result = transport.send_to(&bytes, peer);
                    if let Ok(n) = &result {
                        tracing::trace!("Sent {} bytes to {}", n, peer);
                    }
                    let follow_up = engine.handle(Event::SendCompleted(result))?;
                    for action in follow_up.into_iter().rev() {
                        pending.push_front(action);
                    }
                }
                Action::ArmTimer(after) => timer.arm(after),
                Action::CancelTimer => timer.cancel(),
                Action::Close => {
                    tracing::debug!("Engine closed");
                    progress(engine.stats());
                    return Ok(());
                }
            }
        }

        if engine.is_finished() {
            progress(engine.stats());
            return Ok(());
        }

        if report.try_fire() {
            progress(engine.stats());
            if let Some(interval) = config.progress_interval {
                report.arm(interval);
            }
        }

        if timer.try_fire() {
            pending.extend(engine.handle(Event::TimerFired)?);
            continue;
        }

        if !timer.is_armed() {
            if let Some(idle) = config.idle_timeout {
                if last_traffic.elapsed() >= idle {
                    tracing::warn!("No traffic for {:?}, giving up", idle);
                    return Err(DriverError::IdleTimeout(idle));
                }
            }
        }

        let idle_left = config
            .idle_timeout
            .map(|idle| idle.saturating_sub(last_traffic.elapsed()));
        let wait = [timer.remaining(), report.remaining(), idle_left]
            .into_iter()
            .flatten()
            .min();

        if let Some((n, from)) = transport.recv_timeout(&mut buf, wait)? {
            tracing::trace!("Received {} bytes from {}", n, from);
            last_traffic = Instant::now();
            let datagram = Bytes::copy_from_slice(&buf[..n]);
            pending.extend(engine.handle(Event::PacketArrived(datagram))?);
        }
    }
}
