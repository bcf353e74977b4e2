//! Deterministic network simulator
//!
//! Runs a sender and a receiver back to back on a virtual clock. Datagrams
//! take a fixed latency, timers fire exactly at their deadlines, and a
//! [`FaultPlan`] decides which datagrams the network loses or reorders. Runs
//! are fully reproducible and take no wall-clock time, so recovery paths
//! that depend on timers can be tested precisely.
//!
//! | Fault             | Description                                          |
//! |-------------------|------------------------------------------------------|
//! | Data loss         | Drop the first k transmissions of a sequence number. |
//! | Ack loss          | Drop the first k acknowledgments of a sequence.      |
//! | Batch reordering  | Deliver each burst of datagrams in reverse order.    |

use bytes::Bytes;
use gbn_crypto::RingDigest;
use gbn_protocol::packet::{Ack, Packet, TransmissionId};
use gbn_protocol::{
    Action, ArqConfig, Engine, Event, Receiver, ReceiverOutcome, Sender, TransferError,
    TransferStats,
};
use std::cmp::Reverse;
use std::collections::binary_heap::PeekMut;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::time::Duration;
use thiserror::Error;

/// Simulation errors
#[derive(Error, Debug)]
pub enum SimError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("Simulation stalled at {0:?} with no pending events")]
    Stalled(Duration),

    #[error("Event limit of {0} reached")]
    EventLimit(usize),
}

/// Simulated network settings
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Engine tunables shared by both ends
    pub arq: ArqConfig,
    /// One-way delivery latency
    pub latency: Duration,
    /// Transmission ID used by the sender
    pub transmission_id: TransmissionId,
    /// Abort after this many delivered events
    pub max_events: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            arq: ArqConfig::default(),
            latency: Duration::from_millis(1),
            transmission_id: 1,
            max_events: 1_000_000,
        }
    }
}

/// Which datagrams the network loses or reorders
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    drop_data: HashMap<u32, u32>,
    drop_acks: HashMap<u32, u32>,
    reverse_batches: bool,
}

impl FaultPlan {
    /// A lossless, in-order network
    pub fn new() -> Self {
        FaultPlan::default()
    }

    /// Lose the first `times` transmissions of data packet `seq`
    pub fn drop_data(mut self, seq: u32, times: u32) -> Self {
        *self.drop_data.entry(seq).or_insert(0) += times;
        self
    }

    /// Lose the first `times` acknowledgments carrying `seq`
    pub fn drop_ack(mut self, seq: u32, times: u32) -> Self {
        *self.drop_acks.entry(seq).or_insert(0) += times;
        self
    }

    /// Deliver every burst of datagrams in reverse order
    pub fn reverse_batches(mut self) -> Self {
        self.reverse_batches = true;
        self
    }

    fn take(budget: &mut HashMap<u32, u32>, seq: u32) -> bool {
        match budget.get_mut(&seq) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }
}

/// Everything observed during one simulated transfer
#[derive(Debug)]
pub struct SimReport {
    /// How the sender finished
    pub result: Result<(), SimError>,
    /// Receiver outcome, if it closed
    pub outcome: Option<ReceiverOutcome>,
    /// Sequence numbers transmitted by the sender, in order
    pub transmitted: Vec<u32>,
    /// Acknowledgments emitted by the receiver, in order
    pub acks: Vec<u32>,
    /// Datagrams lost by the fault plan
    pub dropped: usize,
    /// Largest number of unacknowledged packets ever in flight
    pub max_in_flight: usize,
    /// Virtual time the transfer took
    pub elapsed: Duration,
    pub sender_stats: TransferStats,
    pub receiver_stats: TransferStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Endpoint {
    Sender,
    Receiver,
}

impl Endpoint {
    fn index(self) -> usize {
        match self {
            Endpoint::Sender => 0,
            Endpoint::Receiver => 1,
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Delivery {
    at: Duration,
    order: u64,
    to: Endpoint,
    datagram: Bytes,
}

struct Network {
    now: Duration,
    latency: Duration,
    in_transit: BinaryHeap<Reverse<Delivery>>,
    order: u64,
    timers: [Option<Duration>; 2],
    plan: FaultPlan,
    transmitted: Vec<u32>,
    acks: Vec<u32>,
    dropped: usize,
}

impl Network {
    /// Execute `actions` for the engine at `from`, then put its datagrams on the wire
    fn apply(
        &mut self,
        from: Endpoint,
        engine: &mut dyn Engine,
        actions: Vec<Action>,
    ) -> Result<(), TransferError> {
        let mut pending: VecDeque<Action> = actions.into();
        let mut burst = Vec::new();

        while let Some(action) = pending.pop_front() {
            match action {
                Action::Transmit(datagram) => {
                    let len = datagram.len();
                    burst.push(datagram);
                    let follow_up = engine.handle(Event::SendCompleted(Ok(len)))?;
                    for action in follow_up.into_iter().rev() {
                        pending.push_front(action);
                    }
                }
                Action::ArmTimer(after) => self.timers[from.index()] = Some(self.now + after),
                Action::CancelTimer | Action::Close => self.timers[from.index()] = None,
            }
        }

        if self.plan.reverse_batches {
            burst.reverse();
        }
        for datagram in burst {
            self.route(from, datagram);
        }
        Ok(())
    }

    fn route(&mut self, from: Endpoint, datagram: Bytes) {
        let to = match from {
            Endpoint::Sender => {
                let Ok(packet) = Packet::decode(&datagram) else {
                    return;
                };
                self.transmitted.push(packet.seq);
                if FaultPlan::take(&mut self.plan.drop_data, packet.seq) {
                    tracing::debug!("Network lost data packet {}", packet.seq);
                    self.dropped += 1;
                    return;
                }
                Endpoint::Receiver
            }
            Endpoint::Receiver => {
                let Ok(ack) = Ack::decode(&datagram) else {
                    return;
                };
                self.acks.push(ack.seq);
                if FaultPlan::take(&mut self.plan.drop_acks, ack.seq) {
                    tracing::debug!("Network lost acknowledgment {}", ack.seq);
                    self.dropped += 1;
                    return;
                }
                Endpoint::Sender
            }
        };

        self.order += 1;
        self.in_transit.push(Reverse(Delivery {
            at: self.now + self.latency,
            order: self.order,
            to,
            datagram,
        }));
    }

    /// Earliest timer deadline and its owner
    fn next_timer(&self) -> Option<(Duration, Endpoint)> {
        [Endpoint::Sender, Endpoint::Receiver]
            .into_iter()
            .filter_map(|e| self.timers[e.index()].map(|at| (at, e)))
            .min()
    }

    /// Take the next thing to happen, `None` when the network is idle
    ///
    /// Deliveries win ties with timers.
    fn next_event(&mut self) -> Option<(Duration, Endpoint, Event)> {
        let next_timer = self.next_timer();
        match (self.in_transit.peek_mut(), next_timer) {
            (Some(head), Some((t, _))) if head.0.at <= t => Some(arrival(PeekMut::pop(head))),
            (Some(head), None) => Some(arrival(PeekMut::pop(head))),
            (_, Some((t, endpoint))) => {
                self.timers[endpoint.index()] = None;
                Some((t, endpoint, Event::TimerFired))
            }
            (None, None) => None,
        }
    }
}

fn arrival(Reverse(delivery): Reverse<Delivery>) -> (Duration, Endpoint, Event) {
    (
        delivery.at,
        delivery.to,
        Event::PacketArrived(delivery.datagram),
    )
}

/// Transfer `payload` over a simulated network
///
/// Construction errors (invalid configuration) are returned directly;
/// everything that happens during the transfer lands in the report.
pub fn simulate(
    payload: &[u8],
    metadata: &[u8],
    config: &SimConfig,
    plan: FaultPlan,
) -> Result<SimReport, TransferError> {
    let digest = RingDigest::default();
    let mut sender = Sender::new(config.transmission_id, payload, metadata, &config.arq, &digest)?;
    let mut receiver = Receiver::new(&config.arq, Box::new(digest))?;

    let mut net = Network {
        now: Duration::ZERO,
        latency: config.latency,
        in_transit: BinaryHeap::new(),
        order: 0,
        timers: [None, None],
        plan,
        transmitted: Vec::new(),
        acks: Vec::new(),
        dropped: 0,
    };
    let mut max_in_flight = 0;

    let result = drive(&mut net, &mut sender, &mut receiver, config, &mut max_in_flight);
    if let Err(e) = &result {
        tracing::warn!("Simulated transfer failed: {}", e);
    }

    Ok(SimReport {
        result,
        outcome: receiver.outcome().cloned(),
        transmitted: net.transmitted,
        acks: net.acks,
        dropped: net.dropped,
        max_in_flight,
        elapsed: net.now,
        sender_stats: sender.stats().clone(),
        receiver_stats: receiver.stats().clone(),
    })
}

fn drive(
    net: &mut Network,
    sender: &mut Sender,
    receiver: &mut Receiver,
    config: &SimConfig,
    max_in_flight: &mut usize,
) -> Result<(), SimError> {
    let actions = receiver.start();
    net.apply(Endpoint::Receiver, receiver, actions)?;
    let actions = sender.start();
    net.apply(Endpoint::Sender, sender, actions)?;
    *max_in_flight = sender.in_flight();

    let mut events = 0;
    while !sender.is_finished() {
        if events >= config.max_events {
            return Err(SimError::EventLimit(config.max_events));
        }
        events += 1;

        let Some((at, to, event)) = net.next_event() else {
            return Err(SimError::Stalled(net.now));
        };
        net.now = at;

        match to {
            Endpoint::Sender => {
                let actions = sender.handle(event)?;
                net.apply(Endpoint::Sender, sender, actions)?;
                *max_in_flight = (*max_in_flight).max(sender.in_flight());
            }
            Endpoint::Receiver => {
                let actions = receiver.handle(event)?;
                net.apply(Endpoint::Receiver, receiver, actions)?;
            }
        }
    }
    Ok(())
}
