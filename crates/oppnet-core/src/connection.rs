//! Point-to-point transfer links
//!
//! A [`Connection`] exists for the duration of one contact between two
//! hosts and carries at most one message at a time.
//!
//! ```text
//! Down <-- set_up_state(false) -- Up-Idle <--> Up-Transferring
//!                                  start_transfer / finalize or abort
//! ```
//!
//! How fast bytes move is decided by the [`LinkModel`]: a constant bit-rate
//! link fixes the completion time when the transfer starts, a variable
//! bit-rate link accumulates sent bytes on every [`Connection::update`].

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::clock::{Clock, SimTime};
use crate::context::SimContext;
use crate::error::TransferError;
use crate::identity::PeerIdentity;
use crate::message::{Message, MessageId};

/// Identifier of a connection within a network
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[display("c{_0}")]
pub struct ConnectionId(pub u64);

/// Network interface of a host
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[display("if{_0}")]
pub struct InterfaceId(pub u16);

/// One side of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint<I> {
    pub host: I,
    pub interface: InterfaceId,
}

impl<I> Endpoint<I> {
    pub fn new(host: I, interface: InterfaceId) -> Self {
        Self { host, interface }
    }
}

/// Outcome of offering a message to a receiving host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferCode {
    /// Accepted, transfer starts
    Ok,
    /// Receiver is busy, retry later
    TryLaterBusy,
    /// Receiver already has (or had) the message
    DeniedOld,
    /// Receiver has no room for the message
    DeniedNoSpace,
    /// Message has expired
    DeniedTtl,
    /// Refused by receiver policy
    DeniedPolicy,
    DeniedUnspecified,
}

impl TransferCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, TransferCode::Ok)
    }

    /// Whether the refusal will hold for the rest of this contact
    pub fn is_denied(&self) -> bool {
        !matches!(self, TransferCode::Ok | TransferCode::TryLaterBusy)
    }
}

/// A message handed over by a completed transfer
#[derive(Debug, Clone)]
pub struct Received<I: PeerIdentity> {
    pub message: Message<I>,
    /// The receiving host is the message's destination
    pub is_final_recipient: bool,
    /// First time this message reached its destination
    pub is_first_delivery: bool,
}

/// Receiving side of a transfer link
///
/// Implemented by routers. The link calls [`receive_message`] when a transfer
/// is proposed and exactly one of [`message_transferred`] or
/// [`message_aborted`] once the transfer ends.
///
/// [`receive_message`]: TransferListener::receive_message
/// [`message_transferred`]: TransferListener::message_transferred
/// [`message_aborted`]: TransferListener::message_aborted
pub trait TransferListener<I: PeerIdentity> {
    type Error;

    /// Decide whether to accept `message` from `from`
    fn receive_message(&mut self, ctx: &SimContext, message: Message<I>, from: &I) -> TransferCode;

    /// All bytes of `id` have arrived
    fn message_transferred(
        &mut self,
        ctx: &mut SimContext,
        id: &MessageId,
        from: &I,
    ) -> Result<Received<I>, Self::Error>;

    /// The transfer of `id` was cut short with `bytes_remaining` unsent
    fn message_aborted(&mut self, id: &MessageId, from: &I, bytes_remaining: u64);
}

/// Transport model of a link
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum LinkModel {
    /// Fixed speed in bytes per second
    ConstantBitRate { speed: f64 },
    /// Speed may vary; progress accumulates on each update
    VariableBitRate { speed: f64 },
}

impl LinkModel {
    /// Current speed in bytes per second
    pub fn speed(&self) -> f64 {
        match self {
            LinkModel::ConstantBitRate { speed } | LinkModel::VariableBitRate { speed } => *speed,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Progress {
    DoneAt(SimTime),
    Sent { bytes: f64, last_update: SimTime },
}

#[derive(Debug, Clone)]
struct InFlight<I: PeerIdentity> {
    message: Message<I>,
    source: I,
    progress: Progress,
}

/// A link between two hosts for the duration of a contact
#[derive(Debug, Clone)]
pub struct Connection<I: PeerIdentity> {
    id: ConnectionId,
    initiator: Endpoint<I>,
    peer: Endpoint<I>,
    link: LinkModel,
    up: bool,
    in_flight: Option<InFlight<I>>,
    bytes_transferred: u64,
}

impl<I: PeerIdentity> Connection<I> {
    /// Create a connection; new connections are up
    pub fn new(id: ConnectionId, initiator: Endpoint<I>, peer: Endpoint<I>, link: LinkModel) -> Self {
        Self {
            id,
            initiator,
            peer,
            link,
            up: true,
            in_flight: None,
            bytes_transferred: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn initiator(&self) -> &Endpoint<I> {
        &self.initiator
    }

    pub fn peer(&self) -> &Endpoint<I> {
        &self.peer
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn set_up_state(&mut self, up: bool) {
        self.up = up;
    }

    pub fn is_transferring(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Up and idle
    pub fn is_ready_for_transfer(&self) -> bool {
        self.up && self.in_flight.is_none()
    }

    pub fn is_initiator(&self, host: &I) -> bool {
        self.initiator.host == *host
    }

    /// Whether `host` is one of the two ends
    pub fn involves(&self, host: &I) -> bool {
        self.initiator.host == *host || self.peer.host == *host
    }

    /// The host at the other end from `host`
    pub fn other_host(&self, host: &I) -> &I {
        if self.initiator.host == *host {
            &self.peer.host
        } else {
            &self.initiator.host
        }
    }

    /// The interface at the other end from `interface`
    pub fn other_interface(&self, interface: InterfaceId) -> InterfaceId {
        if self.initiator.interface == interface {
            self.peer.interface
        } else {
            self.initiator.interface
        }
    }

    /// The message in flight
    pub fn message(&self) -> Option<&Message<I>> {
        self.in_flight.as_ref().map(|f| &f.message)
    }

    /// The host sending the message in flight
    pub fn message_source(&self) -> Option<&I> {
        self.in_flight.as_ref().map(|f| &f.source)
    }

    /// The host receiving the message in flight
    pub fn message_destination(&self) -> Option<&I> {
        self.message_source().map(|source| self.other_host(source))
    }

    /// Link speed in bytes per second
    pub fn speed(&self) -> f64 {
        self.link.speed()
    }

    /// Offer `message` from `from` to the receiving end
    ///
    /// The receiver gets a fresh replica. Returns `TryLaterBusy` without
    /// asking the receiver when the link is not ready.
    pub fn start_transfer<L>(
        &mut self,
        ctx: &mut SimContext,
        from: &I,
        message: &Message<I>,
        receiver: &mut L,
    ) -> TransferCode
    where
        L: TransferListener<I> + ?Sized,
    {
        if !self.is_ready_for_transfer() {
            return TransferCode::TryLaterBusy;
        }

        let copy = message.replicate(ctx);
        let code = receiver.receive_message(ctx, copy.clone(), from);
        if code.is_ok() {
            let now = ctx.now();
            let progress = match self.link {
                LinkModel::ConstantBitRate { speed } => Progress::DoneAt(now + copy.size() as f64 / speed),
                LinkModel::VariableBitRate { .. } => Progress::Sent {
                    bytes: 0.0,
                    last_update: now,
                },
            };
            trace!(connection = %self.id, message = %copy.id(), from = %from, "transfer started");
            self.in_flight = Some(InFlight {
                message: copy,
                source: from.clone(),
                progress,
            });
        }
        code
    }

    /// Advance link-model progress to `now`
    pub fn update(&mut self, now: SimTime) {
        let speed = self.link.speed();
        if let Some(InFlight {
            progress: Progress::Sent { bytes, last_update },
            ..
        }) = &mut self.in_flight
        {
            let elapsed = now.since(*last_update).max(0.0);
            *bytes += speed * elapsed;
            *last_update = now;
        }
    }

    /// Bytes of the in-flight message still to send, 0 if idle
    pub fn remaining_byte_count(&self, now: SimTime) -> u64 {
        let Some(flight) = &self.in_flight else {
            return 0;
        };
        match flight.progress {
            Progress::DoneAt(done) => (done.since(now) * self.link.speed()).max(0.0) as u64,
            Progress::Sent { bytes, .. } => (flight.message.size() as f64 - bytes).max(0.0) as u64,
        }
    }

    /// Whether every byte of the in-flight message has been sent
    pub fn is_message_transferred(&self, now: SimTime) -> bool {
        self.in_flight.is_some() && self.remaining_byte_count(now) == 0
    }

    /// Cut the in-flight transfer short, returning the unsent byte count
    pub fn abort_transfer<L>(&mut self, now: SimTime, receiver: &mut L) -> Result<u64, TransferError>
    where
        L: TransferListener<I> + ?Sized,
    {
        let remaining = self.remaining_byte_count(now);
        let flight = self
            .in_flight
            .take()
            .ok_or(TransferError::NothingInFlight(self.id))?;

        let size = flight.message.size();
        self.bytes_transferred += size - remaining.min(size);
        receiver.message_aborted(flight.message.id(), &flight.source, remaining);
        trace!(connection = %self.id, message = %flight.message.id(), remaining, "transfer aborted");
        Ok(remaining)
    }

    /// Complete the in-flight transfer and hand the message to the receiver
    pub fn finalize_transfer<L>(
        &mut self,
        ctx: &mut SimContext,
        receiver: &mut L,
    ) -> Result<Received<I>, L::Error>
    where
        L: TransferListener<I> + ?Sized,
        L::Error: From<TransferError>,
    {
        let flight = self
            .in_flight
            .take()
            .ok_or(TransferError::NothingInFlight(self.id))?;

        self.bytes_transferred += flight.message.size();
        receiver.message_transferred(ctx, flight.message.id(), &flight.source)
    }

    /// All bytes moved over this link, including the in-flight transfer
    pub fn total_bytes_transferred(&self, now: SimTime) -> u64 {
        match &self.in_flight {
            None => self.bytes_transferred,
            Some(flight) => {
                let size = flight.message.size();
                if self.is_message_transferred(now) {
                    self.bytes_transferred + size
                } else {
                    self.bytes_transferred + size - self.remaining_byte_count(now).min(size)
                }
            }
        }
    }
}

impl<I: PeerIdentity> Display for Connection<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}<->{} ({} kBps) is {}",
            self.initiator.host,
            self.peer.host,
            self.speed() / 1000.0,
            if self.up { "up" } else { "down" }
        )?;
        if let Some(flight) = &self.in_flight {
            write!(f, " transferring {} from {}", flight.message, flight.source)?;
        }
        Ok(())
    }
}
