//! Router capability interface
//!
//! Every router variant implements [`MessageRouter`]. Routers never touch
//! each other's state: during a tick a router reads its peers through the
//! read-only [`RouterView`] it gets from the [`PeerDirectory`], and on contact
//! it receives a [`ContactSnapshot`] of the peer taken before either side
//! updated anything.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use oppnet_core::{
    Connection, ConnectionId, Message, MessageId, PeerIdentity, SimTime, TransferListener, TtlUnit,
};
use serde::{Deserialize, Serialize};

use crate::active::ActiveRouter;
use crate::error::{RoutingError, RoutingResult};

/// Routing protocol run by a router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    SprayAndWait,
    ProphetSpray,
    UtilitySpray,
}

impl Protocol {
    /// Namespace of the protocol's message properties
    pub fn namespace(&self) -> &'static str {
        match self {
            Protocol::SprayAndWait => "SprayAndWait",
            Protocol::ProphetSpray => "ProphetSpray",
            Protocol::UtilitySpray => "UtilitySpray",
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

/// A proposed transfer, in the order the router wants them tried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub message: MessageId,
    pub connection: ConnectionId,
    /// Copies handed to the receiver
    pub handoff: u32,
}

/// Read-only access to other hosts' routers
pub trait PeerDirectory<I: PeerIdentity> {
    fn router(&self, host: &I) -> Option<&dyn RouterView<I>>;
}

impl<I: PeerIdentity> PeerDirectory<I> for BTreeMap<I, Box<dyn MessageRouter<I>>> {
    fn router(&self, host: &I) -> Option<&dyn RouterView<I>> {
        self.get(host).map(|router| router.as_view())
    }
}

/// What a router sees of the world during one tick
pub struct TickContext<'a, I: PeerIdentity> {
    pub now: SimTime,
    pub ttl_unit: TtlUnit,
    /// Up connections involving this host, in id order
    pub connections: Vec<&'a Connection<I>>,
    pub peers: &'a dyn PeerDirectory<I>,
}

impl<'a, I: PeerIdentity> TickContext<'a, I> {
    /// Connections that can start a transfer now
    pub fn ready_connections(&self) -> impl Iterator<Item = &'a Connection<I>> + '_ {
        self.connections
            .iter()
            .copied()
            .filter(|c| c.is_ready_for_transfer())
    }
}

/// Queries one router answers for its peers
pub trait RouterView<I: PeerIdentity> {
    fn host(&self) -> &I;

    fn protocol(&self) -> Protocol;

    /// Whether the message is in this host's buffer
    fn has_message(&self, id: &MessageId) -> bool;

    /// Whether this host is sending or receiving anything
    fn is_transferring(&self) -> bool;

    /// Predictability towards `destination`, for predictor-based routers
    fn delivery_predictability_towards(&self, _destination: &I, _now: SimTime) -> Option<f64> {
        None
    }

    /// Whole predictability table, for predictor-based routers
    fn delivery_predictabilities(&self, _now: SimTime) -> Vec<(I, f64)> {
        Vec::new()
    }

    /// Utility towards `destination`, for utility-based routers
    fn utility_towards(&self, _destination: &I) -> Option<f64> {
        None
    }
}

/// State of a peer captured when a contact comes up
#[derive(Debug, Clone)]
pub struct ContactSnapshot<I: PeerIdentity> {
    pub host: I,
    pub protocol: Protocol,
    pub predictabilities: Vec<(I, f64)>,
}

impl<I: PeerIdentity> ContactSnapshot<I> {
    pub fn of<V: RouterView<I> + ?Sized>(view: &V, now: SimTime) -> Self {
        Self {
            host: view.host().clone(),
            protocol: view.protocol(),
            predictabilities: view.delivery_predictabilities(now),
        }
    }
}

/// A per-host routing engine
pub trait MessageRouter<I: PeerIdentity>: RouterView<I> + TransferListener<I, Error = RoutingError> {
    fn as_view(&self) -> &dyn RouterView<I>;

    fn active(&self) -> &ActiveRouter<I>;

    fn active_mut(&mut self) -> &mut ActiveRouter<I>;

    /// A connection involving this host came up or went down
    fn changed_connection(
        &mut self,
        _now: SimTime,
        _connection: &Connection<I>,
        _peer: &ContactSnapshot<I>,
    ) -> RoutingResult<()> {
        Ok(())
    }

    /// Propose transfers for this tick, best first
    fn update(&mut self, tick: &TickContext<'_, I>) -> RoutingResult<Vec<TransferRequest>>;

    /// The copy to put on the link for `request`
    fn outgoing(&self, request: &TransferRequest) -> Option<Message<I>>;

    /// A transfer this host was sending completed
    ///
    /// Called while the connection still holds the message.
    fn transfer_done(&mut self, connection: &Connection<I>) -> RoutingResult<()>;

    /// A transfer this host was sending was cut short
    fn transfer_aborted(&mut self, connection: ConnectionId) {
        self.active_mut().transfer_aborted(connection);
    }

    /// Take ownership of a message created at this host
    ///
    /// Returns `false` if the buffer could not take it.
    fn create_new_message(&mut self, message: Message<I>) -> RoutingResult<bool>;

    /// Fresh router with the same configuration for `host`
    fn replicate(&self, host: I) -> Box<dyn MessageRouter<I>>;
}
