//! Network orchestration
//!
//! [`Network`] owns the run's [`SimContext`], one router per host and the
//! table of live connections. It is the only place where two routers meet:
//! contacts are announced to both ends with a snapshot of the other side,
//! and each tick it finalizes finished transfers before letting every host
//! propose new ones.
//!
//! Tick order:
//!
//! 1. Advance the clock and the link models
//! 2. Finalize completed transfers (sender settles first, then receiver files)
//! 3. Drop expired messages
//! 4. Run each host's update in host order, starting at most one transfer

use std::collections::BTreeMap;

use oppnet_core::{
    Clock, Connection, ConnectionId, Endpoint, InterfaceId, LinkModel, Message, MessageId, PeerIdentity,
    SimContext, SimTime, TransferCode,
};
use serde::Serialize;
use tracing::{debug, info, instrument, trace};

use crate::error::{ConfigError, RoutingError, RoutingResult};
use crate::router::{ContactSnapshot, MessageRouter, TickContext};
use crate::{ConfigWarning, RoutingConfig};

/// Something observable that happened in the network
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NetworkEvent<I: PeerIdentity> {
    ContactUp {
        time: SimTime,
        connection: ConnectionId,
        a: I,
        b: I,
    },
    ContactDown {
        time: SimTime,
        connection: ConnectionId,
        a: I,
        b: I,
    },
    Created {
        time: SimTime,
        message: MessageId,
        from: I,
        to: I,
        size: u64,
    },
    TransferStarted {
        time: SimTime,
        message: MessageId,
        from: I,
        to: I,
        connection: ConnectionId,
    },
    TransferAborted {
        time: SimTime,
        message: MessageId,
        from: I,
        to: I,
        bytes_remaining: u64,
    },
    Relayed {
        time: SimTime,
        message: MessageId,
        from: I,
        to: I,
        size: u64,
        final_recipient: bool,
        first_delivery: bool,
        hop_count: usize,
        created_at: SimTime,
    },
    Dropped {
        time: SimTime,
        message: MessageId,
        host: I,
        expired: bool,
    },
}

/// Hosts, their routers and the connections between them
pub struct Network<I: PeerIdentity> {
    config: RoutingConfig,
    ctx: SimContext,
    routers: BTreeMap<I, Box<dyn MessageRouter<I>>>,
    connections: BTreeMap<ConnectionId, Connection<I>>,
    next_connection: u64,
    events: Vec<NetworkEvent<I>>,
}

fn router_mut<'a, I: PeerIdentity>(
    routers: &'a mut BTreeMap<I, Box<dyn MessageRouter<I>>>,
    host: &I,
) -> RoutingResult<&'a mut Box<dyn MessageRouter<I>>> {
    routers
        .get_mut(host)
        .ok_or_else(|| RoutingError::UnknownHost(host.to_string()))
}

impl<I: PeerIdentity> Network<I> {
    /// Empty network; fails on a configuration routers cannot run with
    pub fn new(config: RoutingConfig) -> Result<Self, ConfigError> {
        let warnings = config.validate();
        if let Some(fatal) = warnings.iter().copied().find(ConfigWarning::is_fatal) {
            return Err(ConfigError::Rejected(fatal));
        }
        for warning in warnings {
            debug!(%warning, "routing configuration warning");
        }

        Ok(Self {
            ctx: SimContext::new(config.ttl_unit),
            config,
            routers: BTreeMap::new(),
            connections: BTreeMap::new(),
            next_connection: 0,
            events: Vec::new(),
        })
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn context(&self) -> &SimContext {
        &self.ctx
    }

    pub fn now(&self) -> SimTime {
        self.ctx.now()
    }

    /// Add a host running the configured router
    pub fn add_host(&mut self, host: I) -> RoutingResult<()> {
        if self.routers.contains_key(&host) {
            return Err(RoutingError::DuplicateHost(host.to_string()));
        }
        let router = self.config.build(host.clone())?;
        trace!(host = %host, protocol = %router.protocol(), "host added");
        self.routers.insert(host, router);
        Ok(())
    }

    pub fn add_hosts(&mut self, hosts: impl IntoIterator<Item = I>) -> RoutingResult<()> {
        hosts.into_iter().try_for_each(|host| self.add_host(host))
    }

    /// Add a host with a router built elsewhere
    pub fn add_router(&mut self, router: Box<dyn MessageRouter<I>>) -> RoutingResult<()> {
        let host = router.host().clone();
        if self.routers.contains_key(&host) {
            return Err(RoutingError::DuplicateHost(host.to_string()));
        }
        self.routers.insert(host, router);
        Ok(())
    }

    pub fn hosts(&self) -> impl Iterator<Item = &I> {
        self.routers.keys()
    }

    pub fn router(&self, host: &I) -> Option<&dyn MessageRouter<I>> {
        self.routers.get(host).map(|router| &**router)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection<I>> {
        self.connections.get(&id)
    }

    /// Live connections in id order
    pub fn connections(&self) -> impl Iterator<Item = &Connection<I>> {
        self.connections.values()
    }

    /// Events since the last drain
    pub fn drain_events(&mut self) -> Vec<NetworkEvent<I>> {
        std::mem::take(&mut self.events)
    }

    /// Bring up a contact between `a` and `b`
    ///
    /// Both routers learn about the contact with a snapshot of the other side
    /// taken before either updated its state. A host cannot meet itself, and
    /// the link must move a positive, finite number of bytes per second.
    #[instrument(skip(self, a, b, link), fields(a = %a, b = %b))]
    pub fn connect(&mut self, a: &I, b: &I, link: LinkModel) -> RoutingResult<ConnectionId> {
        if a == b {
            return Err(RoutingError::SelfContact(a.to_string()));
        }
        let speed = link.speed();
        if !speed.is_finite() || speed <= 0.0 {
            return Err(RoutingError::InvalidLinkSpeed(speed));
        }
        let now = self.ctx.now();
        let snapshot_a = self.snapshot(a, now)?;
        let snapshot_b = self.snapshot(b, now)?;

        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;
        let connection = Connection::new(
            id,
            Endpoint::new(a.clone(), InterfaceId(0)),
            Endpoint::new(b.clone(), InterfaceId(0)),
            link,
        );

        router_mut(&mut self.routers, a)?.changed_connection(now, &connection, &snapshot_b)?;
        router_mut(&mut self.routers, b)?.changed_connection(now, &connection, &snapshot_a)?;
        self.connections.insert(id, connection);

        debug!(connection = %id, "contact up");
        self.events.push(NetworkEvent::ContactUp {
            time: now,
            connection: id,
            a: a.clone(),
            b: b.clone(),
        });
        Ok(id)
    }

    /// Tear down a contact, aborting its transfer if one is running
    #[instrument(skip(self, id), fields(connection = %id))]
    pub fn disconnect(&mut self, id: ConnectionId) -> RoutingResult<()> {
        let now = self.ctx.now();
        self.abort_in_flight(id)?;

        let mut connection = self
            .connections
            .remove(&id)
            .ok_or(RoutingError::UnknownConnection(id))?;
        connection.set_up_state(false);

        let a = connection.initiator().host.clone();
        let b = connection.peer().host.clone();
        let snapshot_a = self.snapshot(&a, now)?;
        let snapshot_b = self.snapshot(&b, now)?;
        router_mut(&mut self.routers, &a)?.changed_connection(now, &connection, &snapshot_b)?;
        router_mut(&mut self.routers, &b)?.changed_connection(now, &connection, &snapshot_a)?;

        debug!("contact down");
        self.events.push(NetworkEvent::ContactDown {
            time: now,
            connection: id,
            a,
            b,
        });
        Ok(())
    }

    /// The live connection between `a` and `b`, if any
    pub fn connection_between(&self, a: &I, b: &I) -> Option<ConnectionId> {
        self.connections
            .values()
            .find(|c| c.involves(a) && c.involves(b))
            .map(|c| c.id())
    }

    /// Create a message at `from`
    ///
    /// Returns `false` if the origin had no room for it.
    pub fn create_message(
        &mut self,
        from: &I,
        to: &I,
        id: impl Into<MessageId>,
        size: u64,
        response_size: u64,
    ) -> RoutingResult<bool> {
        let mut message = Message::new(&mut self.ctx, from.clone(), to.clone(), id, size);
        message.set_response_size(response_size);
        let id = message.id().clone();

        let created = router_mut(&mut self.routers, from)?.create_new_message(message)?;
        if created {
            trace!(message = %id, from = %from, to = %to, size, "message created");
            self.events.push(NetworkEvent::Created {
                time: self.ctx.now(),
                message: id,
                from: from.clone(),
                to: to.clone(),
                size,
            });
        }
        self.collect_evicted();
        Ok(created)
    }

    /// Advance the network to `now`
    pub fn tick(&mut self, now: SimTime) -> RoutingResult<()> {
        self.ctx.advance_to(now);
        let now = self.ctx.now();

        for connection in self.connections.values_mut() {
            connection.update(now);
        }

        let completed: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| c.is_message_transferred(now))
            .map(|c| c.id())
            .collect();
        for id in completed {
            self.complete_transfer(id)?;
        }

        let ttl_unit = self.ctx.ttl_unit();
        for (host, router) in self.routers.iter_mut() {
            for message in router.active_mut().drop_expired(now, ttl_unit) {
                trace!(host = %host, message = %message.id(), "message expired");
                self.events.push(NetworkEvent::Dropped {
                    time: now,
                    message: message.id().clone(),
                    host: host.clone(),
                    expired: true,
                });
            }
        }

        let hosts: Vec<I> = self.routers.keys().cloned().collect();
        for host in &hosts {
            self.update_host(host)?;
        }
        self.collect_evicted();
        Ok(())
    }

    /// Discard all hosts and connections and restart the clock
    pub fn reset(&mut self) {
        self.ctx.reset();
        self.routers.clear();
        self.connections.clear();
        self.next_connection = 0;
        self.events.clear();
        info!("network reset");
    }

    fn snapshot(&self, host: &I, now: SimTime) -> RoutingResult<ContactSnapshot<I>> {
        let router = self
            .routers
            .get(host)
            .ok_or_else(|| RoutingError::UnknownHost(host.to_string()))?;
        Ok(ContactSnapshot::of(router.as_view(), now))
    }

    fn abort_in_flight(&mut self, id: ConnectionId) -> RoutingResult<()> {
        let now = self.ctx.now();
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(RoutingError::UnknownConnection(id))?;
        let (Some(source), Some(destination), Some(message)) = (
            connection.message_source().cloned(),
            connection.message_destination().cloned(),
            connection.message().map(|m| m.id().clone()),
        ) else {
            return Ok(());
        };

        let receiver = router_mut(&mut self.routers, &destination)?;
        let bytes_remaining = connection.abort_transfer(now, &mut **receiver)?;
        router_mut(&mut self.routers, &source)?.transfer_aborted(id);

        debug!(message = %message, from = %source, to = %destination, bytes_remaining, "transfer aborted");
        self.events.push(NetworkEvent::TransferAborted {
            time: now,
            message,
            from: source,
            to: destination,
            bytes_remaining,
        });
        Ok(())
    }

    fn complete_transfer(&mut self, id: ConnectionId) -> RoutingResult<()> {
        let now = self.ctx.now();
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(RoutingError::UnknownConnection(id))?;
        let (Some(source), Some(destination)) = (
            connection.message_source().cloned(),
            connection.message_destination().cloned(),
        ) else {
            return Ok(());
        };

        router_mut(&mut self.routers, &source)?.transfer_done(connection)?;
        let receiver = router_mut(&mut self.routers, &destination)?;
        let received = connection.finalize_transfer(&mut self.ctx, &mut **receiver)?;

        let message = &received.message;
        trace!(
            message = %message.id(),
            from = %source,
            to = %destination,
            first_delivery = received.is_first_delivery,
            "transfer completed"
        );
        self.events.push(NetworkEvent::Relayed {
            time: now,
            message: message.id().clone(),
            from: source,
            to: destination,
            size: message.size(),
            final_recipient: received.is_final_recipient,
            first_delivery: received.is_first_delivery,
            hop_count: message.hop_count(),
            created_at: message.created_at(),
        });
        Ok(())
    }

    fn update_host(&mut self, host: &I) -> RoutingResult<()> {
        let Some(mut router) = self.routers.remove(host) else {
            return Ok(());
        };
        let result = self.run_update(host, &mut *router);
        self.routers.insert(host.clone(), router);
        result
    }

    /// Ask `router` for transfers and start the first one a receiver accepts
    fn run_update(&mut self, host: &I, router: &mut dyn MessageRouter<I>) -> RoutingResult<()> {
        let now = self.ctx.now();
        let requests = {
            let tick = TickContext {
                now,
                ttl_unit: self.ctx.ttl_unit(),
                connections: self
                    .connections
                    .values()
                    .filter(|c| c.is_up() && c.involves(host))
                    .collect(),
                peers: &self.routers,
            };
            router.update(&tick)?
        };

        for request in requests {
            let Some(message) = router.outgoing(&request) else {
                continue;
            };
            let connection = self
                .connections
                .get_mut(&request.connection)
                .ok_or(RoutingError::UnknownConnection(request.connection))?;
            let peer = connection.other_host(host).clone();
            let Some(receiver) = self.routers.get_mut(&peer) else {
                continue;
            };

            let code = connection.start_transfer(&mut self.ctx, host, &message, &mut **receiver);
            match code {
                TransferCode::Ok => {
                    router
                        .active_mut()
                        .transfer_started(request.connection, request.message.clone());
                    self.events.push(NetworkEvent::TransferStarted {
                        time: now,
                        message: request.message,
                        from: host.clone(),
                        to: peer,
                        connection: request.connection,
                    });
                    break;
                }
                TransferCode::DeniedOld => {
                    router.active_mut().transfer_denied(&request.message, &peer, code);
                }
                _ => {
                    trace!(host = %host, peer = %peer, message = %request.message, ?code, "transfer refused");
                }
            }
        }
        Ok(())
    }

    /// Report messages routers evicted to make room
    fn collect_evicted(&mut self) {
        let now = self.ctx.now();
        for (host, router) in self.routers.iter_mut() {
            for message in router.active_mut().take_dropped() {
                self.events.push(NetworkEvent::Dropped {
                    time: now,
                    message: message.id().clone(),
                    host: host.clone(),
                    expired: false,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oppnet_core::HostId;

    fn make_id(n: u32) -> HostId {
        HostId::new(n)
    }

    fn link() -> LinkModel {
        LinkModel::ConstantBitRate { speed: 100.0 }
    }

    fn network(hosts: u32) -> Network<HostId> {
        let mut network = Network::new(RoutingConfig::prophet_spray()).unwrap();
        network.add_hosts(HostId::range(hosts)).unwrap();
        network
    }

    #[test]
    fn test_duplicate_and_unknown_hosts() {
        let mut network = network(2);
        assert!(matches!(
            network.add_host(make_id(0)),
            Err(RoutingError::DuplicateHost(_))
        ));
        assert!(matches!(
            network.connect(&make_id(0), &make_id(7), link()),
            Err(RoutingError::UnknownHost(_))
        ));
        assert!(matches!(
            network.disconnect(ConnectionId(42)),
            Err(RoutingError::UnknownConnection(_))
        ));
    }

    #[test]
    fn test_rejects_self_contact() {
        let mut network = network(2);
        assert!(matches!(
            network.connect(&make_id(1), &make_id(1), link()),
            Err(RoutingError::SelfContact(_))
        ));
        assert_eq!(network.connections().count(), 0);
    }

    #[test]
    fn test_rejects_fatal_config() {
        let mut config = RoutingConfig::spray_and_wait();
        config.router.buffer_size = 0;
        assert!(Network::<HostId>::new(config).is_err());
    }

    #[test]
    fn test_contact_updates_predictability() {
        let mut network = network(2);
        network.connect(&make_id(0), &make_id(1), link()).unwrap();

        let view = network.router(&make_id(0)).unwrap();
        let p = view
            .delivery_predictability_towards(&make_id(1), network.now())
            .unwrap();
        assert!((p - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_one_hop_delivery() {
        let mut network = network(2);
        network
            .create_message(&make_id(0), &make_id(1), "M1", 100, 0)
            .unwrap();
        network.connect(&make_id(0), &make_id(1), link()).unwrap();

        network.tick(SimTime::from_secs(1.0)).unwrap();
        let conn = network.connection_between(&make_id(0), &make_id(1)).unwrap();
        assert!(network.connection(conn).unwrap().is_transferring());

        // 100 bytes at 100 B/s
        network.tick(SimTime::from_secs(2.0)).unwrap();
        let receiver = network.router(&make_id(1)).unwrap();
        assert!(receiver.active().has_delivered(&MessageId::from("M1")));

        let events = network.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            NetworkEvent::Relayed {
                first_delivery: true,
                hop_count: 1,
                ..
            }
        )));
        assert!(network.drain_events().is_empty());
    }

    #[test]
    fn test_disconnect_aborts_transfer() {
        let mut network = network(2);
        network
            .create_message(&make_id(0), &make_id(1), "M1", 1000, 0)
            .unwrap();
        let conn = network.connect(&make_id(0), &make_id(1), link()).unwrap();
        network.tick(SimTime::from_secs(1.0)).unwrap();
        network.tick(SimTime::from_secs(3.0)).unwrap();

        network.disconnect(conn).unwrap();
        assert!(network.connection(conn).is_none());
        assert!(!network.router(&make_id(0)).unwrap().is_transferring());
        assert!(!network.router(&make_id(1)).unwrap().is_transferring());

        let events = network.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            NetworkEvent::TransferAborted {
                bytes_remaining: 800,
                ..
            }
        )));
        assert!(matches!(events.last(), Some(NetworkEvent::ContactDown { .. })));
    }

    #[test]
    fn test_response_created_on_delivery() {
        let mut network = network(2);
        network
            .create_message(&make_id(0), &make_id(1), "M1", 100, 50)
            .unwrap();
        network.connect(&make_id(0), &make_id(1), link()).unwrap();
        network.tick(SimTime::from_secs(1.0)).unwrap();
        network.tick(SimTime::from_secs(2.0)).unwrap();

        let responder = network.router(&make_id(1)).unwrap();
        assert!(responder.has_message(&MessageId::from("R_M1")));
    }
}
