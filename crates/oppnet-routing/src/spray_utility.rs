//! Utility-ranked spray routing
//!
//! Spray-and-wait where copies only go to peers at least as useful as the
//! carrier itself, and the most useful peers are tried first. Usefulness is
//! the [`crate::utility`] blend of free buffer and delivery ratio.

use oppnet_core::{
    Clock, Connection, Message, MessageId, PeerIdentity, Received, SimContext, SimTime, TransferCode,
    TransferListener,
};
use tracing::trace;

use crate::active::{ActiveRouter, RouterSettings};
use crate::error::{RoutingError, RoutingResult};
use crate::quota::{QuotaConfig, SprayQuota};
use crate::router::{ContactSnapshot, MessageRouter, Protocol, RouterView, TickContext, TransferRequest};
use crate::utility::{Candidate, DeliveryStats, UtilityRanker, UtilityWeights};

/// Spray router ranking relays by utility
#[derive(Debug, Clone)]
pub struct UtilitySprayRouter<I: PeerIdentity> {
    active: ActiveRouter<I>,
    quota: SprayQuota,
    stats: DeliveryStats,
    ranker: UtilityRanker<I>,
}

impl<I: PeerIdentity> UtilitySprayRouter<I> {
    pub fn new(host: I, settings: RouterSettings, quota: QuotaConfig, weights: UtilityWeights) -> Self {
        Self {
            active: ActiveRouter::new(host, settings),
            quota: SprayQuota::new(Protocol::UtilitySpray, quota),
            stats: DeliveryStats::default(),
            ranker: UtilityRanker::new(weights),
        }
    }

    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }

    pub fn quota(&self) -> &SprayQuota {
        &self.quota
    }

    /// This host's utility right now
    pub fn local_utility(&self) -> f64 {
        let buffer = self.active.buffer();
        self.ranker
            .utility(buffer.free_bytes(), buffer.capacity(), &self.stats)
    }

    /// Utility exchange with a peer that has no utility to offer
    fn mismatch(&self, peer: &I, found: Protocol) -> RoutingError {
        RoutingError::ProtocolMismatch {
            host: self.active.host().to_string(),
            peer: peer.to_string(),
            expected: Protocol::UtilitySpray,
            found,
        }
    }
}

impl<I: PeerIdentity> RouterView<I> for UtilitySprayRouter<I> {
    fn host(&self) -> &I {
        self.active.host()
    }

    fn protocol(&self) -> Protocol {
        Protocol::UtilitySpray
    }

    fn has_message(&self, id: &MessageId) -> bool {
        self.active.has_message(id)
    }

    fn is_transferring(&self) -> bool {
        self.active.is_transferring()
    }

    fn utility_towards(&self, _destination: &I) -> Option<f64> {
        Some(self.local_utility())
    }
}

impl<I: PeerIdentity> TransferListener<I> for UtilitySprayRouter<I> {
    type Error = RoutingError;

    fn receive_message(&mut self, ctx: &SimContext, message: Message<I>, from: &I) -> TransferCode {
        let size = message.size();
        let code = self.active.receive(ctx.now(), ctx.ttl_unit(), message, from);
        if code.is_ok() {
            self.stats.record_received(size);
        }
        code
    }

    fn message_transferred(&mut self, ctx: &mut SimContext, id: &MessageId, from: &I) -> RoutingResult<Received<I>> {
        let (received, response) = self.quota.accept_transferred(&mut self.active, ctx, id, from)?;
        if let Some(response) = response {
            self.create_new_message(response)?;
        }
        Ok(received)
    }

    fn message_aborted(&mut self, id: &MessageId, from: &I, _bytes_remaining: u64) {
        self.active.abort_incoming(id, from);
    }
}

impl<I: PeerIdentity> MessageRouter<I> for UtilitySprayRouter<I> {
    fn as_view(&self) -> &dyn RouterView<I> {
        self
    }

    fn active(&self) -> &ActiveRouter<I> {
        &self.active
    }

    fn active_mut(&mut self) -> &mut ActiveRouter<I> {
        &mut self.active
    }

    fn changed_connection(
        &mut self,
        _now: SimTime,
        connection: &Connection<I>,
        peer: &ContactSnapshot<I>,
    ) -> RoutingResult<()> {
        if connection.is_up() && peer.protocol != Protocol::UtilitySpray {
            return Err(self.mismatch(&peer.host, peer.protocol));
        }
        Ok(())
    }

    fn update(&mut self, tick: &TickContext<'_, I>) -> RoutingResult<Vec<TransferRequest>> {
        self.ranker.clear();
        if !self.active.can_start_transfer(tick) || self.active.is_transferring() {
            return Ok(Vec::new());
        }

        let mut requests = self.quota.delivery_requests(&self.active, tick)?;

        let left = self
            .quota
            .with_copies_left(self.active.host(), self.active.buffer().iter())?;
        if left.is_empty() {
            return Ok(requests);
        }

        let current = self.local_utility();
        let mut candidates: Vec<Candidate<'_, I>> = Vec::new();
        for connection in tick.ready_connections() {
            let peer = connection.other_host(self.active.host());
            let Some(view) = tick.peers.router(peer) else {
                continue;
            };
            if view.protocol() != Protocol::UtilitySpray {
                return Err(self.mismatch(peer, view.protocol()));
            }
            if view.is_transferring() {
                trace!(peer = %peer, "peer busy");
                continue;
            }
            for (message, copies) in &left {
                if view.has_message(message.id()) {
                    continue;
                }
                let local = match self.ranker.cached(message.to()) {
                    Some(value) => value,
                    None => self.ranker.refresh(message.to(), current),
                };
                let remote = view
                    .utility_towards(message.to())
                    .ok_or_else(|| self.mismatch(peer, view.protocol()))?;
                if remote >= local {
                    candidates.push(Candidate {
                        message,
                        connection: connection.id(),
                        copies: *copies,
                        remote_utility: remote,
                    });
                }
            }
        }

        self.ranker
            .rank(&mut candidates, self.active.settings().queue_mode);
        requests.extend(candidates.iter().map(|candidate| TransferRequest {
            message: candidate.message.id().clone(),
            connection: candidate.connection,
            handoff: self.quota.receiver_share(candidate.copies),
        }));
        Ok(requests)
    }

    fn outgoing(&self, request: &TransferRequest) -> Option<Message<I>> {
        self.quota.outgoing(&self.active, request)
    }

    fn transfer_done(&mut self, connection: &Connection<I>) -> RoutingResult<()> {
        if let Some(sent) = connection.message() {
            self.stats.record_forwarded(sent.size());
        }
        self.quota.settle_transfer(&mut self.active, connection)?;
        self.active.transfer_finished(connection);
        Ok(())
    }

    fn create_new_message(&mut self, mut message: Message<I>) -> RoutingResult<bool> {
        self.quota.stamp(&mut message)?;
        Ok(self.active.add_new_message(message))
    }

    fn replicate(&self, host: I) -> Box<dyn MessageRouter<I>> {
        Box::new(Self::new(
            host,
            *self.active.settings(),
            *self.quota.config(),
            *self.ranker.weights(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use oppnet_core::{ConnectionId, Endpoint, HostId, InterfaceId, LinkModel, SimTime, TtlUnit};

    fn make_id(n: u32) -> HostId {
        HostId::new(n)
    }

    fn router(n: u32, buffer_size: u64) -> UtilitySprayRouter<HostId> {
        UtilitySprayRouter::new(
            make_id(n),
            RouterSettings {
                buffer_size,
                ..Default::default()
            },
            QuotaConfig::default(),
            UtilityWeights::default(),
        )
    }

    fn link(id: u64, a: u32, b: u32) -> Connection<HostId> {
        Connection::new(
            ConnectionId(id),
            Endpoint::new(make_id(a), InterfaceId(0)),
            Endpoint::new(make_id(b), InterfaceId(0)),
            LinkModel::ConstantBitRate { speed: 1000.0 },
        )
    }

    #[test]
    fn test_received_bytes_count_accepted_only() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let mut r = router(2, 1000);

        let too_big = Message::new(&mut ctx, make_id(1), make_id(9), "big", 5000);
        assert_eq!(r.receive_message(&ctx, too_big, &make_id(1)), TransferCode::DeniedNoSpace);
        assert_eq!(r.stats().received_bytes, 0);

        let fits = Message::new(&mut ctx, make_id(1), make_id(9), "ok", 300);
        assert_eq!(r.receive_message(&ctx, fits, &make_id(1)), TransferCode::Ok);
        assert_eq!(r.stats().received_bytes, 300);
    }

    #[test]
    fn test_forwards_only_to_more_useful_peers() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let mut a = router(1, 1000);
        // Same capacity but holding a message: lower utility than empty peer
        let mut full = router(2, 1000);
        full.create_new_message(Message::new(&mut ctx, make_id(2), make_id(8), "X", 900))
            .unwrap();
        let empty = router(3, 1000);

        a.create_new_message(Message::new(&mut ctx, make_id(1), make_id(9), "M1", 100))
            .unwrap();

        let mut peers: BTreeMap<HostId, Box<dyn MessageRouter<HostId>>> = BTreeMap::new();
        peers.insert(make_id(2), Box::new(full));
        peers.insert(make_id(3), Box::new(empty));

        let to_full = link(1, 1, 2);
        let to_empty = link(2, 1, 3);
        let tick = TickContext {
            now: SimTime::ZERO,
            ttl_unit: TtlUnit::Minutes,
            connections: vec![&to_full, &to_empty],
            peers: &peers,
        };

        let requests = a.update(&tick).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].connection, ConnectionId(2));
        assert_eq!(requests[0].handoff, 3);
    }

    #[test]
    fn test_skips_peers_holding_the_message() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let mut a = router(1, 1000);
        let mut b = router(2, 10_000);
        let m = Message::new(&mut ctx, make_id(1), make_id(9), "M1", 100);
        b.create_new_message(m.clone()).unwrap();
        a.create_new_message(m).unwrap();

        let mut peers: BTreeMap<HostId, Box<dyn MessageRouter<HostId>>> = BTreeMap::new();
        peers.insert(make_id(2), Box::new(b));
        let conn = link(1, 1, 2);
        let tick = TickContext {
            now: SimTime::ZERO,
            ttl_unit: TtlUnit::Minutes,
            connections: vec![&conn],
            peers: &peers,
        };
        assert!(a.update(&tick).unwrap().is_empty());
    }

    #[test]
    fn test_peer_without_utility_is_a_mismatch() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let mut a = router(1, 1000);
        a.create_new_message(Message::new(&mut ctx, make_id(1), make_id(9), "M1", 100))
            .unwrap();

        let spray = crate::RoutingConfig::spray_and_wait().build(make_id(2)).unwrap();
        let mut peers: BTreeMap<HostId, Box<dyn MessageRouter<HostId>>> = BTreeMap::new();
        peers.insert(make_id(2), spray);
        let conn = link(1, 1, 2);
        let tick = TickContext {
            now: SimTime::ZERO,
            ttl_unit: TtlUnit::Minutes,
            connections: vec![&conn],
            peers: &peers,
        };

        let err = a.update(&tick).unwrap_err();
        assert!(matches!(
            err,
            RoutingError::ProtocolMismatch {
                expected: Protocol::UtilitySpray,
                found: Protocol::SprayAndWait,
                ..
            }
        ));
    }

    #[test]
    fn test_local_utility_tracks_buffer() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let mut r = router(1, 1000);
        assert!((r.local_utility() - 0.75).abs() < 1e-9);

        r.create_new_message(Message::new(&mut ctx, make_id(1), make_id(9), "M1", 500))
            .unwrap();
        assert!((r.local_utility() - 0.375).abs() < 1e-9);
        assert_eq!(r.utility_towards(&make_id(9)), Some(r.local_utility()));
    }
}
