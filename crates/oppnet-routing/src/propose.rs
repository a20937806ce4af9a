//! Predictability-guided spray routing
//!
//! Combines spray-and-wait copy quotas with a delivery predictability table.
//! Contacts feed the table (direct encounter plus transitivity from the
//! peer's table); the table in turn decides how copies are split when the
//! router runs with [`ReplicationPolicy::PredictabilityRatio`].
//!
//! Both ends of a contact must run this protocol: the transitive update reads
//! the peer's table and a peer without one is a configuration error.

use oppnet_core::{
    Clock, Connection, Message, MessageId, PeerIdentity, Received, SimContext, SimTime, TransferCode,
    TransferListener,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::active::{ActiveRouter, RouterSettings};
use crate::error::{RoutingError, RoutingResult};
use crate::prophet::{DeliveryPredictor, PredictorConfig};
use crate::quota::{QuotaConfig, SprayQuota};
use crate::router::{ContactSnapshot, MessageRouter, Protocol, RouterView, TickContext, TransferRequest};

/// How copies are split between sender and relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationPolicy {
    /// Binary or linear split, every contact is a candidate
    #[default]
    QuotaSplit,
    /// Split in proportion to the two hosts' predictability for the destination
    PredictabilityRatio,
}

/// Spray router guided by delivery predictability
#[derive(Debug, Clone)]
pub struct ProphetSprayRouter<I: PeerIdentity> {
    active: ActiveRouter<I>,
    quota: SprayQuota,
    predictor: DeliveryPredictor<I>,
    policy: ReplicationPolicy,
}

impl<I: PeerIdentity> ProphetSprayRouter<I> {
    pub fn new(
        host: I,
        settings: RouterSettings,
        quota: QuotaConfig,
        predictor: PredictorConfig,
        policy: ReplicationPolicy,
    ) -> Self {
        Self {
            predictor: DeliveryPredictor::new(host.clone(), predictor),
            active: ActiveRouter::new(host, settings),
            quota: SprayQuota::new(Protocol::ProphetSpray, quota),
            policy,
        }
    }

    pub fn predictor(&self) -> &DeliveryPredictor<I> {
        &self.predictor
    }

    pub fn quota(&self) -> &SprayQuota {
        &self.quota
    }

    pub fn policy(&self) -> ReplicationPolicy {
        self.policy
    }

    /// Requests for messages still in their spray phase
    fn spray_requests(&self, tick: &TickContext<'_, I>) -> RoutingResult<Vec<TransferRequest>> {
        let mut left = self
            .quota
            .with_copies_left(self.active.host(), self.active.buffer().iter())?;
        self.active
            .settings()
            .queue_mode
            .sort_by_message(&mut left, tick.now, |pair| pair.0);

        let mut requests = Vec::new();
        for (message, copies) in left {
            match self.policy {
                ReplicationPolicy::QuotaSplit => {
                    requests.extend(tick.ready_connections().map(|connection| TransferRequest {
                        message: message.id().clone(),
                        connection: connection.id(),
                        handoff: self.quota.receiver_share(copies),
                    }));
                }
                ReplicationPolicy::PredictabilityRatio => {
                    let own = self.predictor.predictability(message.to(), tick.now);
                    let mut contacts: Vec<_> = tick
                        .ready_connections()
                        .map(|connection| {
                            let peer = connection.other_host(self.active.host());
                            let theirs = tick
                                .peers
                                .router(peer)
                                .and_then(|view| view.delivery_predictability_towards(message.to(), tick.now))
                                .unwrap_or(0.0);
                            (connection.id(), theirs)
                        })
                        .collect();
                    contacts.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

                    requests.extend(contacts.into_iter().map(|(connection, theirs)| TransferRequest {
                        message: message.id().clone(),
                        connection,
                        handoff: SprayQuota::ratio_share(copies, own, theirs),
                    }));
                }
            }
        }
        Ok(requests)
    }
}

impl<I: PeerIdentity> RouterView<I> for ProphetSprayRouter<I> {
    fn host(&self) -> &I {
        self.active.host()
    }

    fn protocol(&self) -> Protocol {
        Protocol::ProphetSpray
    }

    fn has_message(&self, id: &MessageId) -> bool {
        self.active.has_message(id)
    }

    fn is_transferring(&self) -> bool {
        self.active.is_transferring()
    }

    fn delivery_predictability_towards(&self, destination: &I, now: SimTime) -> Option<f64> {
        Some(self.predictor.predictability(destination, now))
    }

    fn delivery_predictabilities(&self, now: SimTime) -> Vec<(I, f64)> {
        self.predictor.snapshot(now)
    }
}

impl<I: PeerIdentity> TransferListener<I> for ProphetSprayRouter<I> {
    type Error = RoutingError;

    fn receive_message(&mut self, ctx: &SimContext, message: Message<I>, from: &I) -> TransferCode {
        self.active.receive(ctx.now(), ctx.ttl_unit(), message, from)
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

impl<I: PeerIdentity> MessageRouter<I> for ProphetSprayRouter<I> {
    fn as_view(&self) -> &dyn RouterView<I> {
        self
    }

    fn active(&self) -> &ActiveRouter<I> {
        &self.active
    }

    fn active_mut(&mut self) -> &mut ActiveRouter<I> {
        &mut self.active
    }

    #[instrument(skip(self, connection, peer), fields(host = %self.active.host(), peer = %peer.host))]
    fn changed_connection(
        &mut self,
        now: SimTime,
        connection: &Connection<I>,
        peer: &ContactSnapshot<I>,
    ) -> RoutingResult<()> {
        if !connection.is_up() {
            return Ok(());
        }
        if peer.protocol != Protocol::ProphetSpray {
            return Err(RoutingError::ProtocolMismatch {
                host: self.active.host().to_string(),
                peer: peer.host.to_string(),
                expected: Protocol::ProphetSpray,
                found: peer.protocol,
            });
        }

        let direct = self.predictor.encounter(&peer.host, now);
        self.predictor
            .transitive_update(&peer.host, &peer.predictabilities, now);
        debug!(
            direct,
            known = self.predictor.known_destinations(),
            "predictabilities updated"
        );
        Ok(())
    }

    fn update(&mut self, tick: &TickContext<'_, I>) -> RoutingResult<Vec<TransferRequest>> {
        if !self.active.can_start_transfer(tick) || self.active.is_transferring() {
            return Ok(Vec::new());
        }

        let mut requests = self.quota.delivery_requests(&self.active, tick)?;
        requests.extend(self.spray_requests(tick)?);
        Ok(requests)
    }

    fn outgoing(&self, request: &TransferRequest) -> Option<Message<I>> {
        self.quota.outgoing(&self.active, request)
    }

    fn transfer_done(&mut self, connection: &Connection<I>) -> RoutingResult<()> {
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
            *self.predictor.config(),
            self.policy,
        ))
    }
}
