//! Spray-and-wait routing
//!
//! A message starts with a fixed number of copies. While a carrier holds more
//! than one it hands copies to every host it meets (spray phase); with one
//! left it waits until it meets the destination.

use oppnet_core::{
    Clock, Connection, Message, MessageId, PeerIdentity, Received, SimContext, TransferCode, TransferListener,
};

use crate::active::{ActiveRouter, RouterSettings};
use crate::error::{RoutingError, RoutingResult};
use crate::quota::{QuotaConfig, SprayQuota};
use crate::router::{MessageRouter, Protocol, RouterView, TickContext, TransferRequest};

/// Plain spray-and-wait router
#[derive(Debug, Clone)]
pub struct SprayAndWaitRouter<I: PeerIdentity> {
    active: ActiveRouter<I>,
    quota: SprayQuota,
}

impl<I: PeerIdentity> SprayAndWaitRouter<I> {
    pub fn new(host: I, settings: RouterSettings, quota: QuotaConfig) -> Self {
        Self {
            active: ActiveRouter::new(host, settings),
            quota: SprayQuota::new(Protocol::SprayAndWait, quota),
        }
    }

    pub fn quota(&self) -> &SprayQuota {
        &self.quota
    }
}

impl<I: PeerIdentity> RouterView<I> for SprayAndWaitRouter<I> {
    fn host(&self) -> &I {
        self.active.host()
    }

    fn protocol(&self) -> Protocol {
        Protocol::SprayAndWait
    }

    fn has_message(&self, id: &MessageId) -> bool {
        self.active.has_message(id)
    }

    fn is_transferring(&self) -> bool {
        self.active.is_transferring()
    }
}

impl<I: PeerIdentity> TransferListener<I> for SprayAndWaitRouter<I> {
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

impl<I: PeerIdentity> MessageRouter<I> for SprayAndWaitRouter<I> {
    fn as_view(&self) -> &dyn RouterView<I> {
        self
    }

    fn active(&self) -> &ActiveRouter<I> {
        &self.active
    }

    fn active_mut(&mut self) -> &mut ActiveRouter<I> {
        &mut self.active
    }

    fn update(&mut self, tick: &TickContext<'_, I>) -> RoutingResult<Vec<TransferRequest>> {
        if !self.active.can_start_transfer(tick) || self.active.is_transferring() {
            return Ok(Vec::new());
        }

        let mut requests = self.quota.delivery_requests(&self.active, tick)?;

        let mut left = self
            .quota
            .with_copies_left(self.active.host(), self.active.buffer().iter())?;
        self.active
            .settings()
            .queue_mode
            .sort_by_message(&mut left, tick.now, |pair| pair.0);

        for connection in tick.ready_connections() {
            requests.extend(left.iter().map(|(message, copies)| TransferRequest {
                message: message.id().clone(),
                connection: connection.id(),
                handoff: self.quota.receiver_share(*copies),
            }));
        }
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
        Box::new(Self::new(host, *self.active.settings(), *self.quota.config()))
    }
}
