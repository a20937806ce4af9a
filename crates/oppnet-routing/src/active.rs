//! Shared state of active routers
//!
//! [`ActiveRouter`] holds everything a router variant needs regardless of
//! its forwarding strategy: the message buffer, messages being received, the
//! ids already delivered here and the transfers this host is sending. The
//! variants in [`crate::spray`], [`crate::propose`] and
//! [`crate::spray_utility`] embed one and add their own decision state.

use std::collections::{BTreeMap, HashMap, HashSet};

use oppnet_core::{
    Connection, ConnectionId, Message, MessageId, PeerIdentity, Received, SimContext, SimTime,
    TransferCode, TtlUnit,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::buffer::MessageBuffer;
use crate::error::{RoutingError, RoutingResult};
use crate::queue::QueueMode;
use crate::router::TickContext;

/// Per-host router settings shared by every variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterSettings {
    /// Buffer capacity in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u64,

    /// TTL given to created messages, in the run's TTL unit
    #[serde(default)]
    pub msg_ttl: Option<u32>,

    #[serde(default)]
    pub queue_mode: QueueMode,

    /// Drop the local copy once it has reached its destination
    #[serde(default)]
    pub delete_delivered: bool,
}

fn default_buffer_size() -> u64 {
    5_000_000
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            msg_ttl: None,
            queue_mode: QueueMode::default(),
            delete_delivered: false,
        }
    }
}

/// Buffer and transfer bookkeeping of one host
#[derive(Debug, Clone)]
pub struct ActiveRouter<I: PeerIdentity> {
    host: I,
    settings: RouterSettings,
    buffer: MessageBuffer<I>,
    incoming: HashMap<(MessageId, I), Message<I>>,
    delivered: HashSet<MessageId>,
    sending: BTreeMap<ConnectionId, MessageId>,
    dropped: Vec<Message<I>>,
}

impl<I: PeerIdentity> ActiveRouter<I> {
    pub fn new(host: I, settings: RouterSettings) -> Self {
        Self {
            buffer: MessageBuffer::new(settings.buffer_size),
            host,
            settings,
            incoming: HashMap::new(),
            delivered: HashSet::new(),
            sending: BTreeMap::new(),
            dropped: Vec::new(),
        }
    }

    pub fn host(&self) -> &I {
        &self.host
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    pub fn buffer(&self) -> &MessageBuffer<I> {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut MessageBuffer<I> {
        &mut self.buffer
    }

    pub fn has_message(&self, id: &MessageId) -> bool {
        self.buffer.contains(id)
    }

    /// Whether `id` was delivered to this host
    pub fn has_delivered(&self, id: &MessageId) -> bool {
        self.delivered.contains(id)
    }

    /// Sending or receiving on any link
    pub fn is_transferring(&self) -> bool {
        !self.sending.is_empty() || !self.incoming.is_empty()
    }

    pub fn is_sending(&self, id: &MessageId) -> bool {
        self.sending.values().any(|sent| sent == id)
    }

    /// Run the admission checks and stage an accepted message
    pub fn receive(&mut self, now: SimTime, ttl_unit: TtlUnit, mut message: Message<I>, from: &I) -> TransferCode {
        if self.is_transferring() {
            return TransferCode::TryLaterBusy;
        }

        let id = message.id().clone();
        if self.buffer.contains(&id)
            || self.delivered.contains(&id)
            || self.incoming.keys().any(|(staged, _)| *staged == id)
        {
            return TransferCode::DeniedOld;
        }

        if message.ttl(now, ttl_unit).is_expired() && *message.to() != self.host {
            return TransferCode::DeniedTtl;
        }

        if message.size() > self.buffer.capacity() {
            return TransferCode::DeniedNoSpace;
        }

        let sending = &self.sending;
        match self
            .buffer
            .make_room_for(message.size(), |id| sending.values().any(|sent| sent == id))
        {
            Some(evicted) => self.dropped.extend(evicted),
            None => return TransferCode::DeniedNoSpace,
        }

        message.add_hop(self.host.clone());
        self.incoming.insert((id, from.clone()), message);
        TransferCode::Ok
    }

    /// Take a staged message whose transfer completed
    pub fn take_incoming(&mut self, id: &MessageId, from: &I) -> RoutingResult<Message<I>> {
        self.incoming
            .remove(&(id.clone(), from.clone()))
            .ok_or_else(|| RoutingError::NotIncoming {
                host: self.host.to_string(),
                message: id.clone(),
                from: from.to_string(),
            })
    }

    /// Forget a staged message whose transfer was aborted
    pub fn abort_incoming(&mut self, id: &MessageId, from: &I) -> Option<Message<I>> {
        self.incoming.remove(&(id.clone(), from.clone()))
    }

    /// File a completely received message
    ///
    /// Messages for this host are recorded as delivered, everything else is
    /// buffered for further forwarding.
    pub fn file_received(&mut self, now: SimTime, mut message: Message<I>) -> Received<I> {
        message.set_received_at(now);
        let is_final_recipient = *message.to() == self.host;
        let is_first_delivery = is_final_recipient && !self.delivered.contains(message.id());

        if is_final_recipient {
            self.delivered.insert(message.id().clone());
        } else if !self.buffer.contains(message.id()) {
            self.buffer.insert(message.clone());
        }

        Received {
            message,
            is_final_recipient,
            is_first_delivery,
        }
    }

    /// The response owed for a first delivery that requested one
    pub fn response_for(&self, ctx: &mut SimContext, received: &Received<I>) -> Option<Message<I>> {
        let request = &received.message;
        if !received.is_first_delivery || request.response_size() == 0 {
            return None;
        }
        let mut response = Message::new(
            ctx,
            self.host.clone(),
            request.from().clone(),
            request.id().response_id(),
            request.response_size(),
        );
        response.set_request(request.id().clone());
        Some(response)
    }

    /// Buffer a message created at this host
    ///
    /// Applies the default TTL. Returns `false` if no room could be made.
    pub fn add_new_message(&mut self, mut message: Message<I>) -> bool {
        let sending = &self.sending;
        match self
            .buffer
            .make_room_for(message.size(), |id| sending.values().any(|sent| sent == id))
        {
            Some(evicted) => self.dropped.extend(evicted),
            None => {
                debug!(host = %self.host, message = %message.id(), size = message.size(), "no room for new message");
                return false;
            }
        }
        message.set_ttl(self.settings.msg_ttl);
        self.buffer.insert(message);
        true
    }

    /// Remove messages whose TTL ran out
    pub fn drop_expired(&mut self, now: SimTime, ttl_unit: TtlUnit) -> Vec<Message<I>> {
        let expired: Vec<MessageId> = self
            .buffer
            .iter()
            .filter(|m| m.ttl(now, ttl_unit).is_expired())
            .map(|m| m.id().clone())
            .collect();
        expired.iter().filter_map(|id| self.buffer.remove(id)).collect()
    }

    /// Messages evicted to make room since the last call
    pub fn take_dropped(&mut self) -> Vec<Message<I>> {
        std::mem::take(&mut self.dropped)
    }

    /// Something to send and someone to send it to
    pub fn can_start_transfer(&self, tick: &TickContext<'_, I>) -> bool {
        !self.buffer.is_empty() && !tick.connections.is_empty()
    }

    /// Messages whose destination is on the other end of a ready link
    pub fn deliverable<'a>(&'a self, tick: &TickContext<'_, I>) -> Vec<(&'a Message<I>, ConnectionId)> {
        let mut pairs = Vec::new();
        for connection in tick.ready_connections() {
            let peer = connection.other_host(&self.host);
            pairs.extend(
                self.buffer
                    .iter()
                    .filter(|m| m.to() == peer)
                    .map(|m| (m, connection.id())),
            );
        }
        self.settings
            .queue_mode
            .sort_by_message(&mut pairs, tick.now, |pair| pair.0);
        pairs
    }

    pub fn transfer_started(&mut self, connection: ConnectionId, id: MessageId) {
        self.sending.insert(connection, id);
    }

    /// Bookkeeping after the transfer on `connection` completed
    pub fn transfer_finished(&mut self, connection: &Connection<I>) {
        let Some(id) = self.sending.remove(&connection.id()) else {
            return;
        };
        let receiver = connection.other_host(&self.host);
        let reached_destination = self.buffer.get(&id).is_some_and(|m| m.to() == receiver);
        if self.settings.delete_delivered && reached_destination {
            self.buffer.remove(&id);
            trace!(host = %self.host, message = %id, "deleted delivered copy");
        }
    }

    pub fn transfer_aborted(&mut self, connection: ConnectionId) {
        self.sending.remove(&connection);
    }

    /// A peer refused `id` as already known
    pub fn transfer_denied(&mut self, id: &MessageId, receiver: &I, code: TransferCode) {
        if code != TransferCode::DeniedOld || !self.settings.delete_delivered {
            return;
        }
        if self.buffer.get(id).is_some_and(|m| m.to() == receiver) {
            self.buffer.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oppnet_core::{Clock, HostId};

    fn make_id(n: u32) -> HostId {
        HostId::new(n)
    }

    fn router(capacity: u64) -> ActiveRouter<HostId> {
        ActiveRouter::new(
            make_id(1),
            RouterSettings {
                buffer_size: capacity,
                ..Default::default()
            },
        )
    }

    fn message(ctx: &mut SimContext, id: &str, to: u32, size: u64) -> Message<HostId> {
        Message::new(ctx, make_id(0), make_id(to), id, size)
    }

    #[test]
    fn test_accepts_and_stages() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let mut r = router(1000);
        let m = message(&mut ctx, "M1", 5, 100);

        let code = r.receive(ctx.now(), TtlUnit::Minutes, m, &make_id(0));
        assert_eq!(code, TransferCode::Ok);
        assert!(r.is_transferring());
        assert!(!r.has_message(&MessageId::from("M1")));

        let staged = r.take_incoming(&MessageId::from("M1"), &make_id(0)).unwrap();
        assert_eq!(staged.hops(), &[make_id(0), make_id(1)]);
    }

    #[test]
    fn test_busy_host_refuses() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let mut r = router(1000);
        r.receive(ctx.now(), TtlUnit::Minutes, message(&mut ctx, "M1", 5, 100), &make_id(0));

        let code = r.receive(ctx.now(), TtlUnit::Minutes, message(&mut ctx, "M2", 5, 100), &make_id(2));
        assert_eq!(code, TransferCode::TryLaterBusy);
    }

    #[test]
    fn test_known_message_denied_old() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let mut r = router(1000);
        r.add_new_message(message(&mut ctx, "M1", 5, 100));

        let code = r.receive(ctx.now(), TtlUnit::Minutes, message(&mut ctx, "M1", 5, 100), &make_id(0));
        assert_eq!(code, TransferCode::DeniedOld);
    }

    #[test]
    fn test_expired_message_denied_unless_addressed_here() {
        let mut ctx = SimContext::new(TtlUnit::Seconds);
        let mut r = router(1000);
        let mut relayed = message(&mut ctx, "M1", 5, 100);
        relayed.set_ttl(Some(10));
        let mut direct = message(&mut ctx, "M2", 1, 100);
        direct.set_ttl(Some(10));

        let later = SimTime::from_secs(20.0);
        assert_eq!(r.receive(later, TtlUnit::Seconds, relayed, &make_id(0)), TransferCode::DeniedTtl);
        assert_eq!(r.receive(later, TtlUnit::Seconds, direct, &make_id(0)), TransferCode::Ok);
    }

    #[test]
    fn test_oversized_message_denied() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let mut r = router(100);
        let code = r.receive(ctx.now(), TtlUnit::Minutes, message(&mut ctx, "M1", 5, 101), &make_id(0));
        assert_eq!(code, TransferCode::DeniedNoSpace);
    }

    #[test]
    fn test_receive_evicts_for_room() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let mut r = router(300);
        r.add_new_message(message(&mut ctx, "old", 5, 200));

        let code = r.receive(ctx.now(), TtlUnit::Minutes, message(&mut ctx, "M1", 5, 200), &make_id(0));
        assert_eq!(code, TransferCode::Ok);
        let dropped = r.take_dropped();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].id().as_str(), "old");
        assert!(r.take_dropped().is_empty());
    }

    #[test]
    fn test_final_delivery_recorded_once() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let mut r = router(1000);

        let first = r.file_received(ctx.now(), message(&mut ctx, "M1", 1, 100));
        assert!(first.is_final_recipient);
        assert!(first.is_first_delivery);
        assert!(!r.has_message(&MessageId::from("M1")));

        let again = r.file_received(ctx.now(), message(&mut ctx, "M1", 1, 100));
        assert!(again.is_final_recipient);
        assert!(!again.is_first_delivery);

        let code = r.receive(ctx.now(), TtlUnit::Minutes, message(&mut ctx, "M1", 1, 100), &make_id(0));
        assert_eq!(code, TransferCode::DeniedOld);
    }

    #[test]
    fn test_relayed_message_buffered() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let mut r = router(1000);
        ctx.advance_to(SimTime::from_secs(7.0));
        let received = r.file_received(ctx.now(), message(&mut ctx, "M1", 5, 100));

        assert!(!received.is_final_recipient);
        let held = r.buffer().get(&MessageId::from("M1")).unwrap();
        assert_eq!(held.received_at(), SimTime::from_secs(7.0));
    }

    #[test]
    fn test_response_created_for_request() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let r = router(1000);
        let mut request = message(&mut ctx, "Q1", 1, 100);
        request.set_response_size(40);

        let received = Received {
            message: request,
            is_final_recipient: true,
            is_first_delivery: true,
        };
        let response = r.response_for(&mut ctx, &received).unwrap();
        assert_eq!(response.id().as_str(), "R_Q1");
        assert_eq!(response.to(), &make_id(0));
        assert_eq!(response.size(), 40);
        assert_eq!(response.request().map(|id| id.as_str()), Some("Q1"));
    }

    #[test]
    fn test_missing_incoming_is_error() {
        let mut r = router(1000);
        let err = r.take_incoming(&MessageId::from("ghost"), &make_id(0)).unwrap_err();
        assert!(matches!(err, RoutingError::NotIncoming { .. }));
    }

    #[test]
    fn test_drop_expired() {
        let mut ctx = SimContext::new(TtlUnit::Seconds);
        let mut r = ActiveRouter::new(
            make_id(1),
            RouterSettings {
                msg_ttl: Some(10),
                ..Default::default()
            },
        );
        r.add_new_message(message(&mut ctx, "M1", 5, 100));

        assert!(r.drop_expired(SimTime::from_secs(5.0), TtlUnit::Seconds).is_empty());
        let dropped = r.drop_expired(SimTime::from_secs(10.0), TtlUnit::Seconds);
        assert_eq!(dropped.len(), 1);
        assert!(r.buffer().is_empty());
    }
}
