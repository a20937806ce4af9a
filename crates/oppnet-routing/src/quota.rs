//! Replication quotas
//!
//! Spray-style routers bound the number of live copies of a message. Every
//! carried message holds a copy count under its protocol's property key. When
//! a transfer completes the copies are split between sender and receiver:
//!
//! - **Binary**: the receiver gets `ceil(n/2)`, the sender keeps `floor(n/2)`
//! - **Linear**: the receiver gets 1, the sender keeps `n - 1`
//! - **Ratio**: the receiver's share is decided by the sender per contact
//!
//! The share travels inside the outgoing copy, so the receiver keeps exactly
//! what it was handed and the sender subtracts the same amount. A count of 1
//! means the message only goes to its destination.

use oppnet_core::{
    Clock, Connection, Message, MessageError, MessageId, PeerIdentity, PropertyKey, PropertyValue, Received,
    SimContext,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::active::ActiveRouter;
use crate::error::{RoutingError, RoutingResult};
use crate::router::{Protocol, TickContext, TransferRequest};

/// Copy-count settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Copies stamped on a newly created message
    #[serde(default = "default_initial_copies")]
    pub initial_copies: u32,

    /// Binary split instead of handing out one copy at a time
    #[serde(default = "default_binary")]
    pub binary: bool,
}

fn default_initial_copies() -> u32 {
    6
}

fn default_binary() -> bool {
    true
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            initial_copies: default_initial_copies(),
            binary: default_binary(),
        }
    }
}

/// Copy-count bookkeeping for one protocol
#[derive(Debug, Clone)]
pub struct SprayQuota {
    key: PropertyKey,
    config: QuotaConfig,
}

impl SprayQuota {
    pub fn new(protocol: Protocol, config: QuotaConfig) -> Self {
        Self {
            key: PropertyKey::Copies(protocol.namespace()),
            config,
        }
    }

    /// Property key holding the copy count
    pub fn key(&self) -> &PropertyKey {
        &self.key
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Give a new message its initial copies
    pub fn stamp<I: PeerIdentity>(&self, message: &mut Message<I>) -> Result<(), MessageError> {
        message.add_property(self.key.clone(), PropertyValue::Count(self.config.initial_copies))
    }

    /// Copy count of a message carried by `host`
    pub fn copies<I: PeerIdentity>(&self, host: &I, message: &Message<I>) -> RoutingResult<u32> {
        message
            .count_property(&self.key)
            .ok_or_else(|| RoutingError::MissingQuota {
                host: host.to_string(),
                message: message.id().clone(),
            })
    }

    /// Messages that may still be handed to relays, with their counts
    pub fn with_copies_left<'a, I, M>(&self, host: &I, messages: M) -> RoutingResult<Vec<(&'a Message<I>, u32)>>
    where
        I: PeerIdentity,
        M: IntoIterator<Item = &'a Message<I>>,
    {
        let mut left = Vec::new();
        for message in messages {
            let copies = self.copies(host, message)?;
            if copies > 1 {
                left.push((message, copies));
            }
        }
        Ok(left)
    }

    /// Receiver's share of `copies` under the configured split
    pub fn receiver_share(&self, copies: u32) -> u32 {
        if self.config.binary {
            Self::binary_share(copies)
        } else {
            1
        }
    }

    /// `ceil(copies / 2)`, at least 1
    pub fn binary_share(copies: u32) -> u32 {
        copies.div_ceil(2).max(1)
    }

    /// Share proportional to the peer's predictability
    ///
    /// `round(n * peer / (own + peer))` clamped to `[1, n - 1]`; an even split
    /// when neither side knows the destination.
    pub fn ratio_share(copies: u32, own: f64, peer: f64) -> u32 {
        if copies <= 1 {
            return 1;
        }
        let total = own + peer;
        if total <= 0.0 {
            return Self::binary_share(copies);
        }
        let share = (f64::from(copies) * peer / total).round() as u32;
        share.clamp(1, copies - 1)
    }

    /// Copies the sender keeps after handing out `share`
    pub fn after_handoff(copies: u32, share: u32) -> u32 {
        copies.saturating_sub(share).max(1)
    }

    /// The copy to send for `request`, carrying the handed-out share
    pub fn outgoing<I: PeerIdentity>(&self, active: &ActiveRouter<I>, request: &TransferRequest) -> Option<Message<I>> {
        let mut message = active.buffer().get(&request.message)?.clone();
        message.update_property(self.key.clone(), PropertyValue::Count(request.handoff));
        Some(message)
    }

    /// Direct deliveries to connected destinations, in queue order
    pub fn delivery_requests<I: PeerIdentity>(
        &self,
        active: &ActiveRouter<I>,
        tick: &TickContext<'_, I>,
    ) -> RoutingResult<Vec<TransferRequest>> {
        active
            .deliverable(tick)
            .into_iter()
            .map(|(message, connection)| {
                let copies = self.copies(active.host(), message)?;
                Ok(TransferRequest {
                    message: message.id().clone(),
                    connection,
                    handoff: self.receiver_share(copies),
                })
            })
            .collect()
    }

    /// File a completed incoming transfer
    ///
    /// The received copy must carry a quota. Returns the filed message and
    /// the response it asks for, if any.
    pub fn accept_transferred<I: PeerIdentity>(
        &self,
        active: &mut ActiveRouter<I>,
        ctx: &mut SimContext,
        id: &MessageId,
        from: &I,
    ) -> RoutingResult<(Received<I>, Option<Message<I>>)> {
        let message = active.take_incoming(id, from)?;
        self.copies(active.host(), &message)?;
        let received = active.file_received(ctx.now(), message);
        let response = active.response_for(ctx, &received);
        Ok((received, response))
    }

    /// Deduct the share carried by the completed transfer on `connection`
    ///
    /// Returns the copies left, or `None` when the sender dropped its copy
    /// while the transfer was running.
    pub fn settle_transfer<I: PeerIdentity>(
        &self,
        active: &mut ActiveRouter<I>,
        connection: &Connection<I>,
    ) -> RoutingResult<Option<u32>> {
        let sent = connection
            .message()
            .ok_or(oppnet_core::TransferError::NothingInFlight(connection.id()))?;
        let host = active.host().clone();
        let share = self.copies(&host, sent)?;

        let Some(message) = active.buffer_mut().get_mut(sent.id()) else {
            trace!(host = %host, message = %sent.id(), "copy dropped during transfer");
            return Ok(None);
        };
        let copies = self.copies(&host, message)?;
        let left = Self::after_handoff(copies, share);
        message.update_property(self.key.clone(), PropertyValue::Count(left));
        trace!(host = %host, message = %sent.id(), copies, share, left, "quota settled");
        Ok(Some(left))
    }
}
