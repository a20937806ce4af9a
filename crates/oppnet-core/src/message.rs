//! The message entity
//!
//! A [`Message`] has an immutable identity (`id`, endpoints, size) shared by
//! all of its replicas and a per-instance `unique_id`. Routing protocols hang
//! their own bookkeeping off the message through typed properties, keyed by a
//! protocol namespace so that two protocols cannot clobber each other.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SimTime};
use crate::context::{SimContext, TtlUnit};
use crate::error::MessageError;
use crate::identity::PeerIdentity;

/// Prefix of response message ids
const RESPONSE_PREFIX: &str = "R_";

/// Message identifier, shared by every replica of a message
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Arc<str>);

impl MessageId {
    /// Create an id from a string
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id of the response to this message
    pub fn response_id(&self) -> MessageId {
        MessageId::new(format!("{RESPONSE_PREFIX}{}", self.0))
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Key of a message property
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// Replication quota owned by the protocol with this namespace
    Copies(&'static str),
    /// Free-form key
    Named(Arc<str>),
}

impl PropertyKey {
    /// Free-form key
    pub fn named(name: impl AsRef<str>) -> Self {
        Self::Named(Arc::from(name.as_ref()))
    }
}

impl Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Copies(namespace) => write!(f, "{namespace}.copies"),
            PropertyKey::Named(name) => f.write_str(name),
        }
    }
}

/// Value of a message property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Count(u32),
    Real(f64),
    Flag(bool),
    Text(Arc<str>),
}

/// Remaining time-to-live of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Infinite,
    /// Remaining TTL in the run's unit; may be negative
    Remaining(i64),
}

impl Ttl {
    /// Whether the TTL has run out (zero or below)
    pub fn is_expired(&self) -> bool {
        matches!(self, Ttl::Remaining(left) if *left <= 0)
    }
}

/// A message travelling through the network
#[derive(Debug, Clone)]
pub struct Message<I: PeerIdentity> {
    id: MessageId,
    unique_id: u64,
    from: I,
    to: I,
    size: u64,
    path: Vec<I>,
    created_at: SimTime,
    received_at: SimTime,
    initial_ttl: Option<u32>,
    response_size: u64,
    request: Option<MessageId>,
    app_id: Option<Arc<str>>,
    properties: Option<HashMap<PropertyKey, PropertyValue>>,
}

impl<I: PeerIdentity> Message<I> {
    /// Create a message at `from`, addressed to `to`
    ///
    /// The origin is the first entry of the path and the TTL is infinite
    /// until set.
    pub fn new(ctx: &mut SimContext, from: I, to: I, id: impl Into<MessageId>, size: u64) -> Self {
        let now = ctx.now();
        Self {
            id: id.into(),
            unique_id: ctx.next_unique_id(),
            path: vec![from.clone()],
            from,
            to,
            size,
            created_at: now,
            received_at: now,
            initial_ttl: None,
            response_size: 0,
            request: None,
            app_id: None,
            properties: None,
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Per-instance id, distinct for every replica
    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    pub fn from(&self) -> &I {
        &self.from
    }

    pub fn to(&self) -> &I {
        &self.to
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Append a host to the path
    pub fn add_hop(&mut self, host: I) {
        self.path.push(host);
    }

    /// Hosts visited so far, origin first
    pub fn hops(&self) -> &[I] {
        &self.path
    }

    pub fn hop_count(&self) -> usize {
        self.path.len() - 1
    }

    pub fn created_at(&self) -> SimTime {
        self.created_at
    }

    pub fn received_at(&self) -> SimTime {
        self.received_at
    }

    pub fn set_received_at(&mut self, time: SimTime) {
        self.received_at = time;
    }

    /// Initial TTL in the run's unit, `None` if infinite
    pub fn initial_ttl(&self) -> Option<u32> {
        self.initial_ttl
    }

    pub fn set_ttl(&mut self, ttl: Option<u32>) {
        self.initial_ttl = ttl;
    }

    /// Remaining TTL at `now`, truncated towards zero
    pub fn ttl(&self, now: SimTime, unit: TtlUnit) -> Ttl {
        let Some(initial) = self.initial_ttl else {
            return Ttl::Infinite;
        };
        let age = now.since(self.created_at);
        let left = match unit {
            TtlUnit::Seconds => f64::from(initial) - age,
            TtlUnit::Minutes => (f64::from(initial) * 60.0 - age) / 60.0,
        };
        Ttl::Remaining(left as i64)
    }

    /// Size of the requested response, 0 if none
    pub fn response_size(&self) -> u64 {
        self.response_size
    }

    pub fn set_response_size(&mut self, size: u64) {
        self.response_size = size;
    }

    /// Mark this message as the response to `request`
    pub fn set_request(&mut self, request: MessageId) {
        self.request = Some(request);
    }

    pub fn request(&self) -> Option<&MessageId> {
        self.request.as_ref()
    }

    pub fn is_response(&self) -> bool {
        self.request.is_some()
    }

    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }

    pub fn set_app_id(&mut self, app_id: impl AsRef<str>) {
        self.app_id = Some(Arc::from(app_id.as_ref()));
    }

    /// Add a property, failing if the key is already present
    pub fn add_property(&mut self, key: PropertyKey, value: PropertyValue) -> Result<(), MessageError> {
        if self.properties.as_ref().is_some_and(|p| p.contains_key(&key)) {
            return Err(MessageError::DuplicateProperty {
                message: self.id.clone(),
                key,
            });
        }
        self.update_property(key, value);
        Ok(())
    }

    /// Set a property, replacing any existing value
    pub fn update_property(&mut self, key: PropertyKey, value: PropertyValue) {
        self.properties.get_or_insert_with(HashMap::new).insert(key, value);
    }

    pub fn property(&self, key: &PropertyKey) -> Option<&PropertyValue> {
        self.properties.as_ref()?.get(key)
    }

    /// Get a property as a count, `None` if missing or of another type
    pub fn count_property(&self, key: &PropertyKey) -> Option<u32> {
        match self.property(key)? {
            PropertyValue::Count(n) => Some(*n),
            _ => None,
        }
    }

    /// Create a replica with a fresh unique id
    ///
    /// Every field is copied except the receive time, which is set to now.
    pub fn replicate(&self, ctx: &mut SimContext) -> Self {
        Self {
            unique_id: ctx.next_unique_id(),
            received_at: ctx.now(),
            ..self.clone()
        }
    }

    /// Compare messages by id
    pub fn cmp_by_id(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl<I: PeerIdentity> Display for Message<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::HostId;

    fn make_id(n: u32) -> HostId {
        HostId::new(n)
    }

    fn quota_key() -> PropertyKey {
        PropertyKey::Copies("SprayAndWait")
    }

    #[test]
    fn test_new_message_path_starts_at_origin() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let msg = Message::new(&mut ctx, make_id(1), make_id(2), "M1", 100);

        assert_eq!(msg.hops(), &[make_id(1)]);
        assert_eq!(msg.hop_count(), 0);
        assert_eq!(msg.ttl(SimTime::ZERO, TtlUnit::Minutes), Ttl::Infinite);
        assert!(!msg.is_response());
        assert_eq!(msg.to_string(), "M1");
    }

    #[test]
    fn test_replicate_keeps_identity() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let mut msg = Message::new(&mut ctx, make_id(1), make_id(2), "M1", 100);
        msg.add_property(quota_key(), PropertyValue::Count(6)).unwrap();

        let mut copy = msg.replicate(&mut ctx);
        assert_eq!(copy.id(), msg.id());
        assert_ne!(copy.unique_id(), msg.unique_id());
        assert_eq!(copy.size(), 100);
        assert_eq!(copy.count_property(&quota_key()), Some(6));

        copy.add_hop(make_id(3));
        assert_eq!(copy.hop_count(), 1);
        assert_eq!(msg.hop_count(), 0);
    }

    #[test]
    fn test_duplicate_property_rejected() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let mut msg = Message::new(&mut ctx, make_id(1), make_id(2), "M1", 100);
        msg.add_property(quota_key(), PropertyValue::Count(6)).unwrap();

        let err = msg.add_property(quota_key(), PropertyValue::Count(3)).unwrap_err();
        assert!(err.to_string().contains("SprayAndWait.copies"));

        msg.update_property(quota_key(), PropertyValue::Count(3));
        assert_eq!(msg.count_property(&quota_key()), Some(3));
    }

    #[test]
    fn test_count_property_type_mismatch() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let mut msg = Message::new(&mut ctx, make_id(1), make_id(2), "M1", 100);
        let key = PropertyKey::named("label");
        msg.update_property(key.clone(), PropertyValue::Text(Arc::from("x")));

        assert_eq!(msg.count_property(&key), None);
        assert_eq!(msg.count_property(&quota_key()), None);
    }

    #[test]
    fn test_ttl_minutes_truncates() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let mut msg = Message::new(&mut ctx, make_id(1), make_id(2), "M1", 100);
        msg.set_ttl(Some(2));

        assert_eq!(msg.ttl(SimTime::from_secs(30.0), TtlUnit::Minutes), Ttl::Remaining(1));
        assert_eq!(msg.ttl(SimTime::from_secs(60.0), TtlUnit::Minutes), Ttl::Remaining(1));
        assert_eq!(msg.ttl(SimTime::from_secs(120.0), TtlUnit::Minutes), Ttl::Remaining(0));
        assert!(msg.ttl(SimTime::from_secs(120.0), TtlUnit::Minutes).is_expired());
        assert_eq!(msg.ttl(SimTime::from_secs(300.0), TtlUnit::Minutes), Ttl::Remaining(-1));
    }

    #[test]
    fn test_ttl_seconds() {
        let mut ctx = SimContext::new(TtlUnit::Seconds);
        let mut msg = Message::new(&mut ctx, make_id(1), make_id(2), "M1", 100);
        msg.set_ttl(Some(10));

        assert_eq!(msg.ttl(SimTime::from_secs(4.5), TtlUnit::Seconds), Ttl::Remaining(5));
        assert!(!msg.ttl(SimTime::from_secs(9.5), TtlUnit::Seconds).is_expired());
        assert!(msg.ttl(SimTime::from_secs(10.0), TtlUnit::Seconds).is_expired());
    }

    #[test]
    fn test_ordering_by_id() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let a = Message::new(&mut ctx, make_id(1), make_id(2), "A", 1);
        let b = Message::new(&mut ctx, make_id(1), make_id(2), "B", 1);
        assert_eq!(a.cmp_by_id(&b), Ordering::Less);
        assert_eq!(MessageId::from("M7").response_id().as_str(), "R_M7");
    }
}
