//! Bounded message buffer

use std::collections::BTreeMap;

use oppnet_core::{Message, MessageId, PeerIdentity};

/// Messages carried by a host, bounded by a byte capacity
#[derive(Debug, Clone)]
pub struct MessageBuffer<I: PeerIdentity> {
    capacity: u64,
    used: u64,
    messages: BTreeMap<MessageId, Message<I>>,
}

impl<I: PeerIdentity> MessageBuffer<I> {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            used: 0,
            messages: BTreeMap::new(),
        }
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Unoccupied bytes
    pub fn free_bytes(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.contains_key(id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message<I>> {
        self.messages.get(id)
    }

    pub fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message<I>> {
        self.messages.get_mut(id)
    }

    /// Messages in id order
    pub fn iter(&self) -> impl Iterator<Item = &Message<I>> {
        self.messages.values()
    }

    /// Store a message, replacing any message with the same id
    pub fn insert(&mut self, message: Message<I>) {
        self.used += message.size();
        if let Some(old) = self.messages.insert(message.id().clone(), message) {
            self.used -= old.size();
        }
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<Message<I>> {
        let message = self.messages.remove(id)?;
        self.used -= message.size();
        Some(message)
    }

    /// Evict messages until `size` bytes are free
    ///
    /// Oldest-received messages go first; messages for which `in_use` holds
    /// are never evicted. Returns `None` without evicting anything when enough
    /// room cannot be made.
    pub fn make_room_for<F>(&mut self, size: u64, in_use: F) -> Option<Vec<Message<I>>>
    where
        F: Fn(&MessageId) -> bool,
    {
        if size > self.capacity {
            return None;
        }
        if self.free_bytes() >= size {
            return Some(Vec::new());
        }

        let mut candidates: Vec<&Message<I>> =
            self.messages.values().filter(|m| !in_use(m.id())).collect();
        candidates.sort_by(|a, b| {
            a.received_at()
                .total_cmp(&b.received_at())
                .then_with(|| a.cmp_by_id(b))
        });

        let mut free = self.free_bytes();
        let mut victims = Vec::new();
        for message in candidates {
            if free >= size {
                break;
            }
            free += message.size();
            victims.push(message.id().clone());
        }
        if free < size {
            return None;
        }

        Some(victims.iter().filter_map(|id| self.remove(id)).collect())
    }
}
