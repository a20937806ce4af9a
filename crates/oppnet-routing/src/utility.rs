//! Utility-based ranking
//!
//! A host's utility blends how much buffer it has left with how much of what
//! it received it managed to pass on:
//!
//! ```text
//! utility = w_buffer * free / capacity + w_delivery * min(1, forwarded / received)
//! ```
//!
//! The delivery term is 0 until the host has received anything.

use std::collections::HashMap;

use oppnet_core::{ConnectionId, Message, PeerIdentity};
use serde::{Deserialize, Serialize};

use crate::queue::QueueMode;

/// Weights of the two utility terms; must sum to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtilityWeights {
    #[serde(default = "default_buffer_weight")]
    pub buffer: f64,
    #[serde(default = "default_delivery_weight")]
    pub delivery: f64,
}

fn default_buffer_weight() -> f64 {
    0.75
}

fn default_delivery_weight() -> f64 {
    0.25
}

impl Default for UtilityWeights {
    fn default() -> Self {
        Self {
            buffer: default_buffer_weight(),
            delivery: default_delivery_weight(),
        }
    }
}

impl UtilityWeights {
    pub fn sums_to_one(&self) -> bool {
        (self.buffer + self.delivery - 1.0).abs() < 1e-9
    }
}

/// Byte counters feeding the delivery term
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    /// Bytes of every accepted incoming message
    pub received_bytes: u64,
    /// Bytes of every completed outgoing transfer
    pub forwarded_bytes: u64,
}

impl DeliveryStats {
    pub fn record_received(&mut self, bytes: u64) {
        self.received_bytes += bytes;
    }

    pub fn record_forwarded(&mut self, bytes: u64) {
        self.forwarded_bytes += bytes;
    }

    /// `min(1, forwarded / received)`, 0 when nothing was received
    pub fn delivery_ratio(&self) -> f64 {
        if self.received_bytes == 0 {
            return 0.0;
        }
        (self.forwarded_bytes as f64 / self.received_bytes as f64).min(1.0)
    }
}

/// A (message, link) pair proposed for forwarding
#[derive(Debug, Clone)]
pub struct Candidate<'a, I: PeerIdentity> {
    pub message: &'a Message<I>,
    pub connection: ConnectionId,
    pub copies: u32,
    pub remote_utility: f64,
}

/// Computes utilities and orders forwarding candidates
#[derive(Debug, Clone)]
pub struct UtilityRanker<I: PeerIdentity> {
    weights: UtilityWeights,
    cache: HashMap<I, f64>,
}

impl<I: PeerIdentity> UtilityRanker<I> {
    pub fn new(weights: UtilityWeights) -> Self {
        Self {
            weights,
            cache: HashMap::new(),
        }
    }

    pub fn weights(&self) -> &UtilityWeights {
        &self.weights
    }

    /// Utility of a host with the given buffer state and counters
    pub fn utility(&self, free_bytes: u64, capacity: u64, stats: &DeliveryStats) -> f64 {
        let buffer_ratio = if capacity == 0 {
            0.0
        } else {
            free_bytes as f64 / capacity as f64
        };
        self.weights.buffer * buffer_ratio + self.weights.delivery * stats.delivery_ratio()
    }

    /// Store a freshly computed local utility for `destination`
    pub fn refresh(&mut self, destination: &I, value: f64) -> f64 {
        self.cache.insert(destination.clone(), value);
        value
    }

    /// Last local utility computed for `destination`
    pub fn cached(&self, destination: &I) -> Option<f64> {
        self.cache.get(destination).copied()
    }

    /// Forget cached values; they are only valid within one update
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Order candidates by descending remote utility, ties by queue mode
    pub fn rank(&self, candidates: &mut [Candidate<'_, I>], queue: QueueMode) {
        candidates.sort_by(|a, b| {
            b.remote_utility
                .total_cmp(&a.remote_utility)
                .then_with(|| queue.compare(a.message, b.message))
                .then_with(|| a.connection.cmp(&b.connection))
        });
    }
}
