//! Send-queue ordering
//!
//! Routers hand the network their transfer candidates in queue order. In
//! random mode the order is a shuffle seeded by the current simulated time, so
//! two runs of the same scenario produce the same transfers.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use oppnet_core::{Message, PeerIdentity, SimTime};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

/// Order in which buffered messages are offered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    /// Time-seeded shuffle
    #[default]
    Random,
    /// Oldest received first
    Fifo,
}

impl QueueMode {
    /// Sort `items` in place, reading each item's message through `message`
    pub fn sort_by_message<T, I, F>(&self, items: &mut [T], now: SimTime, message: F)
    where
        I: PeerIdentity,
        F: Fn(&T) -> &Message<I>,
    {
        match self {
            QueueMode::Random => {
                // Shuffle from a stable starting order
                items.sort_by(|a, b| message(a).cmp_by_id(message(b)));
                let mut rng = StdRng::seed_from_u64(now.as_secs() as u64);
                items.shuffle(&mut rng);
            }
            QueueMode::Fifo => {
                items.sort_by(|a, b| self.compare(message(a), message(b)));
            }
        }
    }

    /// Sort a list of messages
    pub fn sort<I: PeerIdentity>(&self, messages: &mut [&Message<I>], now: SimTime) {
        self.sort_by_message(messages, now, |m| *m);
    }

    /// Tie-breaking comparison between two messages
    pub fn compare<I: PeerIdentity>(&self, a: &Message<I>, b: &Message<I>) -> Ordering {
        match self {
            QueueMode::Random => random_key(a).cmp(&random_key(b)).then_with(|| a.cmp_by_id(b)),
            QueueMode::Fifo => a
                .received_at()
                .total_cmp(&b.received_at())
                .then_with(|| a.cmp_by_id(b)),
        }
    }
}

fn random_key<I: PeerIdentity>(message: &Message<I>) -> u64 {
    let mut hasher = DefaultHasher::new();
    message.id().hash(&mut hasher);
    message.unique_id().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use oppnet_core::{HostId, SimContext, TtlUnit};

    fn make_message(ctx: &mut SimContext, id: &str, at: f64) -> Message<HostId> {
        ctx.advance_to(SimTime::from_secs(at));
        Message::new(ctx, HostId(0), HostId(1), id, 10)
    }

    #[test]
    fn test_fifo_orders_by_receive_time() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let a = make_message(&mut ctx, "Z", 1.0);
        let b = make_message(&mut ctx, "A", 2.0);
        let c = make_message(&mut ctx, "M", 3.0);

        let mut messages = vec![&c, &a, &b];
        QueueMode::Fifo.sort(&mut messages, SimTime::ZERO);
        let ids: Vec<_> = messages.iter().map(|m| m.id().as_str()).collect();
        assert_eq!(ids, vec!["Z", "A", "M"]);
    }

    #[test]
    fn test_random_is_deterministic_per_time() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let owned: Vec<_> = (0..20)
            .map(|i| make_message(&mut ctx, &format!("M{i}"), 0.0))
            .collect();

        let mut first: Vec<_> = owned.iter().collect();
        let mut second: Vec<_> = owned.iter().rev().collect();
        QueueMode::Random.sort(&mut first, SimTime::from_secs(42.0));
        QueueMode::Random.sort(&mut second, SimTime::from_secs(42.0));

        let a: Vec<_> = first.iter().map(|m| m.id().clone()).collect();
        let b: Vec<_> = second.iter().map(|m| m.id().clone()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_compare_is_total() {
        let mut ctx = SimContext::new(TtlUnit::Minutes);
        let a = make_message(&mut ctx, "A", 0.0);
        let b = make_message(&mut ctx, "B", 0.0);

        for mode in [QueueMode::Random, QueueMode::Fifo] {
            assert_eq!(mode.compare(&a, &a), Ordering::Equal);
            assert_eq!(mode.compare(&a, &b), mode.compare(&b, &a).reverse());
        }
    }
}
