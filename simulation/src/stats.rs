//! Run statistics built from network events

use std::fmt;

use oppnet_core::PeerIdentity;
use oppnet_routing::NetworkEvent;
use serde::Serialize;

/// Counters of a simulation run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimStats {
    pub contacts: u64,
    pub created: u64,
    pub started: u64,
    /// Completed transfers, deliveries included
    pub relayed: u64,
    pub aborted: u64,
    /// Messages evicted for room
    pub dropped: u64,
    /// Messages whose TTL ran out
    pub expired: u64,
    /// First arrivals at the destination
    pub delivered: u64,
    /// Sum of creation-to-delivery seconds
    pub total_latency: f64,
    /// Sum of hop counts of delivered messages
    pub total_hops: u64,
}

impl SimStats {
    /// Count one network event
    pub fn record<I: PeerIdentity>(&mut self, event: &NetworkEvent<I>) {
        match event {
            NetworkEvent::ContactUp { .. } => self.contacts += 1,
            NetworkEvent::ContactDown { .. } => {}
            NetworkEvent::Created { .. } => self.created += 1,
            NetworkEvent::TransferStarted { .. } => self.started += 1,
            NetworkEvent::TransferAborted { .. } => self.aborted += 1,
            NetworkEvent::Relayed {
                time,
                first_delivery,
                hop_count,
                created_at,
                ..
            } => {
                self.relayed += 1;
                if *first_delivery {
                    self.delivered += 1;
                    self.total_latency += time.since(*created_at);
                    self.total_hops += *hop_count as u64;
                }
            }
            NetworkEvent::Dropped { expired: true, .. } => self.expired += 1,
            NetworkEvent::Dropped { expired: false, .. } => self.dropped += 1,
        }
    }

    /// Delivered over created; 0 when nothing was created
    pub fn delivery_ratio(&self) -> f64 {
        if self.created == 0 {
            0.0
        } else {
            self.delivered as f64 / self.created as f64
        }
    }

    /// Relays that were not deliveries, per delivery
    pub fn overhead_ratio(&self) -> Option<f64> {
        (self.delivered > 0)
            .then(|| (self.relayed - self.delivered) as f64 / self.delivered as f64)
    }

    /// Mean seconds from creation to first delivery
    pub fn average_latency(&self) -> Option<f64> {
        (self.delivered > 0).then(|| self.total_latency / self.delivered as f64)
    }

    pub fn average_hop_count(&self) -> Option<f64> {
        (self.delivered > 0).then(|| self.total_hops as f64 / self.delivered as f64)
    }
}

fn optional(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}"))
}

impl fmt::Display for SimStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "contacts:          {}", self.contacts)?;
        writeln!(f, "created:           {}", self.created)?;
        writeln!(f, "started:           {}", self.started)?;
        writeln!(f, "relayed:           {}", self.relayed)?;
        writeln!(f, "aborted:           {}", self.aborted)?;
        writeln!(f, "dropped:           {}", self.dropped)?;
        writeln!(f, "expired:           {}", self.expired)?;
        writeln!(f, "delivered:         {}", self.delivered)?;
        writeln!(f, "delivery ratio:    {:.4}", self.delivery_ratio())?;
        writeln!(f, "overhead ratio:    {}", optional(self.overhead_ratio()))?;
        writeln!(f, "average latency:   {}", optional(self.average_latency()))?;
        write!(f, "average hop count: {}", optional(self.average_hop_count()))
    }
}
