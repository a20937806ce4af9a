//! Delivery predictability estimation
//!
//! Each host keeps, per destination, the probability that it will be able to
//! deliver a message there. The table follows the PRoPHET rules:
//!
//! - **Encounter**: meeting P raises `P(self,P)` towards 1 by `p_init`
//! - **Transitivity**: if P is likely to meet Q, so are we, scaled by `beta`
//! - **Aging**: every entry decays by `gamma` per elapsed time unit
//!
//! Aging is lazy. Reads return the value aged to the requested time without
//! touching the table; the table itself is aged just before every write.

use std::collections::HashMap;

use oppnet_core::{PeerIdentity, SimTime};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Predictor constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Gain on direct encounter (P_init)
    #[serde(default = "default_p_init")]
    pub p_init: f64,

    /// Transitivity scaling (beta)
    #[serde(default = "default_beta")]
    pub beta: f64,

    /// Decay per time unit (gamma)
    #[serde(default = "default_gamma")]
    pub gamma: f64,

    /// Seconds in one aging time unit
    pub seconds_in_time_unit: u32,
}

fn default_p_init() -> f64 {
    0.75
}

fn default_beta() -> f64 {
    0.25
}

fn default_gamma() -> f64 {
    0.98
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            p_init: default_p_init(),
            beta: default_beta(),
            gamma: default_gamma(),
            seconds_in_time_unit: 30,
        }
    }
}

/// Delivery predictability table of one host
#[derive(Debug, Clone)]
pub struct DeliveryPredictor<I: PeerIdentity> {
    local: I,
    config: PredictorConfig,
    preds: HashMap<I, f64>,
    last_aging: SimTime,
}

impl<I: PeerIdentity> DeliveryPredictor<I> {
    pub fn new(local: I, config: PredictorConfig) -> Self {
        Self {
            local,
            config,
            preds: HashMap::new(),
            last_aging: SimTime::ZERO,
        }
    }

    pub fn local(&self) -> &I {
        &self.local
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Decay factor accumulated between the last aging and `now`
    fn aging_factor(&self, now: SimTime) -> f64 {
        let elapsed = now.since(self.last_aging);
        if elapsed <= 0.0 {
            return 1.0;
        }
        let units = elapsed / f64::from(self.config.seconds_in_time_unit);
        self.config.gamma.powf(units)
    }

    /// Apply pending decay to every entry
    pub fn age(&mut self, now: SimTime) {
        if now <= self.last_aging {
            return;
        }
        let factor = self.aging_factor(now);
        for value in self.preds.values_mut() {
            *value *= factor;
        }
        self.last_aging = now;
    }

    /// Predictability towards `destination` at `now`, 0 if unknown
    pub fn predictability(&self, destination: &I, now: SimTime) -> f64 {
        self.preds
            .get(destination)
            .map(|p| p * self.aging_factor(now))
            .unwrap_or(0.0)
    }

    /// Record a direct encounter with `peer`
    pub fn encounter(&mut self, peer: &I, now: SimTime) -> f64 {
        if *peer == self.local {
            return 0.0;
        }
        self.age(now);

        let old = self.preds.get(peer).copied().unwrap_or(0.0);
        let new = old + (1.0 - old) * self.config.p_init;
        self.preds.insert(peer.clone(), new);
        trace!(host = %self.local, peer = %peer, old, new, "encounter");
        new
    }

    /// Fold in the table of `intermediary`, met at `now`
    ///
    /// `intermediary_preds` must be read before either side of the contact
    /// updated its table.
    pub fn transitive_update(&mut self, intermediary: &I, intermediary_preds: &[(I, f64)], now: SimTime) {
        self.age(now);
        let p_ab = self.preds.get(intermediary).copied().unwrap_or(0.0);
        if p_ab == 0.0 {
            return;
        }

        for (destination, p_bc) in intermediary_preds {
            if *destination == self.local || destination == intermediary {
                continue;
            }
            let old = self.preds.get(destination).copied().unwrap_or(0.0);
            let new = old + (1.0 - old) * p_ab * p_bc * self.config.beta;
            self.preds.insert(destination.clone(), new);
        }
    }

    /// All entries aged to `now`, ordered by destination
    pub fn snapshot(&self, now: SimTime) -> Vec<(I, f64)> {
        let factor = self.aging_factor(now);
        let mut entries: Vec<_> = self.preds.iter().map(|(id, p)| (id.clone(), p * factor)).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn summary(&self, now: SimTime) -> PredictorSummary<I> {
        PredictorSummary {
            host: self.local.clone(),
            predictabilities: self.snapshot(now),
        }
    }

    pub fn known_destinations(&self) -> usize {
        self.preds.len()
    }

    pub fn clear(&mut self) {
        self.preds.clear();
    }
}

/// Exported table of a host, for reporting
#[derive(Debug, Clone, Serialize)]
pub struct PredictorSummary<I: PeerIdentity> {
    pub host: I,
    pub predictabilities: Vec<(I, f64)>,
}
