//! # oppnet routing
//!
//! Replication-quota routers for opportunistic networks.
//!
//! Hosts only exchange messages while a contact is up, so every router here
//! decides per tick which of its buffered messages to push over which live
//! connection, and how many copies of each message the receiver may spread.
//!
//! ## Routers
//!
//! - [`SprayAndWaitRouter`]: fixed copy budget, sprayed to every contact
//! - [`ProphetSprayRouter`]: copy budget steered by PRoPHET delivery
//!   predictability
//! - [`UtilitySprayRouter`]: copy budget steered by buffer/delivery utility
//!
//! ## Architecture
//!
//! - [`router`]: the [`MessageRouter`] trait and the read-only peer view
//! - [`active`]: buffering, receive checks and transfer bookkeeping shared by
//!   all routers
//! - [`quota`]: copy-count bookkeeping and split rules
//! - [`prophet`]: the delivery predictor
//! - [`utility`]: utility computation and candidate ranking
//! - [`network`]: drives a set of routers over a shared connection table
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use oppnet_core::{HostId, LinkModel, SimTime};
//! use oppnet_routing::{Network, RoutingConfig};
//!
//! let mut network = Network::new(RoutingConfig::prophet_spray())?;
//! network.add_hosts(HostId::range(4))?;
//! let link = network.connect(&HostId(0), &HostId(1), LinkModel::ConstantBitRate { speed: 250_000.0 })?;
//! network.create_message(&HostId(0), &HostId(3), "M1", 1_000, 0)?;
//! network.tick(SimTime::from_secs(1.0))?;
//! ```

pub mod active;
pub mod buffer;
pub mod error;
pub mod network;
pub mod prophet;
pub mod propose;
pub mod queue;
pub mod quota;
pub mod router;
pub mod spray;
pub mod spray_utility;
pub mod utility;

// Re-export main types
pub use active::{ActiveRouter, RouterSettings};
pub use buffer::MessageBuffer;
pub use error::{ConfigError, RoutingError, RoutingResult};
pub use network::{Network, NetworkEvent};
pub use prophet::{DeliveryPredictor, PredictorConfig, PredictorSummary};
pub use propose::{ProphetSprayRouter, ReplicationPolicy};
pub use queue::QueueMode;
pub use quota::{QuotaConfig, SprayQuota};
pub use router::{
    ContactSnapshot, MessageRouter, PeerDirectory, Protocol, RouterView, TickContext, TransferRequest,
};
pub use spray::SprayAndWaitRouter;
pub use spray_utility::UtilitySprayRouter;
pub use utility::{Candidate, DeliveryStats, UtilityRanker, UtilityWeights};

use oppnet_core::{PeerIdentity, TtlUnit};
use serde::{Deserialize, Serialize};

/// Which router every host runs, with its protocol-specific settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouterKind {
    SprayAndWait,
    ProphetSpray {
        predictor: PredictorConfig,
        #[serde(default)]
        policy: ReplicationPolicy,
    },
    UtilitySpray {
        #[serde(default)]
        weights: UtilityWeights,
    },
}

impl RouterKind {
    pub fn protocol(&self) -> Protocol {
        match self {
            RouterKind::SprayAndWait => Protocol::SprayAndWait,
            RouterKind::ProphetSpray { .. } => Protocol::ProphetSpray,
            RouterKind::UtilitySpray { .. } => Protocol::UtilitySpray,
        }
    }
}

/// Configuration shared by every host of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Buffering and queueing
    #[serde(default)]
    pub router: RouterSettings,
    /// Copy budget
    #[serde(default)]
    pub quota: QuotaConfig,
    /// Router variant
    pub protocol: RouterKind,
    /// Unit of message TTLs
    #[serde(default)]
    pub ttl_unit: TtlUnit,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self::prophet_spray()
    }
}

impl RoutingConfig {
    /// Plain spray-and-wait with binary splitting
    pub fn spray_and_wait() -> Self {
        Self {
            router: RouterSettings::default(),
            quota: QuotaConfig::default(),
            protocol: RouterKind::SprayAndWait,
            ttl_unit: TtlUnit::Minutes,
        }
    }

    /// Predictability-steered spray with default PRoPHET constants
    pub fn prophet_spray() -> Self {
        Self {
            protocol: RouterKind::ProphetSpray {
                predictor: PredictorConfig::default(),
                policy: ReplicationPolicy::QuotaSplit,
            },
            ..Self::spray_and_wait()
        }
    }

    /// Utility-ranked spray with default weights
    pub fn utility_spray() -> Self {
        Self {
            protocol: RouterKind::UtilitySpray {
                weights: UtilityWeights::default(),
            },
            ..Self::spray_and_wait()
        }
    }

    /// Small buffers, few copies, delivered copies released
    pub fn resource_constrained() -> Self {
        Self {
            router: RouterSettings {
                buffer_size: 500_000,
                msg_ttl: Some(60),
                delete_delivered: true,
                ..RouterSettings::default()
            },
            quota: QuotaConfig {
                initial_copies: 2,
                binary: true,
            },
            ..Self::prophet_spray()
        }
    }

    /// Validate configuration invariants
    ///
    /// Returns every problem found; an empty list means the configuration is
    /// usable. Fatal entries make [`RoutingConfig::build`] refuse to run.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.quota.initial_copies == 0 {
            warnings.push(ConfigWarning::ZeroInitialCopies);
        } else if self.quota.initial_copies == 1 {
            warnings.push(ConfigWarning::SingleCopySpray);
        }

        if self.router.buffer_size == 0 {
            warnings.push(ConfigWarning::ZeroBufferSize);
        }

        match &self.protocol {
            RouterKind::SprayAndWait => {}
            RouterKind::ProphetSpray { predictor, .. } => {
                if !(0.0..=1.0).contains(&predictor.p_init) {
                    warnings.push(ConfigWarning::PInitOutOfRange);
                }
                if !(0.0..=1.0).contains(&predictor.beta) {
                    warnings.push(ConfigWarning::BetaOutOfRange);
                }
                if !(predictor.gamma > 0.0 && predictor.gamma <= 1.0) {
                    warnings.push(ConfigWarning::GammaOutOfRange);
                }
                if predictor.seconds_in_time_unit == 0 {
                    warnings.push(ConfigWarning::ZeroSecondsInTimeUnit);
                }
            }
            RouterKind::UtilitySpray { weights } => {
                if !weights.sums_to_one() {
                    warnings.push(ConfigWarning::WeightsDoNotSumToOne);
                }
            }
        }

        warnings
    }

    /// Check if the configuration has no problems at all
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    /// Router for `host` built from this configuration
    pub fn build<I: PeerIdentity>(&self, host: I) -> Result<Box<dyn MessageRouter<I>>, ConfigError> {
        if let Some(fatal) = self.validate().into_iter().find(ConfigWarning::is_fatal) {
            return Err(ConfigError::Rejected(fatal));
        }

        let router: Box<dyn MessageRouter<I>> = match self.protocol {
            RouterKind::SprayAndWait => Box::new(SprayAndWaitRouter::new(host, self.router, self.quota)),
            RouterKind::ProphetSpray { predictor, policy } => Box::new(ProphetSprayRouter::new(
                host,
                self.router,
                self.quota,
                predictor,
                policy,
            )),
            RouterKind::UtilitySpray { weights } => {
                Box::new(UtilitySprayRouter::new(host, self.router, self.quota, weights))
            }
        };
        Ok(router)
    }
}

/// Configuration warnings and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Messages would start without any copy
    ZeroInitialCopies,
    /// One initial copy turns spraying into direct delivery only
    SingleCopySpray,
    /// Buffers cannot hold anything
    ZeroBufferSize,
    /// Encounter gain outside [0, 1]
    PInitOutOfRange,
    /// Transitivity scaling outside [0, 1]
    BetaOutOfRange,
    /// Aging factor outside (0, 1]
    GammaOutOfRange,
    /// Aging unit of zero seconds
    ZeroSecondsInTimeUnit,
    /// Utility weights do not add up to 1
    WeightsDoNotSumToOne,
}

impl ConfigWarning {
    /// Whether routers cannot run with this setting
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ConfigWarning::SingleCopySpray)
    }
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::ZeroInitialCopies => write!(f, "initial_copies must be positive"),
            ConfigWarning::SingleCopySpray => {
                write!(f, "initial_copies of 1 disables spraying")
            }
            ConfigWarning::ZeroBufferSize => write!(f, "buffer_size is zero"),
            ConfigWarning::PInitOutOfRange => write!(f, "p_init must be within [0, 1]"),
            ConfigWarning::BetaOutOfRange => write!(f, "beta must be within [0, 1]"),
            ConfigWarning::GammaOutOfRange => write!(f, "gamma must be within (0, 1]"),
            ConfigWarning::ZeroSecondsInTimeUnit => {
                write!(f, "seconds_in_time_unit must be positive")
            }
            ConfigWarning::WeightsDoNotSumToOne => {
                write!(f, "utility weights must sum to 1")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oppnet_core::HostId;

    fn make_id(n: u32) -> HostId {
        HostId::new(n)
    }

    #[test]
    fn test_default_config() {
        let config = RoutingConfig::default();
        assert_eq!(config.quota.initial_copies, 6);
        assert!(config.quota.binary);
        assert_eq!(config.protocol.protocol(), Protocol::ProphetSpray);
        assert_eq!(config.ttl_unit, TtlUnit::Minutes);
    }

    #[test]
    fn test_preset_configs_are_valid() {
        assert!(RoutingConfig::spray_and_wait().is_valid());
        assert!(RoutingConfig::prophet_spray().is_valid());
        assert!(RoutingConfig::utility_spray().is_valid());
        assert!(RoutingConfig::resource_constrained().is_valid());
    }

    #[test]
    fn test_invalid_config_detected() {
        let mut config = RoutingConfig::utility_spray();
        config.protocol = RouterKind::UtilitySpray {
            weights: UtilityWeights {
                buffer: 0.5,
                delivery: 0.6,
            },
        };
        config.quota.initial_copies = 0;

        let warnings = config.validate();
        assert!(warnings.contains(&ConfigWarning::WeightsDoNotSumToOne));
        assert!(warnings.contains(&ConfigWarning::ZeroInitialCopies));
    }

    #[test]
    fn test_predictor_ranges_checked() {
        let mut config = RoutingConfig::prophet_spray();
        config.protocol = RouterKind::ProphetSpray {
            predictor: PredictorConfig {
                beta: 1.5,
                seconds_in_time_unit: 0,
                ..PredictorConfig::default()
            },
            policy: ReplicationPolicy::QuotaSplit,
        };

        let warnings = config.validate();
        assert_eq!(
            warnings,
            vec![ConfigWarning::BetaOutOfRange, ConfigWarning::ZeroSecondsInTimeUnit]
        );
    }

    #[test]
    fn test_build_rejects_fatal_warnings() {
        let mut config = RoutingConfig::spray_and_wait();
        config.quota.initial_copies = 0;
        let err = config.build(make_id(0)).err().unwrap();
        assert!(matches!(err, ConfigError::Rejected(ConfigWarning::ZeroInitialCopies)));

        // Non-fatal warnings still build
        config.quota.initial_copies = 1;
        let router = config.build(make_id(0)).unwrap();
        assert_eq!(router.protocol(), Protocol::SprayAndWait);
    }

    #[test]
    fn test_build_each_kind() {
        for config in [
            RoutingConfig::spray_and_wait(),
            RoutingConfig::prophet_spray(),
            RoutingConfig::utility_spray(),
        ] {
            let router = config.build(make_id(4)).unwrap();
            assert_eq!(router.protocol(), config.protocol.protocol());
            assert_eq!(router.host(), &make_id(4));
        }
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "quota": { "initial_copies": 8, "binary": false },
            "protocol": { "kind": "prophet_spray", "predictor": { "seconds_in_time_unit": 30 } },
            "ttl_unit": "seconds"
        }"#;
        let config: RoutingConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.quota.initial_copies, 8);
        assert!(!config.quota.binary);
        assert_eq!(config.ttl_unit, TtlUnit::Seconds);
        assert_eq!(config.router, RouterSettings::default());
        match config.protocol {
            RouterKind::ProphetSpray { predictor, policy } => {
                assert_eq!(predictor.beta, 0.25);
                assert_eq!(policy, ReplicationPolicy::QuotaSplit);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_seconds_in_time_unit_required() {
        let json = r#"{ "protocol": { "kind": "prophet_spray", "predictor": {} } }"#;
        assert!(serde_json::from_str::<RoutingConfig>(json).is_err());
    }
}
