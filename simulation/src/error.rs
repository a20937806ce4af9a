//! Simulation error types

use std::path::PathBuf;

use oppnet_core::HostId;
use oppnet_routing::{ConfigError, RoutingError};
use thiserror::Error;

/// Problems with a scenario description
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Cannot read scenario file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid scenario JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Scenario has no hosts")]
    NoHosts,

    #[error("Host {host} is outside the scenario's {hosts} hosts")]
    UnknownHost { host: HostId, hosts: u32 },

    #[error("Contact of {0} with itself")]
    SelfContact(HostId),

    #[error("Event time {0} is negative or not a number")]
    InvalidTime(f64),

    #[error("Tick interval must be positive, got {0}")]
    InvalidTickInterval(f64),

    #[error("Link speed must be positive, got {0}")]
    InvalidLinkSpeed(f64),
}

/// Errors that stop a simulation run
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Scenario error: {0}")]
    Scenario(#[from] ScenarioError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),
}

/// Result type for simulation operations
pub type SimResult<T> = Result<T, SimError>;
