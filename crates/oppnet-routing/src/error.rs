//! Routing error types

use oppnet_core::{ConnectionId, MessageError, MessageId, TransferError};
use thiserror::Error;

use crate::router::Protocol;
use crate::ConfigWarning;

/// Errors raised by routers and the network driving them
///
/// Apart from [`RoutingError::Config`], every variant is a broken contract
/// between collaborators. The simulation stops when one surfaces.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// A carried message has no replication quota
    #[error("Message {message} at {host} has no copies property")]
    MissingQuota { host: String, message: MessageId },

    /// Peer runs a different protocol than the exchange requires
    #[error("{host} expected a {expected} peer but {peer} runs {found}")]
    ProtocolMismatch {
        host: String,
        peer: String,
        expected: Protocol,
        found: Protocol,
    },

    /// Completion reported for a message that was never accepted
    #[error("No incoming message {message} from {from} at {host}")]
    NotIncoming {
        host: String,
        message: MessageId,
        from: String,
    },

    #[error("Unknown host: {0}")]
    UnknownHost(String),

    #[error("Host already has a router: {0}")]
    DuplicateHost(String),

    #[error("Contact of {0} with itself")]
    SelfContact(String),

    /// Link speed that is not a positive, finite number of bytes per second
    #[error("Invalid link speed: {0} B/s")]
    InvalidLinkSpeed(f64),

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting that makes the router unusable
    #[error("Rejected configuration: {0}")]
    Rejected(ConfigWarning),
}

/// Result type for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;
