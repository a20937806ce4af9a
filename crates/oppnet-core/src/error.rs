//! Error types for oppnet core

use thiserror::Error;

use crate::connection::ConnectionId;
use crate::message::{MessageId, PropertyKey};

/// Top-level error type for the core crate
#[derive(Debug, Error)]
pub enum OppnetError {
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),
}

/// Errors related to host identity
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid host identity: {0}")]
    InvalidFormat(String),
}

/// Errors raised by the message entity
#[derive(Debug, Error)]
pub enum MessageError {
    /// Two protocols tried to claim the same metadata key
    #[error("Message {message} already contains a value for key {key}")]
    DuplicateProperty { message: MessageId, key: PropertyKey },
}

/// Contract violations on a transfer link
///
/// These never happen when the link is driven correctly; a caller seeing one
/// has a bug in its transfer bookkeeping.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Finalize or abort was called while the link was idle
    #[error("No message in flight on connection {0}")]
    NothingInFlight(ConnectionId),
}
