//! # oppnet core
//!
//! Core types for the oppnet opportunistic-network routing stack.
//!
//! Everything in this crate is independent of any particular routing
//! protocol. The routing crate builds its routers on top of these types and
//! the simulation driver feeds them with contacts and traffic.
//!
//! ## Key Traits
//!
//! - [`PeerIdentity`]: Abstraction over host identification
//! - [`Clock`]: Source of simulated time
//! - [`TransferListener`]: The receiving side of a transfer link
//!
//! ## Key Types
//!
//! - [`HostId`]: Numeric host handle used by the simulator
//! - [`SimContext`]: Clock, unique-id allocator and TTL unit of one run
//! - [`Message`]: A message with immutable identity and typed metadata
//! - [`Connection`]: Per-contact transfer link state machine

pub mod clock;
pub mod connection;
pub mod context;
pub mod error;
pub mod identity;
pub mod message;

// Re-export main types
pub use clock::*;
pub use connection::*;
pub use context::*;
pub use error::*;
pub use identity::*;
pub use message::*;
