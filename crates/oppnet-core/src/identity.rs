//! Host identity abstractions
//!
//! This module provides the [`PeerIdentity`] trait that the routing layer is
//! generic over, and [`HostId`], the numeric handle the simulator uses.

use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::str::FromStr;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::IdentityError;

/// Trait for host identity abstraction
///
/// Identities must be totally ordered so that every per-tick iteration over
/// hosts and contacts is deterministic.
pub trait PeerIdentity:
    Clone + Eq + Ord + Hash + Send + Sync + Debug + Display + Serialize + DeserializeOwned + 'static
{
    /// Get a short display form (for logging)
    fn short_id(&self) -> String {
        format!("{}", self)
    }
}

/// Numeric host handle
///
/// Displayed as `n<index>`; parses from either `n<index>` or `<index>`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[display("n{_0}")]
#[serde(transparent)]
pub struct HostId(pub u32);

impl HostId {
    /// Create a host id from its index
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Generate ids `n0..n{count-1}`
    pub fn range(count: u32) -> Vec<Self> {
        (0..count).map(Self).collect()
    }

    /// Get the underlying index
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl FromStr for HostId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('n').unwrap_or(s);
        digits
            .parse::<u32>()
            .map(Self)
            .map_err(|_| IdentityError::InvalidFormat(s.to_string()))
    }
}

impl PeerIdentity for HostId {
    fn short_id(&self) -> String {
        self.0.to_string()
    }
}
