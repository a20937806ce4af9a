//! Per-run simulation context
//!
//! Holds the state that would otherwise be process-wide: the simulated clock,
//! the allocator for per-instance message ids and the unit in which message
//! TTLs are expressed. One context belongs to one run; call
//! [`SimContext::reset`] before reusing it for another.

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SimClock, SimTime};

/// Unit of message time-to-live values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlUnit {
    /// TTL values are seconds
    Seconds,
    /// TTL values are minutes (default)
    #[default]
    Minutes,
}

impl TtlUnit {
    /// Number of seconds in one TTL unit
    pub fn seconds(&self) -> f64 {
        match self {
            TtlUnit::Seconds => 1.0,
            TtlUnit::Minutes => 60.0,
        }
    }
}

/// Clock, unique-id allocator and TTL unit of a simulation run
#[derive(Debug, Clone, Default)]
pub struct SimContext {
    clock: SimClock,
    next_unique_id: u64,
    ttl_unit: TtlUnit,
}

impl SimContext {
    /// Create a context at time zero
    pub fn new(ttl_unit: TtlUnit) -> Self {
        Self {
            clock: SimClock::new(),
            next_unique_id: 0,
            ttl_unit,
        }
    }

    /// Allocate the next per-instance message id
    pub fn next_unique_id(&mut self) -> u64 {
        let id = self.next_unique_id;
        self.next_unique_id += 1;
        id
    }

    /// TTL unit of this run
    pub fn ttl_unit(&self) -> TtlUnit {
        self.ttl_unit
    }

    /// Move simulated time forward to `time`
    pub fn advance_to(&mut self, time: SimTime) {
        self.clock.advance_to(time);
    }

    /// Reset clock and id allocator for a new run
    pub fn reset(&mut self) {
        self.clock.reset();
        self.next_unique_id = 0;
    }
}

impl Clock for SimContext {
    fn now(&self) -> SimTime {
        self.clock.now()
    }
}
