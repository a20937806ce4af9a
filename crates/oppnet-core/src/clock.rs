//! Simulated time
//!
//! The simulator is single-threaded and discrete-event: time only moves when
//! the driver advances the [`SimClock`]. Nothing in the routing core ever
//! reads wall-clock time.

use std::cmp::Ordering;
use std::fmt::Display;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// A point in simulated time, in seconds since the start of the run
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(f64);

impl SimTime {
    /// Start of the simulation
    pub const ZERO: SimTime = SimTime(0.0);

    /// Create a time from seconds
    pub fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    /// Get the time as seconds
    pub fn as_secs(&self) -> f64 {
        self.0
    }

    /// Seconds elapsed since `earlier` (negative if `earlier` is later)
    pub fn since(&self, earlier: SimTime) -> f64 {
        self.0 - earlier.0
    }

    /// Total order, for event queues
    pub fn total_cmp(&self, other: &SimTime) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Add<f64> for SimTime {
    type Output = SimTime;

    fn add(self, secs: f64) -> SimTime {
        SimTime(self.0 + secs)
    }
}

impl Sub for SimTime {
    type Output = f64;

    fn sub(self, other: SimTime) -> f64 {
        self.0 - other.0
    }
}

impl Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}s", self.0)
    }
}

/// Time abstraction for testability
pub trait Clock {
    /// Current simulated time
    fn now(&self) -> SimTime;
}

/// Monotonic simulated clock
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: SimTime,
}

impl SimClock {
    /// Create a clock at time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock to `time`
    ///
    /// The clock never moves backwards; earlier times are ignored.
    pub fn advance_to(&mut self, time: SimTime) {
        if time > self.now {
            self.now = time;
        }
    }

    /// Move the clock forward by `secs`
    pub fn advance(&mut self, secs: f64) {
        self.advance_to(self.now + secs);
    }

    /// Reset to time zero
    pub fn reset(&mut self) {
        self.now = SimTime::ZERO;
    }
}

impl Clock for SimClock {
    fn now(&self) -> SimTime {
        self.now
    }
}
