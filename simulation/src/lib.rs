//! # oppnet simulation
//!
//! Discrete-time driver for the opportunistic routers in `oppnet-routing`.
//!
//! ## Overview
//!
//! A run is described by a [`Scenario`]: a host count, the routing
//! configuration every host shares, and timed contact and message events.
//! The [`Simulation`] engine replays those events against a
//! [`Network`](oppnet_routing::Network) ticking at a fixed interval and folds
//! the network's events into [`SimStats`].
//!
//! - **Scenarios** (`scenario.rs`): JSON loading, validation, built-in `relay`
//!   and seeded `random` generators
//! - **Engine** (`engine.rs`): event queue and tick loop
//! - **Stats** (`stats.rs`): delivery ratio, overhead, latency and hop counts
//!
//! ## Example
//!
//! ```rust,ignore
//! use oppnet_simulation::{Scenario, Simulation};
//!
//! let mut sim = Simulation::new(&Scenario::relay())?;
//! let stats = sim.run()?;
//! assert_eq!(stats.delivered, 1);
//! ```

pub mod engine;
pub mod error;
pub mod scenario;
pub mod stats;

pub use engine::{Action, Simulation};
pub use error::{ScenarioError, SimError, SimResult};
pub use scenario::{ContactEvent, MessageEvent, RandomParams, Scenario};
pub use stats::SimStats;
