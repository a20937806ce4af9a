//! Scenario descriptions
//!
//! A [`Scenario`] is everything a run needs: how many hosts, which router
//! they run, when contacts come and go and when messages are created. Scenarios
//! load from JSON or come from the built-in generators:
//!
//! - [`Scenario::relay`]: one message sprayed across four hosts
//! - [`Scenario::random`]: seeded random contacts and traffic

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use oppnet_core::HostId;
use oppnet_routing::RoutingConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::ScenarioError;

fn default_link_speed() -> f64 {
    250_000.0
}

fn default_tick_interval() -> f64 {
    1.0
}

/// A complete simulation scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Name used in logs and run context
    pub name: String,
    /// Hosts are `n0..n{hosts-1}`
    pub hosts: u32,
    /// Router configuration shared by every host
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Bytes per second of every contact
    #[serde(default = "default_link_speed")]
    pub link_speed: f64,
    /// Seconds between ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval: f64,
    /// Last simulated second
    pub end_time: f64,
    #[serde(default)]
    pub contacts: Vec<ContactEvent>,
    #[serde(default)]
    pub messages: Vec<MessageEvent>,
}

/// A contact between two hosts coming up or going down
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactEvent {
    pub time: f64,
    pub a: HostId,
    pub b: HostId,
    pub up: bool,
}

/// A message created at `from` for `to`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub time: f64,
    pub from: HostId,
    pub to: HostId,
    pub id: String,
    pub size: u64,
    /// Size of the response the destination sends back (0 = none)
    #[serde(default)]
    pub response_size: u64,
}

/// Parameters of a random scenario
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RandomParams {
    pub hosts: u32,
    /// Number of contacts to draw
    pub contacts: usize,
    /// Number of messages to draw
    pub messages: usize,
    /// Length of the run in seconds
    pub duration: f64,
    /// Contact lengths are drawn from `[min, max)` seconds
    pub min_contact: f64,
    pub max_contact: f64,
    /// Message sizes are drawn from `[min, max)` bytes
    pub min_message_size: u64,
    pub max_message_size: u64,
    pub seed: u64,
}

impl Default for RandomParams {
    fn default() -> Self {
        Self {
            hosts: 20,
            contacts: 200,
            messages: 50,
            duration: 3600.0,
            min_contact: 10.0,
            max_contact: 120.0,
            min_message_size: 50_000,
            max_message_size: 500_000,
            seed: 42,
        }
    }
}

impl Scenario {
    /// Load and validate a scenario file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parse and validate a scenario
    pub fn from_json(text: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = serde_json::from_str(text)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn to_json(&self) -> Result<String, ScenarioError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// One 100-byte message sprayed from n0 towards n3
    ///
    /// ```text
    /// t=0  n0 meets n1      n0 keeps 3 copies, n1 gets 3
    /// t=2  n1 meets n3      n3 is the destination, n1 keeps 1
    /// t=4  n0 meets n2      n0 keeps 1, n2 gets 2
    /// ```
    ///
    /// Every transfer takes one second on the 100 B/s links.
    pub fn relay() -> Self {
        let contact = |time: f64, a: u32, b: u32, up: bool| ContactEvent {
            time,
            a: HostId(a),
            b: HostId(b),
            up,
        };
        Self {
            name: "relay".to_string(),
            hosts: 4,
            routing: RoutingConfig::default(),
            link_speed: 100.0,
            tick_interval: 1.0,
            end_time: 7.0,
            contacts: vec![
                contact(0.0, 0, 1, true),
                contact(2.0, 0, 1, false),
                contact(2.0, 1, 3, true),
                contact(4.0, 1, 3, false),
                contact(4.0, 0, 2, true),
                contact(6.0, 0, 2, false),
            ],
            messages: vec![MessageEvent {
                time: 0.0,
                from: HostId(0),
                to: HostId(3),
                id: "M1".to_string(),
                size: 100,
                response_size: 0,
            }],
        }
    }

    /// Random contacts and traffic, reproducible from `params.seed`
    ///
    /// Contacts between the same pair never overlap.
    pub fn random(params: RandomParams) -> Self {
        let mut rng = StdRng::seed_from_u64(params.seed);
        let hosts = params.hosts.max(2);
        let duration = params.duration.max(1.0);

        let mut busy_until: BTreeMap<(HostId, HostId), f64> = BTreeMap::new();
        let mut contacts = Vec::with_capacity(params.contacts * 2);
        for _ in 0..params.contacts {
            let (x, y) = random_pair(&mut rng, hosts);
            let (a, b) = (x.min(y), x.max(y));
            let start = rng.random_range(0.0..duration).floor();
            let length = if params.max_contact > params.min_contact {
                rng.random_range(params.min_contact..params.max_contact)
            } else {
                params.min_contact
            };
            let end = (start + length.max(1.0).ceil()).min(duration);

            let free_at = busy_until.entry((a, b)).or_insert(f64::NEG_INFINITY);
            if start <= *free_at || end <= start {
                continue;
            }
            *free_at = end;
            contacts.push(ContactEvent { time: start, a, b, up: true });
            contacts.push(ContactEvent { time: end, a, b, up: false });
        }
        contacts.sort_by(|x, y| x.time.total_cmp(&y.time));

        let messages = (0..params.messages)
            .map(|n| {
                let (from, to) = random_pair(&mut rng, hosts);
                let size = if params.max_message_size > params.min_message_size {
                    rng.random_range(params.min_message_size..params.max_message_size)
                } else {
                    params.min_message_size
                };
                MessageEvent {
                    time: rng.random_range(0.0..duration).floor(),
                    from,
                    to,
                    id: format!("M{}", n + 1),
                    size,
                    response_size: 0,
                }
            })
            .collect();

        Self {
            name: format!("random-{}", params.seed),
            hosts,
            routing: RoutingConfig::default(),
            link_speed: default_link_speed(),
            tick_interval: default_tick_interval(),
            end_time: duration,
            contacts,
            messages,
        }
    }

    /// Check hosts, times and rates
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.hosts == 0 {
            return Err(ScenarioError::NoHosts);
        }
        if self.tick_interval.is_nan() || self.tick_interval <= 0.0 {
            return Err(ScenarioError::InvalidTickInterval(self.tick_interval));
        }
        if self.link_speed.is_nan() || self.link_speed <= 0.0 {
            return Err(ScenarioError::InvalidLinkSpeed(self.link_speed));
        }
        check_time(self.end_time)?;

        for contact in &self.contacts {
            check_time(contact.time)?;
            self.check_host(contact.a)?;
            self.check_host(contact.b)?;
            if contact.a == contact.b {
                return Err(ScenarioError::SelfContact(contact.a));
            }
        }
        for message in &self.messages {
            check_time(message.time)?;
            self.check_host(message.from)?;
            self.check_host(message.to)?;
        }
        Ok(())
    }

    /// Ids of every host in the scenario
    pub fn host_ids(&self) -> Vec<HostId> {
        HostId::range(self.hosts)
    }

    fn check_host(&self, host: HostId) -> Result<(), ScenarioError> {
        if host.index() < self.hosts {
            Ok(())
        } else {
            Err(ScenarioError::UnknownHost {
                host,
                hosts: self.hosts,
            })
        }
    }
}

fn check_time(time: f64) -> Result<(), ScenarioError> {
    if time >= 0.0 {
        Ok(())
    } else {
        Err(ScenarioError::InvalidTime(time))
    }
}

/// Two distinct hosts
fn random_pair(rng: &mut StdRng, hosts: u32) -> (HostId, HostId) {
    let a = rng.random_range(0..hosts);
    let mut b = rng.random_range(0..hosts - 1);
    if b >= a {
        b += 1;
    }
    (HostId(a), HostId(b))
}
