//! Discrete-time simulation engine
//!
//! The engine ticks the [`Network`] at a fixed interval and feeds it the
//! scenario's contact and message events from a time-ordered queue. An event
//! takes effect right after the first tick at or past its time, so a contact
//! that comes up at `t` starts its first transfer on the tick after `t`.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};

use oppnet_core::{ConnectionId, HostId, LinkModel, SimTime};
use oppnet_logging::RunContextGuard;
use oppnet_routing::{Network, NetworkEvent};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::error::SimResult;
use crate::scenario::Scenario;
use crate::stats::SimStats;

/// Something the scenario makes happen
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ContactUp { a: HostId, b: HostId },
    ContactDown { a: HostId, b: HostId },
    CreateMessage {
        from: HostId,
        to: HostId,
        id: String,
        size: u64,
        response_size: u64,
    },
}

/// An action queued for a point in time
#[derive(Debug, Clone)]
struct Scheduled {
    time: SimTime,
    /// Insertion order, breaks ties between equal times
    seq: u64,
    action: Action,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// A running scenario
pub struct Simulation {
    name: String,
    run_id: Uuid,
    network: Network<HostId>,
    queue: BinaryHeap<Reverse<Scheduled>>,
    next_seq: u64,
    /// Open contacts keyed by (lower, higher) host
    contacts: BTreeMap<(HostId, HostId), ConnectionId>,
    link: LinkModel,
    tick_interval: f64,
    end_time: SimTime,
    ticks: u64,
    stats: SimStats,
    event_log: Vec<NetworkEvent<HostId>>,
}

fn contact_key(a: HostId, b: HostId) -> (HostId, HostId) {
    (a.min(b), a.max(b))
}

impl Simulation {
    /// Build the network and queue every scenario event
    pub fn new(scenario: &Scenario) -> SimResult<Self> {
        scenario.validate()?;
        let mut network = Network::new(scenario.routing)?;
        network.add_hosts(scenario.host_ids())?;

        let mut sim = Self {
            name: scenario.name.clone(),
            run_id: Uuid::new_v4(),
            network,
            queue: BinaryHeap::new(),
            next_seq: 0,
            contacts: BTreeMap::new(),
            link: LinkModel::ConstantBitRate {
                speed: scenario.link_speed,
            },
            tick_interval: scenario.tick_interval,
            end_time: SimTime::from_secs(scenario.end_time),
            ticks: 0,
            stats: SimStats::default(),
            event_log: Vec::new(),
        };

        for contact in &scenario.contacts {
            let action = if contact.up {
                Action::ContactUp {
                    a: contact.a,
                    b: contact.b,
                }
            } else {
                Action::ContactDown {
                    a: contact.a,
                    b: contact.b,
                }
            };
            sim.schedule(SimTime::from_secs(contact.time), action);
        }
        for message in &scenario.messages {
            sim.schedule(
                SimTime::from_secs(message.time),
                Action::CreateMessage {
                    from: message.from,
                    to: message.to,
                    id: message.id.clone(),
                    size: message.size,
                    response_size: message.response_size,
                },
            );
        }

        info!(
            scenario = %sim.name,
            hosts = scenario.hosts,
            protocol = %scenario.routing.protocol.protocol(),
            events = sim.queue.len(),
            "simulation created"
        );
        Ok(sim)
    }

    /// Queue `action` for `time`
    pub fn schedule(&mut self, time: SimTime, action: Action) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(Scheduled { time, seq, action }));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn network(&self) -> &Network<HostId> {
        &self.network
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// Every network event so far
    pub fn event_log(&self) -> &[NetworkEvent<HostId>] {
        &self.event_log
    }

    /// Time of the next tick
    pub fn next_tick_time(&self) -> SimTime {
        SimTime::from_secs(self.ticks as f64 * self.tick_interval)
    }

    pub fn is_finished(&self) -> bool {
        self.next_tick_time() > self.end_time
    }

    /// Advance one tick; returns `false` once the end time has passed
    pub fn step(&mut self) -> SimResult<bool> {
        if self.is_finished() {
            return Ok(false);
        }
        let _run = RunContextGuard::with_run_id(self.name.as_str(), self.run_id);
        let now = self.next_tick_time();
        let span = info_span!("tick", tick = self.ticks, time = %now);
        let _enter = span.enter();

        self.network.tick(now)?;
        while let Some(Reverse(next)) = self.queue.peek() {
            if next.time > now {
                break;
            }
            let Some(Reverse(scheduled)) = self.queue.pop() else {
                break;
            };
            self.apply(scheduled.action)?;
        }

        for event in self.network.drain_events() {
            self.stats.record(&event);
            self.event_log.push(event);
        }
        self.ticks += 1;
        Ok(true)
    }

    /// Run to the end time
    pub fn run(&mut self) -> SimResult<&SimStats> {
        let _run = RunContextGuard::with_run_id(self.name.as_str(), self.run_id);
        let span = info_span!("run", scenario = %self.name, run_id = %self.run_id);
        let _enter = span.enter();

        while self.step()? {}

        info!(
            ticks = self.ticks,
            created = self.stats.created,
            delivered = self.stats.delivered,
            delivery_ratio = self.stats.delivery_ratio(),
            "simulation finished"
        );
        Ok(&self.stats)
    }

    fn apply(&mut self, action: Action) -> SimResult<()> {
        match action {
            Action::ContactUp { a, b } => {
                let key = contact_key(a, b);
                if self.contacts.contains_key(&key) {
                    warn!(a = %a, b = %b, "contact already up");
                    return Ok(());
                }
                let id = self.network.connect(&a, &b, self.link)?;
                self.contacts.insert(key, id);
            }
            Action::ContactDown { a, b } => match self.contacts.remove(&contact_key(a, b)) {
                Some(id) => self.network.disconnect(id)?,
                None => warn!(a = %a, b = %b, "contact already down"),
            },
            Action::CreateMessage {
                from,
                to,
                id,
                size,
                response_size,
            } => {
                let created = self
                    .network
                    .create_message(&from, &to, id.as_str(), size, response_size)?;
                if !created {
                    debug!(message = %id, host = %from, size, "message did not fit at origin");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oppnet_core::MessageId;

    #[test]
    fn test_scheduled_order() {
        let mut queue = BinaryHeap::new();
        let action = Action::ContactUp {
            a: HostId(0),
            b: HostId(1),
        };
        for (seq, time) in [(0, 5.0), (1, 1.0), (2, 1.0)] {
            queue.push(Reverse(Scheduled {
                time: SimTime::from_secs(time),
                seq,
                action: action.clone(),
            }));
        }
        let order: Vec<u64> = std::iter::from_fn(|| queue.pop().map(|Reverse(s)| s.seq)).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_relay_delivers_once() {
        let mut sim = Simulation::new(&Scenario::relay()).unwrap();
        let stats = sim.run().unwrap().clone();

        assert_eq!(stats.created, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.relayed, 3);
        assert_eq!(stats.contacts, 3);
        assert_eq!(stats.delivery_ratio(), 1.0);
        // Created at 0, delivered when n1's transfer to n3 completes at 4
        assert_eq!(stats.average_latency(), Some(4.0));
        assert_eq!(stats.average_hop_count(), Some(2.0));

        let destination = sim.network().router(&HostId(3)).unwrap();
        assert!(destination.active().has_delivered(&MessageId::from("M1")));
        assert!(sim.is_finished());
        assert!(!sim.step().unwrap());
    }

    #[test]
    fn test_duplicate_contact_events_ignored() {
        let mut scenario = Scenario::relay();
        scenario.contacts.push(scenario.contacts[0].clone());
        scenario.contacts.push(scenario.contacts[1].clone());
        let mut sim = Simulation::new(&scenario).unwrap();
        let stats = sim.run().unwrap();
        assert_eq!(stats.contacts, 3);
        assert_eq!(stats.delivered, 1);
    }

    #[test]
    fn test_step_advances_by_interval() {
        let mut scenario = Scenario::relay();
        scenario.tick_interval = 0.5;
        let mut sim = Simulation::new(&scenario).unwrap();
        assert!(sim.step().unwrap());
        assert!(sim.step().unwrap());
        assert_eq!(sim.next_tick_time(), SimTime::from_secs(1.0));
        assert_eq!(sim.network().now(), SimTime::from_secs(0.5));
    }
}
