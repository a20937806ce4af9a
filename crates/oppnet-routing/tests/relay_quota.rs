//! End-to-end quota accounting
//!
//! Walks one message through four hosts under every router kind:
//!
//! ```text
//! A (6 copies) --spray--> B      A keeps 3, B gets 3
//! B --------------------> D      D is the destination and gets 2, B keeps 1
//! A --spray--> C                 A keeps 1, C gets 2
//! ```

use oppnet_core::{HostId, LinkModel, MessageId, SimTime};
use oppnet_routing::{
    Network, NetworkEvent, PredictorConfig, ReplicationPolicy, RouterKind, RoutingConfig, SprayQuota,
};

fn make_id(n: u32) -> HostId {
    HostId::new(n)
}

const A: u32 = 0;
const B: u32 = 1;
const C: u32 = 2;
const D: u32 = 3;

/// 100 bytes at 100 B/s: every transfer takes one second
fn link() -> LinkModel {
    LinkModel::ConstantBitRate { speed: 100.0 }
}

fn copies(network: &Network<HostId>, host: u32, quota: &SprayQuota) -> Option<u32> {
    let router = network.router(&make_id(host))?;
    let message = router.active().buffer().get(&MessageId::from("M1"))?;
    quota.copies(&make_id(host), message).ok()
}

fn walk(config: RoutingConfig) {
    let quota = SprayQuota::new(config.protocol.protocol(), config.quota);
    let mut network = Network::new(config).unwrap();
    network.add_hosts(HostId::range(4)).unwrap();

    assert!(network.create_message(&make_id(A), &make_id(D), "M1", 100, 0).unwrap());
    assert_eq!(copies(&network, A, &quota), Some(6));

    // A meets B
    let ab = network.connect(&make_id(A), &make_id(B), link()).unwrap();
    network.tick(SimTime::from_secs(1.0)).unwrap();
    network.tick(SimTime::from_secs(2.0)).unwrap();
    assert_eq!(copies(&network, A, &quota), Some(3));
    assert_eq!(copies(&network, B, &quota), Some(3));
    network.disconnect(ab).unwrap();

    // B meets the destination
    let bd = network.connect(&make_id(B), &make_id(D), link()).unwrap();
    network.tick(SimTime::from_secs(3.0)).unwrap();
    network.tick(SimTime::from_secs(4.0)).unwrap();
    assert_eq!(copies(&network, B, &quota), Some(1));
    let destination = network.router(&make_id(D)).unwrap();
    assert!(destination.active().has_delivered(&MessageId::from("M1")));
    assert!(!destination.has_message(&MessageId::from("M1")));
    network.disconnect(bd).unwrap();

    // A meets C
    network.connect(&make_id(A), &make_id(C), link()).unwrap();
    network.tick(SimTime::from_secs(5.0)).unwrap();
    network.tick(SimTime::from_secs(6.0)).unwrap();
    assert_eq!(copies(&network, A, &quota), Some(1));
    assert_eq!(copies(&network, C, &quota), Some(2));

    let live: u32 = [A, B, C, D]
        .into_iter()
        .filter_map(|host| copies(&network, host, &quota))
        .sum();
    assert!(live <= 6);

    let deliveries = network
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, NetworkEvent::Relayed { first_delivery: true, .. }))
        .count();
    assert_eq!(deliveries, 1);
}

#[test]
fn test_spray_and_wait_walkthrough() {
    walk(RoutingConfig::spray_and_wait());
}

#[test]
fn test_prophet_spray_walkthrough() {
    walk(RoutingConfig::prophet_spray());
}

#[test]
fn test_utility_spray_walkthrough() {
    walk(RoutingConfig::utility_spray());
}

#[test]
fn test_single_copy_waits_for_destination() {
    let mut config = RoutingConfig::spray_and_wait();
    config.quota.initial_copies = 1;
    let mut network = Network::new(config).unwrap();
    network.add_hosts(HostId::range(3)).unwrap();
    network.create_message(&make_id(0), &make_id(2), "M1", 100, 0).unwrap();

    network.connect(&make_id(0), &make_id(1), link()).unwrap();
    network.tick(SimTime::from_secs(1.0)).unwrap();
    network.tick(SimTime::from_secs(2.0)).unwrap();
    assert!(!network.router(&make_id(1)).unwrap().has_message(&MessageId::from("M1")));

    network.connect(&make_id(0), &make_id(2), link()).unwrap();
    network.tick(SimTime::from_secs(3.0)).unwrap();
    network.tick(SimTime::from_secs(4.0)).unwrap();
    assert!(
        network
            .router(&make_id(2))
            .unwrap()
            .active()
            .has_delivered(&MessageId::from("M1"))
    );
}

#[test]
fn test_linear_split() {
    let mut config = RoutingConfig::spray_and_wait();
    config.quota.binary = false;
    let quota = SprayQuota::new(config.protocol.protocol(), config.quota);
    let mut network = Network::new(config).unwrap();
    network.add_hosts(HostId::range(4)).unwrap();
    network.create_message(&make_id(A), &make_id(D), "M1", 100, 0).unwrap();

    network.connect(&make_id(A), &make_id(B), link()).unwrap();
    network.tick(SimTime::from_secs(1.0)).unwrap();
    network.tick(SimTime::from_secs(2.0)).unwrap();

    assert_eq!(copies(&network, A, &quota), Some(5));
    assert_eq!(copies(&network, B, &quota), Some(1));
}

/// B has met D before A hands it a copy of M1 for D
fn split_with_informed_relay(policy: ReplicationPolicy) -> (Option<u32>, Option<u32>) {
    let mut config = RoutingConfig::prophet_spray();
    config.protocol = RouterKind::ProphetSpray {
        predictor: PredictorConfig::default(),
        policy,
    };
    let quota = SprayQuota::new(config.protocol.protocol(), config.quota);
    let mut network = Network::new(config).unwrap();
    network.add_hosts(HostId::range(4)).unwrap();

    let bd = network.connect(&make_id(B), &make_id(D), link()).unwrap();
    network.disconnect(bd).unwrap();

    network.create_message(&make_id(A), &make_id(D), "M1", 100, 0).unwrap();
    network.connect(&make_id(A), &make_id(B), link()).unwrap();
    network.tick(SimTime::from_secs(1.0)).unwrap();
    network.tick(SimTime::from_secs(2.0)).unwrap();

    (copies(&network, A, &quota), copies(&network, B, &quota))
}

#[test]
fn test_predictability_ratio_favours_informed_relay() {
    // P(B,D) = 0.75 against A's transitive 0.14: round(6 * 0.84) = 5
    assert_eq!(
        split_with_informed_relay(ReplicationPolicy::PredictabilityRatio),
        (Some(1), Some(5))
    );
    assert_eq!(
        split_with_informed_relay(ReplicationPolicy::QuotaSplit),
        (Some(3), Some(3))
    );
}
