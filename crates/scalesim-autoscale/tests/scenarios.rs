//! End-to-end decision cycles: in-place absorption, provisioning of new
//! capacity, and rescue of an in-flight removal.

use std::collections::BTreeMap;
use std::time::Duration;

use scalesim_autoscale::{PlatformAdjuster, ScalingDecision};
use scalesim_core::{Catalog, NodeType, NodeTypeId, ResourceVector, ScalingTiming, ServiceProfile, Timestamp};
use scalesim_placement::{DesiredStateCalculator, RequirementCatalog};
use scalesim_state::{
    GeneralizedDelta, HomogeneousNodeGroup, NodeChange, PlatformState, ServiceMix, Sign,
};
use scalesim_timeline::{DeltaTimeline, ScalingDelayProvider};

const M_BOOT: u64 = 60;
const M_STOP: u64 = 30;
const API_BOOT: u64 = 10;
const API_STOP: u64 = 5;

fn m() -> NodeTypeId {
    NodeTypeId::new("aws", "m")
}

/// `m`: four api slots, the cheapest type. `l`: eight slots, pricier.
fn make_catalog() -> Catalog {
    Catalog::new(
        vec![
            NodeType::new(m(), ResourceVector::new(4.0, 4096.0, 0.0), 0.10).with_timing(
                ScalingTiming::fixed(Duration::from_secs(M_BOOT), Duration::from_secs(M_STOP)),
            ),
            NodeType::new(NodeTypeId::new("aws", "l"), ResourceVector::new(8.0, 8192.0, 0.0), 0.25)
                .with_timing(ScalingTiming::fixed(Duration::from_secs(90), Duration::from_secs(30))),
        ],
        vec![ServiceProfile::new("api", ResourceVector::new(1.0, 1024.0, 0.0)).with_timing(
            ScalingTiming::fixed(Duration::from_secs(API_BOOT), Duration::from_secs(API_STOP)),
        )],
    )
}

fn make_group(nodes: u64, api: u64) -> HomogeneousNodeGroup {
    let reqs = RequirementCatalog::from_catalog(&make_catalog());
    // Zero counts are dropped, so `api == 0` is an idle group.
    let mix: ServiceMix = [("api".to_string(), api)].into();
    HomogeneousNodeGroup::new(m(), nodes, mix, reqs.for_node_type(&m()).unwrap()).unwrap()
}

fn make_adjuster(initial: &[HomogeneousNodeGroup]) -> PlatformAdjuster {
    let catalog = make_catalog();
    let mut state = PlatformState::with_regions(["eu"]);
    for group in initial {
        state.apply("eu", &GeneralizedDelta::provision(group.clone()).enforce()).unwrap();
    }
    let timeline = DeltaTimeline::new(state, ScalingDelayProvider::new(catalog.clone(), 11));
    PlatformAdjuster::from_parts(
        catalog,
        DesiredStateCalculator::with_defaults(Duration::from_secs(3600)),
        timeline,
    )
}

fn secs(n: u64) -> Timestamp {
    Timestamp::from_secs(n)
}

fn ready_api(adjuster: &PlatformAdjuster) -> u64 {
    adjuster
        .state()
        .region_entity_state("eu")
        .get("api")
        .map(|c| c.ready_count)
        .unwrap_or(0)
}

#[test]
fn idle_node_absorbs_demand_in_place() {
    let mut adjuster = make_adjuster(&[make_group(1, 0)]);

    let outcome = adjuster
        .adjust(secs(0), "eu", &[ScalingDecision::new("api", 4)])
        .unwrap();
    assert!(outcome.is_fully_met());
    assert!(outcome.unfit.is_empty());
    assert_eq!(outcome.accepted.len(), 1);

    adjuster.roll_out(secs(API_BOOT)).unwrap();
    let region = adjuster.state().region("eu").unwrap();
    assert_eq!(region.total_nodes(), 1);
    assert_eq!(region.groups().count(), 1);
    assert_eq!(ready_api(&adjuster), 4);
}

#[test]
fn full_node_triggers_one_cheapest_node() {
    let mut adjuster = make_adjuster(&[make_group(1, 4)]);

    let outcome = adjuster
        .adjust(secs(0), "eu", &[ScalingDecision::new("api", 1)])
        .unwrap();
    assert!(outcome.is_fully_met());
    assert_eq!(outcome.accepted.len(), 1);

    let (_, pending) = adjuster.timeline().pending().next().unwrap();
    let delta = &pending.delta;
    assert!(delta.node_group_delta.is_physical());
    assert_eq!(delta.sign(), Sign::Plus);
    assert_eq!(delta.group().node_type(), &m());
    assert_eq!(delta.group().node_count(), 1);

    adjuster.roll_out(secs(M_BOOT + API_BOOT - 1)).unwrap();
    assert_eq!(ready_api(&adjuster), 4);
    adjuster.roll_out(secs(M_BOOT + API_BOOT)).unwrap();
    assert_eq!(ready_api(&adjuster), 5);
    assert_eq!(adjuster.state().region("eu").unwrap().total_nodes(), 2);
}

#[test]
fn in_flight_removal_is_rescued() {
    let mut adjuster = make_adjuster(&[make_group(2, 3)]);

    // Scale in completely: both nodes are freed and scheduled for removal.
    let down = adjuster
        .adjust(secs(0), "eu", &[ScalingDecision::new("api", -6)])
        .unwrap();
    assert!(down.is_fully_met());
    assert_eq!(down.accepted.len(), 1);
    let removal = down.accepted[0];
    {
        let (_, pending) = adjuster.timeline().pending().next().unwrap();
        assert_eq!(pending.delta.sign(), Sign::Minus);
        assert_eq!(pending.delta.group().node_count(), 2);
        assert_eq!(pending.delta.services().get("api"), -6);
    }
    adjuster.roll_out(secs(1)).unwrap();

    // Demand comes back before the termination delay elapses.
    let up = adjuster
        .adjust(secs(10), "eu", &[ScalingDecision::new("api", 2)])
        .unwrap();
    assert!(up.is_fully_met());
    assert_eq!(up.accepted.len(), 2);

    let compensation = adjuster
        .timeline()
        .pending()
        .map(|(_, p)| p)
        .find(|p| p.delta.is_virtual())
        .unwrap();
    match &compensation.delta.node_group_delta.change {
        NodeChange::Compensating { compensates } => assert_eq!(*compensates, removal),
        other => panic!("expected a compensation, got {other:?}"),
    }
    // Nothing new is booted.
    assert!(adjuster
        .timeline()
        .pending()
        .all(|(_, p)| !(p.delta.node_group_delta.is_physical() && p.delta.sign() == Sign::Plus)));
    assert_eq!(adjuster.timeline().entity_counts("eu").unwrap()["api"].settled_count(), 2);

    adjuster.roll_out(secs(M_STOP + API_STOP + 100)).unwrap();
    let region = adjuster.state().region("eu").unwrap();
    assert_eq!(ready_api(&adjuster), 2);
    assert_eq!(region.total_nodes(), 1);
    assert_eq!(region.compensations().len(), 1);
    assert!(adjuster.timeline().is_settled());
}

#[test]
fn desired_count_holds_once_the_rescue_is_recorded() {
    let mut adjuster = make_adjuster(&[make_group(2, 3)]);
    adjuster
        .adjust(secs(0), "eu", &[ScalingDecision::new("api", -6)])
        .unwrap();
    adjuster.roll_out(secs(1)).unwrap();
    adjuster
        .adjust(secs(10), "eu", &[ScalingDecision::new("api", 2)])
        .unwrap();

    // The compensation is enforced; the shrunken removal is not due yet.
    adjuster.roll_out(secs(11)).unwrap();
    assert_eq!(adjuster.state().region("eu").unwrap().compensations().len(), 1);
    assert_eq!(adjuster.timeline().pending_removals("eu").len(), 1);
    let counts = adjuster.timeline().entity_counts("eu").unwrap()["api"];
    assert_eq!(counts.ready_count, 6);
    assert_eq!(counts.settled_count(), 2);

    let desired: BTreeMap<String, u64> = [("api".to_string(), 2)].into();
    let outcome = adjuster.adjust_to_desired(secs(11), "eu", &desired).unwrap();
    assert!(outcome.accepted.is_empty());

    adjuster.roll_out(secs(M_STOP + API_STOP + 100)).unwrap();
    assert_eq!(ready_api(&adjuster), 2);
    assert_eq!(adjuster.state().region("eu").unwrap().total_nodes(), 1);
    assert!(adjuster.timeline().is_settled());
}
