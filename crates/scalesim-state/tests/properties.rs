//! Node group properties over random mixes and service changes.

use proptest::prelude::*;

use scalesim_core::{NodeTypeId, ResourceVector};
use scalesim_state::{
    Capacity, GeneralizedDelta, HomogeneousNodeGroup, RequirementMap, ServiceCountDelta, Sign,
};

fn m() -> NodeTypeId {
    NodeTypeId::new("aws", "m")
}

/// `api` takes a quarter of a node, `db` half.
fn make_requirements() -> RequirementMap {
    let capacity = ResourceVector::new(4.0, 4096.0, 0.0);
    let mut reqs = RequirementMap::new();
    for (name, cpu) in [("api", 1.0), ("db", 2.0)] {
        reqs.insert(
            name.to_string(),
            Capacity::from_requirement(m(), &ResourceVector::new(cpu, 256.0, 0.0), &capacity),
        );
    }
    reqs
}

fn make_group(nodes: u64, api: u64, db: u64) -> HomogeneousNodeGroup {
    let mix = [("api".to_string(), api), ("db".to_string(), db)].into();
    HomogeneousNodeGroup::new(m(), nodes, mix, &make_requirements()).unwrap()
}

fn total_instances<'a>(groups: impl IntoIterator<Item = &'a HomogeneousNodeGroup>) -> ServiceCountDelta {
    groups
        .into_iter()
        .fold(ServiceCountDelta::default(), |acc, g| acc.combine(&g.instance_delta(Sign::Plus)))
}

/// (nodes, api per node, db per node), always fitting on a node.
fn group_shape() -> impl Strategy<Value = (u64, u64, u64)> {
    (1u64..6, 0u64..=4, 0u64..=2).prop_filter("mix fits a node", |(_, api, db)| api + 2 * db <= 4)
}

proptest! {
    #[test]
    fn service_deltas_are_realized_or_reported((nodes, api, db) in group_shape(), d_api in -10i64..10, d_db in -4i64..4) {
        let group = make_group(nodes, api, db);
        let deltas = ServiceCountDelta::from_counts([("api".to_string(), d_api), ("db".to_string(), d_db)]);
        let mutation = group.apply_service_deltas(&deltas, &make_requirements()).unwrap();

        prop_assert_eq!(mutation.applied.combine(&mutation.unmet), deltas);

        let touched: u64 = mutation.new_groups.iter().map(|g| g.node_count()).sum();
        let untouched = mutation.remaining.as_ref().map(|g| g.node_count()).unwrap_or(0);
        prop_assert_eq!(touched + untouched, nodes);

        for fragment in &mutation.new_groups {
            prop_assert!(!fragment.is_exhausted(), "{} is over capacity", fragment);
        }

        let after = total_instances(mutation.new_groups.iter().chain(mutation.remaining.iter()));
        prop_assert_eq!(after, group.instance_delta(Sign::Plus).combine(&mutation.applied));
    }

    #[test]
    fn split_then_merge_restores_the_group((nodes, api, db) in group_shape(), k in 0u64..6) {
        let group = make_group(nodes, api, db);
        let k = k.min(nodes);
        let split = group.split(k).unwrap();
        prop_assert_eq!(split.services_removed, group.with_node_count(k).instance_delta(Sign::Minus));
        match (split.remaining, split.removed) {
            (Some(rest), Some(removed)) => prop_assert_eq!(rest.merge(&removed).unwrap(), group),
            (Some(rest), None) => prop_assert_eq!(rest, group),
            (None, Some(removed)) => prop_assert_eq!(removed, group),
            (None, None) => prop_assert!(false, "split lost every node"),
        }
    }

    #[test]
    fn reshape_changes_only_the_mix((nodes, api, db) in group_shape(), (_, api2, db2) in group_shape()) {
        let from = make_group(nodes, api, db);
        let to = make_group(nodes, api2, db2);
        let delta = GeneralizedDelta::reshape(from.clone(), to.clone()).unwrap();
        prop_assert_eq!(
            delta.services(),
            to.instance_delta(Sign::Plus).combine(&from.instance_delta(Sign::Minus))
        );
        prop_assert!(!delta.node_group_delta.is_physical());
    }
}

#[test]
fn node_change_is_tagged_on_the_wire() {
    let from = make_group(1, 4, 0);
    let to = make_group(1, 2, 1);
    let reshape = GeneralizedDelta::reshape(from.clone(), to).unwrap();
    let json = serde_json::to_value(&reshape.node_group_delta.change).unwrap();
    assert_eq!(json["kind"], "reshape");
    assert_eq!(json["to"]["node_count"], 1);

    let scale = serde_json::to_value(&GeneralizedDelta::decommission(from).node_group_delta).unwrap();
    assert_eq!(scale["change"]["kind"], "scale");
    assert_eq!(scale["sign"], "minus");
}
