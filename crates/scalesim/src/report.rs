//! JSON report of a finished simulation.

use std::collections::BTreeMap;

use serde::Serialize;

use scalesim_autoscale::{AdjustmentOutcome, PlatformAdjuster};
use scalesim_core::Timestamp;
use scalesim_placement::UnfitRequirement;
use scalesim_state::{EntityCountState, HomogeneousNodeGroup, ServiceCountDelta, ServiceMix};
use scalesim_timeline::TimelineResult;

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub finished_at: Timestamp,
    /// No delta is pending or deferred.
    pub settled: bool,
    pub regions: Vec<RegionReport>,
    pub cycles: Vec<CycleReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionReport {
    pub name: String,
    pub total_nodes: u64,
    pub hourly_cost: f64,
    pub groups: Vec<GroupReport>,
    pub entities: BTreeMap<String, EntityCountState>,
    /// Unmet demand of the region's latest decision cycle.
    pub unmet: ServiceCountDelta,
    pub unfit: Vec<UnfitRequirement>,
    pub compensations: usize,
    pub deferred: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub fingerprint: String,
    pub node_type: String,
    pub node_count: u64,
    pub services: ServiceMix,
    /// Collapsed share of each node's capacity in use.
    pub utilization: f64,
}

/// One decision cycle as it happened.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub at: Timestamp,
    pub region: String,
    pub accepted: usize,
    pub unmet: ServiceCountDelta,
}

impl From<&AdjustmentOutcome> for CycleReport {
    fn from(outcome: &AdjustmentOutcome) -> Self {
        Self {
            at: outcome.timestamp,
            region: outcome.region.clone(),
            accepted: outcome.accepted.len(),
            unmet: outcome.unmet.clone(),
        }
    }
}

impl From<&HomogeneousNodeGroup> for GroupReport {
    fn from(group: &HomogeneousNodeGroup) -> Self {
        Self {
            fingerprint: group.key().fingerprint(),
            node_type: group.node_type().to_string(),
            node_count: group.node_count(),
            services: group.services().clone(),
            utilization: group.capacity_taken().collapse(),
        }
    }
}

impl SimulationReport {
    /// Snapshot the adjuster's authoritative state at `finished_at`.
    pub fn collect(
        adjuster: &PlatformAdjuster,
        finished_at: Timestamp,
        latest: &BTreeMap<String, AdjustmentOutcome>,
        cycles: Vec<CycleReport>,
    ) -> TimelineResult<Self> {
        let timeline = adjuster.timeline();
        let regions = adjuster
            .state()
            .regions()
            .map(|region| -> TimelineResult<RegionReport> {
                let name = region.name().to_string();
                let hourly_cost: f64 = region
                    .node_counts()
                    .iter()
                    .filter_map(|(id, count)| {
                        adjuster.catalog().node_type(id).map(|t| t.price_per_hour * *count as f64)
                    })
                    .sum();
                let (unmet, unfit) = latest
                    .get(&name)
                    .map(|o| (o.unmet.clone(), o.unfit.clone()))
                    .unwrap_or_default();
                Ok(RegionReport {
                    total_nodes: region.total_nodes(),
                    hourly_cost,
                    groups: region.groups().map(GroupReport::from).collect(),
                    entities: timeline.entity_counts(&name)?,
                    unmet,
                    unfit,
                    compensations: region.compensations().len(),
                    deferred: timeline.deferred().iter().filter(|p| p.region == name).count(),
                    name,
                })
            })
            .collect::<TimelineResult<Vec<_>>>()?;

        Ok(Self {
            finished_at,
            settled: timeline.is_settled(),
            regions,
            cycles,
        })
    }

    pub fn region(&self, name: &str) -> Option<&RegionReport> {
        self.regions.iter().find(|r| r.name == name)
    }
}
