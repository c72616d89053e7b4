//! Platform adjuster: one decision cycle, from demand to scheduled deltas.
//!
//! For a region and a simulated instant the adjuster:
//! 1. registers any per-instance requirement carried by the decisions,
//! 2. realizes the demand on the nodes the region will have once every
//!    pending delta is enforced, rescuing nodes whose removal is in flight,
//! 3. hands what is left to the desired-state calculator for new nodes,
//! 4. adds every resulting delta to the timeline.
//!
//! Nothing is retried here: demand that could not be realized is returned
//! to the caller, who may resubmit it on a later cycle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use scalesim_core::{Catalog, Platform, ResourceVector, Timestamp};
use scalesim_placement::{
    DesiredStateCalculator, PendingRemoval, RequirementCatalog, StrategyRegistry,
    UnfitRequirement, place_in_existing,
};
use scalesim_state::{DeltaId, GeneralizedDelta, HomogeneousNodeGroup, PlatformState, ServiceCountDelta};
use scalesim_timeline::{DeltaTimeline, ScalingDelayProvider};

use crate::error::AdjustResult;

/// One scaling decision from the metric pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub service: String,
    pub count: i64,
    /// Resources of one instance; overrides the catalog when given.
    #[serde(default)]
    pub requirement: Option<ResourceVector>,
}

impl ScalingDecision {
    pub fn new(service: impl Into<String>, count: i64) -> Self {
        Self {
            service: service.into(),
            count,
            requirement: None,
        }
    }

    pub fn with_requirement(mut self, requirement: ResourceVector) -> Self {
        self.requirement = Some(requirement);
        self
    }
}

/// What one decision cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdjustmentOutcome {
    pub region: String,
    pub timestamp: Timestamp,
    /// Deltas added to the timeline, in decision order.
    pub accepted: Vec<DeltaId>,
    /// Demand that was not realized: removals of instances that do not
    /// exist, and additions no node type can host.
    pub unmet: ServiceCountDelta,
    pub unfit: Vec<UnfitRequirement>,
}

impl AdjustmentOutcome {
    pub fn is_fully_met(&self) -> bool {
        self.unmet.is_empty()
    }
}

pub struct PlatformAdjuster {
    catalog: Catalog,
    requirements: RequirementCatalog,
    calculator: DesiredStateCalculator,
    timeline: DeltaTimeline,
}

impl PlatformAdjuster {
    /// An adjuster over empty regions, with strategies picked from the
    /// platform's adjustment settings.
    pub fn new(platform: &Platform, registry: &StrategyRegistry) -> AdjustResult<Self> {
        let calculator = registry.calculator(&platform.adjustment)?;
        let timeline = DeltaTimeline::new(
            PlatformState::with_regions(&platform.regions),
            ScalingDelayProvider::new(platform.catalog.clone(), platform.delay_seed),
        );
        Ok(Self::from_parts(platform.catalog.clone(), calculator, timeline))
    }

    pub fn from_parts(catalog: Catalog, calculator: DesiredStateCalculator, timeline: DeltaTimeline) -> Self {
        Self {
            requirements: RequirementCatalog::from_catalog(&catalog),
            catalog,
            calculator,
            timeline,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn timeline(&self) -> &DeltaTimeline {
        &self.timeline
    }

    pub fn timeline_mut(&mut self) -> &mut DeltaTimeline {
        &mut self.timeline
    }

    pub fn state(&self) -> &PlatformState {
        self.timeline.state()
    }

    /// Advance the clock; see [`DeltaTimeline::roll_out`].
    pub fn roll_out(&mut self, cutoff: Timestamp) -> AdjustResult<&PlatformState> {
        Ok(self.timeline.roll_out(cutoff)?)
    }

    /// Record the per-instance requirement of `service`.
    pub fn register_requirement(&mut self, service: &str, requirement: ResourceVector) {
        let known = self
            .catalog
            .service(service)
            .and_then(|p| p.requirement.as_ref());
        if known == Some(&requirement) {
            return;
        }
        if self.catalog.service_timing(service).is_none() {
            warn!(service, "no scaling profile and no default profile; instances start instantly");
        }
        debug!(service, ?requirement, "service requirement registered");
        self.catalog.set_requirement(service, requirement);
        self.timeline
            .delays_mut()
            .catalog_mut()
            .set_requirement(service, requirement);
        self.requirements = RequirementCatalog::from_catalog(&self.catalog);
    }

    /// Run one decision cycle for `region` at `at`.
    pub fn adjust(
        &mut self,
        at: Timestamp,
        region: &str,
        decisions: &[ScalingDecision],
    ) -> AdjustResult<AdjustmentOutcome> {
        for decision in decisions {
            if let Some(requirement) = decision.requirement {
                self.register_requirement(&decision.service, requirement);
            }
        }
        let demand = ServiceCountDelta::from_counts(
            decisions.iter().map(|d| (d.service.clone(), d.count)),
        );
        self.adjust_by(at, region, &demand)
    }

    /// Run one decision cycle that brings every service named in `desired`
    /// to that many instances, counting instances still in flight.
    pub fn adjust_to_desired(
        &mut self,
        at: Timestamp,
        region: &str,
        desired: &BTreeMap<String, u64>,
    ) -> AdjustResult<AdjustmentOutcome> {
        let counts = self.timeline.entity_counts(region)?;
        let demand = ServiceCountDelta::from_counts(desired.iter().map(|(service, want)| {
            let settled = counts.get(service).map(|c| c.settled_count()).unwrap_or(0);
            (service.clone(), *want as i64 - settled)
        }));
        self.adjust_by(at, region, &demand)
    }

    fn adjust_by(
        &mut self,
        at: Timestamp,
        region: &str,
        demand: &ServiceCountDelta,
    ) -> AdjustResult<AdjustmentOutcome> {
        let mut outcome = AdjustmentOutcome {
            region: region.to_string(),
            timestamp: at,
            ..Default::default()
        };
        if demand.is_empty() {
            debug!(region, %at, "nothing to adjust");
            return Ok(outcome);
        }

        let projected = self.timeline.projected_state()?;
        let groups: Vec<HomogeneousNodeGroup> = projected
            .region(region)
            .map(|r| r.groups().cloned().collect())
            .unwrap_or_default();
        let pending: Vec<PendingRemoval> = self
            .timeline
            .pending_removals(region)
            .into_iter()
            .map(|(id, group)| PendingRemoval { id, group })
            .collect();

        let in_place = place_in_existing(&groups, &pending, demand, &self.requirements)?;
        let provisioning = self
            .calculator
            .compute(&in_place.unmet.positive_part(), &self.requirements)?;

        let deltas: Vec<GeneralizedDelta> =
            in_place.deltas.into_iter().chain(provisioning.deltas).collect();
        for delta in deltas {
            outcome.accepted.push(self.timeline.add(at, region, delta)?);
        }

        outcome.unmet = in_place.unmet.negative_part();
        for unfit in &provisioning.unfit {
            outcome.unmet.add(&unfit.service, unfit.count);
        }
        outcome.unfit = provisioning.unfit;

        if !outcome.unmet.is_empty() {
            warn!(region, %at, unmet = %outcome.unmet, "demand left unmet");
        }
        info!(
            region,
            %at,
            demand = %demand,
            deltas = outcome.accepted.len(),
            "adjustment cycle complete"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use scalesim_core::{NodeType, NodeTypeId, ScalingTiming, ServiceProfile};

    fn make_adjuster() -> PlatformAdjuster {
        let catalog = Catalog::new(
            vec![NodeType::new(NodeTypeId::new("aws", "m"), ResourceVector::new(4.0, 4096.0, 0.0), 0.1)
                .with_timing(ScalingTiming::fixed(Duration::from_secs(60), Duration::from_secs(30)))],
            vec![ServiceProfile::new("api", ResourceVector::new(1.0, 512.0, 0.0))
                .with_timing(ScalingTiming::fixed(Duration::from_secs(10), Duration::from_secs(5)))],
        );
        let timeline = DeltaTimeline::new(
            PlatformState::with_regions(["eu"]),
            ScalingDelayProvider::new(catalog.clone(), 1),
        );
        PlatformAdjuster::from_parts(
            catalog,
            DesiredStateCalculator::with_defaults(Duration::from_secs(3600)),
            timeline,
        )
    }

    fn ready(adjuster: &PlatformAdjuster, service: &str) -> u64 {
        adjuster
            .state()
            .region_entity_state("eu")
            .get(service)
            .map(|c| c.ready_count)
            .unwrap_or(0)
    }

    #[test]
    fn empty_demand_does_nothing() {
        let mut adjuster = make_adjuster();
        let outcome = adjuster.adjust(Timestamp::ZERO, "eu", &[]).unwrap();
        assert!(outcome.accepted.is_empty());
        assert!(outcome.is_fully_met());
    }

    #[test]
    fn new_demand_provisions_nodes() {
        let mut adjuster = make_adjuster();
        let outcome = adjuster
            .adjust(Timestamp::ZERO, "eu", &[ScalingDecision::new("api", 6)])
            .unwrap();
        assert_eq!(outcome.accepted.len(), 2);
        assert!(outcome.is_fully_met());

        adjuster.roll_out(Timestamp::from_secs(70)).unwrap();
        assert_eq!(ready(&adjuster, "api"), 6);
        assert_eq!(adjuster.state().region("eu").unwrap().total_nodes(), 2);
    }

    #[test]
    fn in_flight_capacity_is_not_provisioned_twice() {
        let mut adjuster = make_adjuster();
        adjuster
            .adjust(Timestamp::ZERO, "eu", &[ScalingDecision::new("api", 2)])
            .unwrap();
        // The first node is still booting but has room for two more.
        let outcome = adjuster
            .adjust(Timestamp::from_secs(1), "eu", &[ScalingDecision::new("api", 2)])
            .unwrap();
        assert_eq!(outcome.accepted.len(), 1);

        adjuster.roll_out(Timestamp::from_secs(200)).unwrap();
        assert_eq!(ready(&adjuster, "api"), 4);
        assert_eq!(adjuster.state().region("eu").unwrap().total_nodes(), 1);
    }

    #[test]
    fn decision_requirement_registers_new_service() {
        let mut adjuster = make_adjuster();
        let decision = ScalingDecision::new("worker", 1).with_requirement(ResourceVector::new(2.0, 1024.0, 0.0));
        let outcome = adjuster.adjust(Timestamp::ZERO, "eu", &[decision]).unwrap();
        assert!(outcome.is_fully_met());
        assert!(adjuster.catalog().service("worker").is_some());
    }

    #[test]
    fn oversized_service_is_unfit_and_unmet() {
        let mut adjuster = make_adjuster();
        let decision = ScalingDecision::new("giant", 3).with_requirement(ResourceVector::new(64.0, 1.0, 0.0));
        let outcome = adjuster.adjust(Timestamp::ZERO, "eu", &[decision]).unwrap();
        assert_eq!(outcome.unfit.len(), 1);
        assert_eq!(outcome.unmet.get("giant"), 3);
        assert!(outcome.accepted.is_empty());
    }

    #[test]
    fn removing_unknown_instances_is_unmet() {
        let mut adjuster = make_adjuster();
        let outcome = adjuster
            .adjust(Timestamp::ZERO, "eu", &[ScalingDecision::new("api", -2)])
            .unwrap();
        assert_eq!(outcome.unmet.get("api"), -2);
    }

    #[test]
    fn desired_counts_include_in_flight_instances() {
        let mut adjuster = make_adjuster();
        let desired: BTreeMap<String, u64> = [("api".to_string(), 3)].into();
        let first = adjuster.adjust_to_desired(Timestamp::ZERO, "eu", &desired).unwrap();
        assert_eq!(first.accepted.len(), 1);

        // Still booting: asking again changes nothing.
        let second = adjuster
            .adjust_to_desired(Timestamp::from_secs(5), "eu", &desired)
            .unwrap();
        assert!(second.accepted.is_empty());

        let lower: BTreeMap<String, u64> = [("api".to_string(), 1)].into();
        adjuster.roll_out(Timestamp::from_secs(100)).unwrap();
        adjuster
            .adjust_to_desired(Timestamp::from_secs(100), "eu", &lower)
            .unwrap();
        adjuster.roll_out(Timestamp::from_secs(200)).unwrap();
        assert_eq!(ready(&adjuster, "api"), 1);
    }
}
