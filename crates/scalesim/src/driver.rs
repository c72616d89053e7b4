//! Scenario replay on a fixed clock step.
//!
//! Every tick runs, in order:
//! 1. faults due by the tick are submitted as already-enforced removals,
//! 2. the timeline is rolled out to the tick,
//! 3. decisions due by the tick run one decision cycle per region.
//!
//! Events between two ticks are handled at the later tick. Once every event
//! has been handled, the timeline is rolled out until nothing is pending.

use std::collections::BTreeMap;
use std::iter;
use std::time::Duration;

use anyhow::bail;
use tracing::{debug, info, warn};

use scalesim_autoscale::{AdjustmentOutcome, PlatformAdjuster, ScalingDecision};
use scalesim_core::{Platform, Timestamp};
use scalesim_placement::StrategyRegistry;
use scalesim_state::{GeneralizedDelta, HomogeneousNodeGroup};

use crate::report::{CycleReport, SimulationReport};
use crate::scenario::{Decision, Demand, Fault, Scenario};

pub struct Simulation {
    adjuster: PlatformAdjuster,
    step: Duration,
    latest: BTreeMap<String, AdjustmentOutcome>,
    cycles: Vec<CycleReport>,
}

impl Simulation {
    pub fn new(platform: &Platform, step: Duration) -> anyhow::Result<Self> {
        let registry = StrategyRegistry::with_builtins();
        Self::with_registry(platform, &registry, step)
    }

    pub fn with_registry(
        platform: &Platform,
        registry: &StrategyRegistry,
        step: Duration,
    ) -> anyhow::Result<Self> {
        if step.is_zero() {
            bail!("clock step must be positive");
        }
        Ok(Self {
            adjuster: PlatformAdjuster::new(platform, registry)?,
            step,
            latest: BTreeMap::new(),
            cycles: Vec::new(),
        })
    }

    pub fn adjuster(&self) -> &PlatformAdjuster {
        &self.adjuster
    }

    pub fn run(mut self, scenario: &Scenario) -> anyhow::Result<SimulationReport> {
        info!(
            decisions = scenario.decisions.len(),
            faults = scenario.faults.len(),
            step = ?self.step,
            "simulation starting"
        );

        let mut decisions = scenario.decisions.iter().peekable();
        let mut faults = scenario.faults.iter().peekable();
        let mut now = Timestamp::ZERO;
        loop {
            while let Some(fault) = faults.next_if(|f| f.at <= now) {
                self.inject(now, fault)?;
            }
            self.adjuster.roll_out(now)?;

            let due: Vec<&Decision> = iter::from_fn(|| decisions.next_if(|d| d.at <= now)).collect();
            if !due.is_empty() {
                self.decide(now, &due)?;
            }

            if decisions.peek().is_none() && faults.peek().is_none() {
                break;
            }
            now = now.after(self.step);
        }

        // A proposal learns its due time on the first roll-out past it, so
        // draining takes more than one round.
        while let Some(last) = self.adjuster.timeline().pending().map(|(at, _)| at).max() {
            now = if last > now { last } else { now.after(self.step) };
            debug!(%now, "draining pending deltas");
            self.adjuster.roll_out(now)?;
        }

        let report = SimulationReport::collect(&self.adjuster, now, &self.latest, self.cycles)?;
        if !report.settled {
            warn!(
                deferred = self.adjuster.timeline().deferred().len(),
                "simulation ended with deferred deltas"
            );
        }
        info!(finished_at = %now, cycles = report.cycles.len(), "simulation finished");
        Ok(report)
    }

    /// Fail up to `fault.nodes` nodes of the fault's type, largest groups
    /// first.
    fn inject(&mut self, now: Timestamp, fault: &Fault) -> anyhow::Result<()> {
        let mut groups: Vec<HomogeneousNodeGroup> = self
            .adjuster
            .state()
            .region(&fault.region)
            .map(|r| {
                r.groups()
                    .filter(|g| g.node_type() == &fault.node_type)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        groups.sort_by(|a, b| b.node_count().cmp(&a.node_count()));

        let mut left = fault.nodes;
        for group in groups {
            if left == 0 {
                break;
            }
            let failed = group.with_node_count(left.min(group.node_count()));
            left -= failed.node_count();
            info!(region = %fault.region, group = %failed, %now, "injecting node failure");
            self.adjuster.timeline_mut().add_enforced(
                now,
                &fault.region,
                GeneralizedDelta::node_failure(failed),
            )?;
        }
        if left > 0 {
            warn!(
                region = %fault.region,
                node_type = %fault.node_type,
                missing = left,
                "fault names more nodes than are running"
            );
        }
        Ok(())
    }

    fn decide(&mut self, now: Timestamp, due: &[&Decision]) -> anyhow::Result<()> {
        let mut by_region: BTreeMap<&str, Vec<&Decision>> = BTreeMap::new();
        for decision in due {
            by_region.entry(decision.region.as_str()).or_default().push(decision);
        }

        for (region, decisions) in by_region {
            let mut changes = Vec::new();
            let mut targets = BTreeMap::new();
            for decision in decisions {
                match decision.demand {
                    Demand::Change(count) => {
                        let mut change = ScalingDecision::new(&decision.service, count);
                        if let Some(requirement) = decision.requirement {
                            change = change.with_requirement(requirement);
                        }
                        changes.push(change);
                    }
                    Demand::Target(count) => {
                        if let Some(requirement) = decision.requirement {
                            self.adjuster.register_requirement(&decision.service, requirement);
                        }
                        targets.insert(decision.service.clone(), count);
                    }
                }
            }

            if !changes.is_empty() {
                let outcome = self.adjuster.adjust(now, region, &changes)?;
                self.record(outcome);
            }
            if !targets.is_empty() {
                let outcome = self.adjuster.adjust_to_desired(now, region, &targets)?;
                self.record(outcome);
            }
        }
        Ok(())
    }

    fn record(&mut self, outcome: AdjustmentOutcome) {
        self.cycles.push(CycleReport::from(&outcome));
        self.latest.insert(outcome.region.clone(), outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scalesim_core::{NodeTypeId, PlatformConfig};

    const PLATFORM: &str = r#"
[[node_types]]
provider = "aws"
name = "m"
vcpu = 4.0
memory_mb = 4096
price_per_hour = 0.1
booting = "60s"
termination = "30s"

[[services]]
name = "api"
vcpu = 1.0
memory_mb = 512
booting = "10s"
termination = "5s"

[[regions]]
name = "eu"
"#;

    fn make_platform() -> Platform {
        PlatformConfig::from_toml_str(PLATFORM).unwrap().build().unwrap()
    }

    fn change(at: u64, count: i64) -> Decision {
        Decision {
            at: Timestamp::from_secs(at),
            region: "eu".to_string(),
            service: "api".to_string(),
            demand: Demand::Change(count),
            requirement: None,
        }
    }

    #[test]
    fn zero_step_is_rejected() {
        assert!(Simulation::new(&make_platform(), Duration::ZERO).is_err());
    }

    #[test]
    fn empty_scenario_reports_empty_regions() {
        let sim = Simulation::new(&make_platform(), Duration::from_secs(1)).unwrap();
        let report = sim.run(&Scenario::default()).unwrap();
        assert!(report.settled);
        assert_eq!(report.finished_at, Timestamp::ZERO);
        assert_eq!(report.region("eu").unwrap().total_nodes, 0);
    }

    #[test]
    fn decisions_are_handled_on_the_next_tick() {
        let scenario = Scenario {
            decisions: vec![change(3, 2)],
            faults: vec![],
        };
        let sim = Simulation::new(&make_platform(), Duration::from_secs(5)).unwrap();
        let report = sim.run(&scenario).unwrap();

        assert_eq!(report.cycles.len(), 1);
        assert_eq!(report.cycles[0].at, Timestamp::from_secs(5));
        // Boot (60s) plus api (10s) after the tick.
        assert_eq!(report.finished_at, Timestamp::from_secs(75));
        assert_eq!(report.region("eu").unwrap().entities["api"].ready_count, 2);
    }

    #[test]
    fn fault_removes_running_nodes() {
        let scenario = Scenario {
            decisions: vec![change(0, 8)],
            faults: vec![Fault {
                at: Timestamp::from_secs(100),
                region: "eu".to_string(),
                node_type: NodeTypeId::new("aws", "m"),
                nodes: 1,
            }],
        };
        let sim = Simulation::new(&make_platform(), Duration::from_secs(10)).unwrap();
        let report = sim.run(&scenario).unwrap();

        let eu = report.region("eu").unwrap();
        assert_eq!(eu.total_nodes, 1);
        assert_eq!(eu.entities["api"].ready_count, 4);
        assert!(report.settled);
    }
}
