//! Delta timeline: the only writer of the platform state.
//!
//! Every delta moves through two phases: it is *proposed* when added and
//! *enforced* once its scaling delay has elapsed. The delay is sampled when
//! the proposal is rolled out, and the enforced delta is re-queued at
//! `proposed_at + delay`. Enforcing applies it to the [`PlatformState`].
//!
//! Deltas at the same timestamp are enforced in the order they were added.
//! A delta whose source nodes are not there yet (an earlier change it builds
//! on is still in flight) is deferred and retried after every later
//! enforcement.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use scalesim_core::Timestamp;
use scalesim_state::{
    DeltaId, EntityCountState, GeneralizedDelta, HomogeneousNodeGroup, NodeChange, PlatformState,
    Sign,
};

use crate::delay::ScalingDelayProvider;
use crate::error::{TimelineError, TimelineResult};

/// A delta waiting in the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDelta {
    pub id: DeltaId,
    pub region: String,
    pub delta: GeneralizedDelta,
    /// Submitted already enforced (a fault); never a rescue target.
    pub forced: bool,
}

impl PendingDelta {
    fn is_removal(&self) -> bool {
        let ngd = &self.delta.node_group_delta;
        !self.forced && ngd.is_physical() && ngd.sign == Sign::Minus
    }
}

pub struct DeltaTimeline {
    state: PlatformState,
    delays: ScalingDelayProvider,
    /// Keyed by due time, then by add order.
    pending: BTreeMap<(Timestamp, DeltaId), PendingDelta>,
    /// Due but blocked on nodes that do not exist yet, in add order.
    deferred: Vec<PendingDelta>,
    /// Fragments rescued from each pending removal.
    compensated: BTreeMap<DeltaId, Vec<HomogeneousNodeGroup>>,
    next_id: u64,
    last_update: Option<Timestamp>,
}

impl DeltaTimeline {
    pub fn new(state: PlatformState, delays: ScalingDelayProvider) -> Self {
        Self {
            state,
            delays,
            pending: BTreeMap::new(),
            deferred: Vec::new(),
            compensated: BTreeMap::new(),
            next_id: 0,
            last_update: None,
        }
    }

    /// The authoritative state as of the last roll-out.
    pub fn state(&self) -> &PlatformState {
        &self.state
    }

    pub fn delays_mut(&mut self) -> &mut ScalingDelayProvider {
        &mut self.delays
    }

    pub fn last_update(&self) -> Option<Timestamp> {
        self.last_update
    }

    pub fn pending(&self) -> impl Iterator<Item = (Timestamp, &PendingDelta)> {
        self.pending.iter().map(|((at, _), p)| (*at, p))
    }

    pub fn deferred(&self) -> &[PendingDelta] {
        &self.deferred
    }

    pub fn is_settled(&self) -> bool {
        self.pending.is_empty() && self.deferred.is_empty()
    }

    /// Propose `delta` for `region` at `at`.
    pub fn add(&mut self, at: Timestamp, region: &str, delta: GeneralizedDelta) -> TimelineResult<DeltaId> {
        self.insert(at, region, delta, false)
    }

    /// Submit an already-enforced delta, e.g. an instantaneous node failure.
    /// It is applied by the first roll-out reaching `at`, without delay.
    pub fn add_enforced(
        &mut self,
        at: Timestamp,
        region: &str,
        delta: GeneralizedDelta,
    ) -> TimelineResult<DeltaId> {
        self.insert(at, region, delta.enforce(), true)
    }

    fn insert(
        &mut self,
        at: Timestamp,
        region: &str,
        delta: GeneralizedDelta,
        forced: bool,
    ) -> TimelineResult<DeltaId> {
        if let NodeChange::Compensating { compensates } = &delta.node_group_delta.change {
            self.record_compensation(*compensates, delta.group())?;
        }

        let id = DeltaId(self.next_id);
        self.next_id += 1;
        debug!(
            %id,
            region,
            %at,
            group = %delta.group(),
            services = %delta.services(),
            in_change = delta.in_change(),
            "delta added"
        );
        self.pending.insert(
            (at, id),
            PendingDelta {
                id,
                region: region.to_string(),
                delta,
                forced,
            },
        );
        Ok(id)
    }

    fn record_compensation(&mut self, target: DeltaId, rescued: &HomogeneousNodeGroup) -> TimelineResult<()> {
        let removal = self
            .find(target)
            .filter(|p| p.is_removal())
            .ok_or(TimelineError::UnknownCompensationTarget(target))?;
        let available = self.remaining_nodes(removal);
        if rescued.node_count() > available {
            return Err(TimelineError::OverCompensation {
                target,
                requested: rescued.node_count(),
                available,
            });
        }
        self.compensated.entry(target).or_default().push(rescued.clone());
        Ok(())
    }

    fn find(&self, id: DeltaId) -> Option<&PendingDelta> {
        self.pending
            .values()
            .chain(self.deferred.iter())
            .find(|p| p.id == id)
    }

    fn remaining_nodes(&self, removal: &PendingDelta) -> u64 {
        let rescued: u64 = self
            .compensated
            .get(&removal.id)
            .map(|fs| fs.iter().map(HomogeneousNodeGroup::node_count).sum())
            .unwrap_or(0);
        removal.delta.group().node_count().saturating_sub(rescued)
    }

    /// The delta that will actually be applied: removals shrink by the
    /// fragments rescued from them. `None` when nothing is left to apply.
    fn effective(&self, pending: &PendingDelta) -> TimelineResult<Option<GeneralizedDelta>> {
        let Some(fragments) = self.compensated.get(&pending.id) else {
            return Ok(Some(pending.delta.clone()));
        };
        let mut current = Some(pending.delta.clone());
        for fragment in fragments {
            current = match current {
                Some(delta) => delta.without_fragment(fragment)?,
                None => None,
            };
        }
        Ok(current)
    }

    /// Advance the clock to `cutoff`, sampling delays for due proposals and
    /// enforcing due deltas. A cutoff at or before the last update does
    /// nothing.
    pub fn roll_out(&mut self, cutoff: Timestamp) -> TimelineResult<&PlatformState> {
        if self.last_update.is_some_and(|last| cutoff <= last) {
            return Ok(&self.state);
        }

        while let Some(entry) = self.pending.first_entry() {
            let (at, _) = *entry.key();
            if at > cutoff {
                break;
            }
            let pending = entry.remove();

            if pending.delta.in_change() {
                let delay = self.delays.delay_for(&pending.delta)?;
                let due = at.after(delay);
                debug!(id = %pending.id, %at, %due, "delta proposed");
                self.pending.insert(
                    (due, pending.id),
                    PendingDelta {
                        delta: pending.delta.enforce(),
                        ..pending
                    },
                );
            } else {
                self.enforce(at, pending)?;
            }
        }

        self.last_update = Some(cutoff);
        Ok(&self.state)
    }

    fn enforce(&mut self, at: Timestamp, pending: PendingDelta) -> TimelineResult<()> {
        if self.try_apply(&pending)? {
            self.retry_deferred()
        } else {
            warn!(
                id = %pending.id,
                region = %pending.region,
                %at,
                group = %pending.delta.group(),
                "source nodes not present, deferring enforcement"
            );
            self.deferred.push(pending);
            Ok(())
        }
    }

    /// Apply `pending` if its source nodes exist. Returns whether it is done.
    fn try_apply(&mut self, pending: &PendingDelta) -> TimelineResult<bool> {
        let Some(delta) = self.effective(pending)? else {
            info!(id = %pending.id, region = %pending.region, "removal fully rescued");
            self.compensated.remove(&pending.id);
            return Ok(true);
        };
        if !self.state.can_apply(&pending.region, &delta) {
            return Ok(false);
        }
        self.state.apply(&pending.region, &delta)?;
        self.compensated.remove(&pending.id);
        debug!(
            id = %pending.id,
            region = %pending.region,
            services = %delta.services(),
            "delta enforced"
        );
        Ok(true)
    }

    fn retry_deferred(&mut self) -> TimelineResult<()> {
        loop {
            let mut progressed = false;
            let mut i = 0;
            while i < self.deferred.len() {
                let candidate = self.deferred[i].clone();
                if self.try_apply(&candidate)? {
                    self.deferred.remove(i);
                    progressed = true;
                } else {
                    i += 1;
                }
            }
            if !progressed {
                return Ok(());
            }
        }
    }

    /// The state once every pending and deferred delta is enforced,
    /// ignoring delays. Deltas that could never apply are left out.
    pub fn projected_state(&self) -> TimelineResult<PlatformState> {
        let mut state = self.state.clone();
        let mut queue = Vec::new();
        for pending in self.deferred.iter().chain(self.pending.values()) {
            if let Some(delta) = self.effective(pending)? {
                queue.push((pending.region.as_str(), delta));
            }
        }

        loop {
            let before = queue.len();
            let mut blocked = Vec::new();
            for (region, delta) in queue {
                if state.can_apply(region, &delta) {
                    state.apply(region, &delta)?;
                } else {
                    blocked.push((region, delta));
                }
            }
            queue = blocked;
            if queue.is_empty() || queue.len() == before {
                break;
            }
        }
        for (region, delta) in &queue {
            debug!(region, group = %delta.group(), "pending delta can never apply");
        }
        Ok(state)
    }

    /// Removals of `region` not enforced yet, minus what was rescued from
    /// them, in due order.
    pub fn pending_removals(&self, region: &str) -> Vec<(DeltaId, HomogeneousNodeGroup)> {
        self.deferred
            .iter()
            .chain(self.pending.values())
            .filter(|p| p.region == region && p.is_removal())
            .filter_map(|p| {
                let left = self.remaining_nodes(p);
                (left > 0).then(|| (p.id, p.delta.group().with_node_count(left)))
            })
            .collect()
    }

    /// Ready instances per service, plus the net change still in flight.
    ///
    /// Removals count with what was rescued from them taken out; the
    /// compensations themselves are not counted again, whether or not they
    /// have been recorded yet.
    pub fn entity_counts(&self, region: &str) -> TimelineResult<BTreeMap<String, EntityCountState>> {
        let mut counts = self.state.region_entity_state(region);
        for pending in self.deferred.iter().chain(self.pending.values()) {
            if pending.region != region || pending.delta.is_virtual() {
                continue;
            }
            let Some(delta) = self.effective(pending)? else {
                continue;
            };
            for (service, count) in delta.services().iter() {
                counts.entry(service.to_string()).or_default().in_change_count += count;
            }
        }
        counts.retain(|_, c| c.ready_count > 0 || c.in_change_count != 0);
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use scalesim_core::{
        Catalog, NodeType, NodeTypeId, ResourceVector, ScalingTiming, ServiceProfile,
    };
    use scalesim_state::{Capacity, RequirementMap};

    fn m() -> NodeTypeId {
        NodeTypeId::new("aws", "m")
    }

    fn make_timeline() -> DeltaTimeline {
        let catalog = Catalog::new(
            vec![NodeType::new(m(), ResourceVector::new(4.0, 4096.0, 0.0), 0.1)
                .with_timing(ScalingTiming::fixed(Duration::from_secs(60), Duration::from_secs(30)))],
            vec![ServiceProfile::new("api", ResourceVector::new(1.0, 0.0, 0.0))
                .with_timing(ScalingTiming::fixed(Duration::from_secs(10), Duration::from_secs(5)))],
        );
        DeltaTimeline::new(
            PlatformState::with_regions(["eu"]),
            ScalingDelayProvider::new(catalog, 7),
        )
    }

    fn make_group(nodes: u64, api: u64) -> HomogeneousNodeGroup {
        let mut reqs = RequirementMap::new();
        reqs.insert(
            "api".to_string(),
            Capacity::from_requirement(
                m(),
                &ResourceVector::new(1.0, 0.0, 0.0),
                &ResourceVector::new(4.0, 4096.0, 0.0),
            ),
        );
        HomogeneousNodeGroup::new(m(), nodes, [("api".to_string(), api)].into(), &reqs).unwrap()
    }

    fn t(secs: u64) -> Timestamp {
        Timestamp::from_secs(secs)
    }

    fn api(timeline: &DeltaTimeline) -> u64 {
        timeline
            .state()
            .region_entity_state("eu")
            .get("api")
            .map(|c| c.ready_count)
            .unwrap_or(0)
    }

    #[test]
    fn enforced_only_after_delay() {
        let mut tl = make_timeline();
        tl.add(t(0), "eu", GeneralizedDelta::provision(make_group(1, 4))).unwrap();

        tl.roll_out(t(69)).unwrap();
        assert_eq!(api(&tl), 0);
        assert_eq!(tl.entity_counts("eu").unwrap()["api"].in_change_count, 4);

        tl.roll_out(t(70)).unwrap();
        assert_eq!(api(&tl), 4);
        assert!(tl.is_settled());
    }

    #[test]
    fn roll_out_to_past_is_noop() {
        let mut tl = make_timeline();
        tl.roll_out(t(100)).unwrap();
        tl.add(t(0), "eu", GeneralizedDelta::provision(make_group(1, 4))).unwrap();
        tl.roll_out(t(100)).unwrap();
        assert_eq!(tl.pending().count(), 1);
        tl.roll_out(t(101)).unwrap();
        // Proposed at 0, due at 70: already in the past.
        assert_eq!(api(&tl), 4);
    }

    #[test]
    fn failures_apply_without_delay() {
        let mut tl = make_timeline();
        tl.add(t(0), "eu", GeneralizedDelta::provision(make_group(2, 4))).unwrap();
        tl.roll_out(t(100)).unwrap();

        tl.add_enforced(t(100), "eu", GeneralizedDelta::node_failure(make_group(1, 4)))
            .unwrap();
        assert!(tl.pending_removals("eu").is_empty());
        tl.roll_out(t(101)).unwrap();
        assert_eq!(api(&tl), 4);
    }

    #[test]
    fn change_on_unbooted_nodes_is_deferred() {
        let mut tl = make_timeline();
        tl.add(t(0), "eu", GeneralizedDelta::provision(make_group(1, 2))).unwrap();
        // Reshape decided before the node is up; its own delay is shorter.
        let reshape = GeneralizedDelta::reshape(make_group(1, 2), make_group(1, 4)).unwrap();
        tl.add(t(1), "eu", reshape).unwrap();

        tl.roll_out(t(20)).unwrap();
        assert_eq!(tl.deferred().len(), 1);
        assert_eq!(api(&tl), 0);

        tl.roll_out(t(70)).unwrap();
        assert!(tl.deferred().is_empty());
        assert_eq!(api(&tl), 4);
    }

    #[test]
    fn projected_state_includes_everything_pending() {
        let mut tl = make_timeline();
        tl.add(t(0), "eu", GeneralizedDelta::provision(make_group(1, 2))).unwrap();
        let reshape = GeneralizedDelta::reshape(make_group(1, 2), make_group(1, 3)).unwrap();
        tl.add(t(0), "eu", reshape).unwrap();

        let projected = tl.projected_state().unwrap();
        assert_eq!(projected.region_entity_state("eu")["api"].ready_count, 3);
        assert_eq!(api(&tl), 0);
    }

    #[test]
    fn rescued_removal_only_terminates_the_rest() {
        let mut tl = make_timeline();
        tl.add(t(0), "eu", GeneralizedDelta::provision(make_group(2, 3))).unwrap();
        tl.roll_out(t(100)).unwrap();

        let removal = tl
            .add(t(100), "eu", GeneralizedDelta::decommission(make_group(2, 3)))
            .unwrap();
        tl.roll_out(t(101)).unwrap();
        assert_eq!(tl.pending_removals("eu"), vec![(removal, make_group(2, 3))]);

        tl.add(t(110), "eu", GeneralizedDelta::compensating(removal, make_group(1, 3)))
            .unwrap();
        tl.add(
            t(110),
            "eu",
            GeneralizedDelta::reshape(make_group(1, 3), make_group(1, 2)).unwrap(),
        )
        .unwrap();
        assert_eq!(tl.pending_removals("eu"), vec![(removal, make_group(1, 3))]);
        assert_eq!(tl.entity_counts("eu").unwrap()["api"].settled_count(), 2);

        tl.roll_out(t(200)).unwrap();
        let region = tl.state().region("eu").unwrap();
        assert_eq!(region.total_nodes(), 1);
        assert_eq!(api(&tl), 2);
        assert_eq!(region.compensations().len(), 1);
        assert!(tl.is_settled());
    }

    #[test]
    fn recorded_compensation_is_not_counted_twice() {
        let mut tl = make_timeline();
        tl.add(t(0), "eu", GeneralizedDelta::provision(make_group(2, 3))).unwrap();
        tl.roll_out(t(100)).unwrap();
        let removal = tl
            .add(t(100), "eu", GeneralizedDelta::decommission(make_group(2, 3)))
            .unwrap();
        tl.roll_out(t(101)).unwrap();
        tl.add(t(110), "eu", GeneralizedDelta::compensating(removal, make_group(1, 3)))
            .unwrap();
        assert_eq!(tl.entity_counts("eu").unwrap()["api"].settled_count(), 3);

        // The compensation is recorded; the shrunken removal is still due at 135.
        tl.roll_out(t(111)).unwrap();
        assert_eq!(tl.state().region("eu").unwrap().compensations().len(), 1);
        assert_eq!(tl.pending_removals("eu"), vec![(removal, make_group(1, 3))]);
        let counts = tl.entity_counts("eu").unwrap()["api"];
        assert_eq!(counts.ready_count, 6);
        assert_eq!(counts.in_change_count, -3);

        tl.roll_out(t(135)).unwrap();
        assert_eq!(api(&tl), 3);
        assert_eq!(tl.entity_counts("eu").unwrap()["api"].in_change_count, 0);
    }

    #[test]
    fn fully_rescued_removal_touches_nothing() {
        let mut tl = make_timeline();
        tl.add(t(0), "eu", GeneralizedDelta::provision(make_group(1, 3))).unwrap();
        tl.roll_out(t(100)).unwrap();
        let removal = tl
            .add(t(100), "eu", GeneralizedDelta::decommission(make_group(1, 3)))
            .unwrap();
        tl.add(t(101), "eu", GeneralizedDelta::compensating(removal, make_group(1, 3)))
            .unwrap();

        tl.roll_out(t(500)).unwrap();
        assert_eq!(api(&tl), 3);
        assert_eq!(tl.state().region("eu").unwrap().total_nodes(), 1);
    }

    #[test]
    fn compensation_needs_a_pending_removal() {
        let mut tl = make_timeline();
        let provision = tl
            .add(t(0), "eu", GeneralizedDelta::provision(make_group(1, 3)))
            .unwrap();
        assert!(matches!(
            tl.add(t(0), "eu", GeneralizedDelta::compensating(provision, make_group(1, 3))),
            Err(TimelineError::UnknownCompensationTarget(_))
        ));
        assert!(matches!(
            tl.add(t(0), "eu", GeneralizedDelta::compensating(DeltaId(99), make_group(1, 3))),
            Err(TimelineError::UnknownCompensationTarget(_))
        ));
    }

    #[test]
    fn compensation_cannot_exceed_removal() {
        let mut tl = make_timeline();
        tl.add(t(0), "eu", GeneralizedDelta::provision(make_group(1, 3))).unwrap();
        tl.roll_out(t(100)).unwrap();
        let removal = tl
            .add(t(100), "eu", GeneralizedDelta::decommission(make_group(1, 3)))
            .unwrap();
        assert!(matches!(
            tl.add(t(100), "eu", GeneralizedDelta::compensating(removal, make_group(2, 3))),
            Err(TimelineError::OverCompensation { .. })
        ));
    }

    #[test]
    fn same_timestamp_keeps_add_order() {
        let mut tl = make_timeline();
        tl.add_enforced(t(5), "eu", GeneralizedDelta::provision(make_group(1, 2))).unwrap();
        tl.add_enforced(t(5), "eu", GeneralizedDelta::decommission(make_group(1, 2))).unwrap();
        tl.roll_out(t(5)).unwrap();
        assert!(tl.deferred().is_empty());
        assert_eq!(tl.state().region("eu").unwrap().total_nodes(), 0);
    }
}
