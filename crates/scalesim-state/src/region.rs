//! Regions and the platform-wide state snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use scalesim_core::NodeTypeId;

use crate::delta::{GeneralizedDelta, NodeChange, Sign};
use crate::error::{StateError, StateResult};
use crate::node_group::{HomogeneousNodeGroup, NodeGroupKey};

/// Instance counts of one service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCountState {
    /// Instances running on enforced capacity.
    pub ready_count: u64,
    /// Net instances still booting (positive) or terminating (negative).
    pub in_change_count: i64,
}

impl EntityCountState {
    /// Instance count once every pending change has settled.
    pub fn settled_count(&self) -> i64 {
        self.ready_count as i64 + self.in_change_count
    }
}

/// The node groups of one region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Region {
    name: String,
    groups: BTreeMap<NodeGroupKey, HomogeneousNodeGroup>,
    /// Sum of every enforced service count delta.
    ledger: BTreeMap<String, i64>,
    /// Bookkeeping-only deltas, in the order they were recorded.
    compensations: Vec<GeneralizedDelta>,
}

impl Region {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> impl Iterator<Item = &HomogeneousNodeGroup> {
        self.groups.values()
    }

    pub fn group(&self, key: &NodeGroupKey) -> Option<&HomogeneousNodeGroup> {
        self.groups.get(key)
    }

    pub fn compensations(&self) -> &[GeneralizedDelta] {
        &self.compensations
    }

    /// Nodes per node type.
    pub fn node_counts(&self) -> BTreeMap<NodeTypeId, u64> {
        let mut counts = BTreeMap::new();
        for group in self.groups.values() {
            *counts.entry(group.node_type().clone()).or_insert(0) += group.node_count();
        }
        counts
    }

    pub fn total_nodes(&self) -> u64 {
        self.groups.values().map(HomogeneousNodeGroup::node_count).sum()
    }

    /// Instance counts per service, summed over every node group.
    pub fn extract_collective_entity_state(&self) -> BTreeMap<String, EntityCountState> {
        let mut state: BTreeMap<String, EntityCountState> = BTreeMap::new();
        for group in self.groups.values() {
            for (service, count) in group.instance_counts() {
                state.entry(service).or_default().ready_count += count;
            }
        }
        state
    }

    /// Whether `delta` can be applied to the current groups.
    pub fn can_apply(&self, delta: &GeneralizedDelta) -> bool {
        self.check_removal(delta).is_ok()
    }

    fn check_removal(&self, delta: &GeneralizedDelta) -> StateResult<()> {
        let ngd = &delta.node_group_delta;
        let removes = match ngd.change {
            NodeChange::Scale => ngd.sign == Sign::Minus,
            NodeChange::Reshape { .. } => true,
            NodeChange::Compensating { .. } => false,
        };
        if !removes {
            return Ok(());
        }
        let present = self
            .groups
            .get(&ngd.group.key())
            .map(HomogeneousNodeGroup::node_count)
            .unwrap_or(0);
        if present < ngd.group.node_count() {
            return Err(StateError::MissingNodeGroup {
                region: self.name.clone(),
                group: ngd.group.key().to_string(),
                wanted: ngd.group.node_count(),
                present,
            });
        }
        Ok(())
    }

    /// The service change that `delta`'s node group change really causes
    /// must be the one it declares, or the ledger would drift.
    fn check_services(&self, delta: &GeneralizedDelta) -> StateResult<()> {
        let ngd = &delta.node_group_delta;
        let caused = match &ngd.change {
            NodeChange::Compensating { .. } => return Ok(()),
            NodeChange::Scale => ngd.group.instance_delta(ngd.sign),
            NodeChange::Reshape { to } => to
                .instance_delta(Sign::Plus)
                .combine(&ngd.group.instance_delta(Sign::Minus)),
        };
        let declared = delta.services();
        if caused == declared {
            return Ok(());
        }

        let ready = self.extract_collective_entity_state();
        let mismatch = caused
            .services()
            .chain(declared.services())
            .find(|s| caused.get(s) != declared.get(s))
            .unwrap_or_default();
        let now = ready.get(mismatch).map(|c| c.ready_count as i64).unwrap_or(0);
        Err(self.diverged(
            mismatch,
            now + caused.get(mismatch),
            now + declared.get(mismatch),
        ))
    }

    /// Apply one delta. Nothing changes if the delta cannot be applied.
    ///
    /// Compensating deltas are only recorded; every other delta adds or
    /// removes node groups and folds its service change into the ledger.
    pub fn apply(&mut self, delta: &GeneralizedDelta) -> StateResult<()> {
        self.check_removal(delta)?;
        self.check_services(delta)?;
        let ngd = &delta.node_group_delta;

        match &ngd.change {
            NodeChange::Compensating { compensates } => {
                debug!(region = %self.name, %compensates, group = %ngd.group, "compensation recorded");
                self.compensations.push(delta.clone());
                return Ok(());
            }
            NodeChange::Scale => match ngd.sign {
                Sign::Plus => self.insert(ngd.group.clone()),
                Sign::Minus => self.remove(&ngd.group),
            },
            NodeChange::Reshape { to } => {
                self.remove(&ngd.group);
                self.insert(to.clone());
            }
        }

        if let Some(services) = &delta.service_delta {
            for (service, count) in services.iter() {
                let entry = self.ledger.entry(service.to_string()).or_insert(0);
                *entry += count;
                if *entry == 0 {
                    self.ledger.remove(service);
                }
            }
        }
        self.verify()
    }

    fn insert(&mut self, group: HomogeneousNodeGroup) {
        if group.node_count() == 0 {
            return;
        }
        self.groups
            .entry(group.key())
            .and_modify(|g| *g = g.with_node_count(g.node_count() + group.node_count()))
            .or_insert(group);
    }

    /// Remove nodes; presence was checked by `check_removal`.
    fn remove(&mut self, group: &HomogeneousNodeGroup) {
        let key = group.key();
        if let Some(existing) = self.groups.get(&key) {
            let left = existing.node_count().saturating_sub(group.node_count());
            if left == 0 {
                self.groups.remove(&key);
            } else {
                let shrunk = existing.with_node_count(left);
                self.groups.insert(key, shrunk);
            }
        }
    }

    /// Check that the groups and the service ledger agree.
    pub fn verify(&self) -> StateResult<()> {
        let from_groups = self.extract_collective_entity_state();
        for (service, state) in &from_groups {
            let from_ledger = self.ledger.get(service).copied().unwrap_or(0);
            if state.ready_count as i64 != from_ledger {
                return Err(self.diverged(service, state.ready_count as i64, from_ledger));
            }
        }
        for (service, from_ledger) in &self.ledger {
            if !from_groups.contains_key(service) {
                return Err(self.diverged(service, 0, *from_ledger));
            }
        }
        Ok(())
    }

    fn diverged(&self, service: &str, from_groups: i64, from_ledger: i64) -> StateError {
        StateError::Diverged {
            region: self.name.clone(),
            service: service.to_string(),
            from_groups,
            from_ledger,
        }
    }
}

/// Every region of the platform at one simulated instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlatformState {
    regions: BTreeMap<String, Region>,
}

impl PlatformState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A state with the given (empty) regions.
    pub fn with_regions<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = Self::new();
        for name in names {
            let name: String = name.into();
            state.ensure_region(&name);
        }
        state
    }

    pub fn region(&self, name: &str) -> Option<&Region> {
        self.regions.get(name)
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    pub fn ensure_region(&mut self, name: &str) -> &mut Region {
        self.regions
            .entry(name.to_string())
            .or_insert_with(|| Region::new(name))
    }

    /// Apply `delta` to `region`, creating the region if needed.
    pub fn apply(&mut self, region: &str, delta: &GeneralizedDelta) -> StateResult<()> {
        self.ensure_region(region).apply(delta)
    }

    pub fn can_apply(&self, region: &str, delta: &GeneralizedDelta) -> bool {
        match self.regions.get(region) {
            Some(r) => r.can_apply(delta),
            None => Region::new(region).can_apply(delta),
        }
    }

    /// Per-region, per-service instance counts.
    pub fn extract_collective_entity_state(
        &self,
    ) -> BTreeMap<String, BTreeMap<String, EntityCountState>> {
        self.regions
            .iter()
            .map(|(name, r)| (name.clone(), r.extract_collective_entity_state()))
            .collect()
    }

    /// Instance counts of one region; empty for unknown regions.
    pub fn region_entity_state(&self, region: &str) -> BTreeMap<String, EntityCountState> {
        self.regions
            .get(region)
            .map(Region::extract_collective_entity_state)
            .unwrap_or_default()
    }
}
