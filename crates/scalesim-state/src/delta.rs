//! State deltas: the only way platform state changes.
//!
//! A [`GeneralizedDelta`] couples a physical change to a node group with the
//! logical change in service instance counts it causes. Deltas are values:
//! combining or inverting one produces a new delta.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};
use crate::node_group::HomogeneousNodeGroup;

// ── Service counts ─────────────────────────────────────────────────

/// Signed per-service instance count change. Zero entries are pruned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceCountDelta {
    counts: BTreeMap<String, i64>,
}

impl ServiceCountDelta {
    pub fn single(service: impl Into<String>, count: i64) -> Self {
        Self::from_counts([(service.into(), count)])
    }

    pub fn from_counts(counts: impl IntoIterator<Item = (String, i64)>) -> Self {
        let mut out = Self::default();
        for (service, count) in counts {
            out.add(&service, count);
        }
        out
    }

    /// Add `count` to `service` in place.
    pub fn add(&mut self, service: &str, count: i64) {
        if count == 0 {
            return;
        }
        let entry = self.counts.entry(service.to_string()).or_insert(0);
        *entry += count;
        if *entry == 0 {
            self.counts.remove(service);
        }
    }

    pub fn get(&self, service: &str) -> i64 {
        self.counts.get(service).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.counts.iter().map(|(s, c)| (s.as_str(), *c))
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }

    /// Sum of two deltas, service by service.
    pub fn combine(&self, other: &ServiceCountDelta) -> ServiceCountDelta {
        let mut out = self.clone();
        for (service, count) in other.iter() {
            out.add(service, count);
        }
        out
    }

    pub fn invert(&self) -> ServiceCountDelta {
        ServiceCountDelta {
            counts: self.counts.iter().map(|(s, c)| (s.clone(), -c)).collect(),
        }
    }

    pub fn positive_part(&self) -> ServiceCountDelta {
        Self::from_counts(self.iter().filter(|(_, c)| *c > 0).map(|(s, c)| (s.to_string(), c)))
    }

    pub fn negative_part(&self) -> ServiceCountDelta {
        Self::from_counts(self.iter().filter(|(_, c)| *c < 0).map(|(s, c)| (s.to_string(), c)))
    }

    /// Entries sorted ascending by value, so reductions come before increases.
    pub fn ascending(&self) -> Vec<(String, i64)> {
        let mut entries: Vec<(String, i64)> =
            self.counts.iter().map(|(s, c)| (s.clone(), *c)).collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }
}

impl fmt::Display for ServiceCountDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.counts.iter().map(|(s, c)| format!("{s}:{c:+}")).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

// ── Node group deltas ──────────────────────────────────────────────

/// Identifier the delta timeline assigns to every accepted delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeltaId(pub u64);

impl fmt::Display for DeltaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sign {
    Plus,
    Minus,
}

impl Sign {
    pub fn as_i64(self) -> i64 {
        match self {
            Sign::Plus => 1,
            Sign::Minus => -1,
        }
    }

    pub fn invert(self) -> Sign {
        match self {
            Sign::Plus => Sign::Minus,
            Sign::Minus => Sign::Plus,
        }
    }
}

/// What a node group delta does to the nodes it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeChange {
    /// Nodes are booted (`Plus`) or terminated (`Minus`).
    Scale,
    /// The same nodes keep running with a new service mix.
    Reshape { to: HomogeneousNodeGroup },
    /// Bookkeeping only: cancels part of the pending removal `compensates`.
    Compensating { compensates: DeltaId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGroupDelta {
    pub group: HomogeneousNodeGroup,
    pub sign: Sign,
    /// `true` while the delta waits for its enforcement delay.
    pub in_change: bool,
    pub change: NodeChange,
}

impl NodeGroupDelta {
    /// Whether the delta is bookkeeping only and never touches state.
    pub fn is_virtual(&self) -> bool {
        matches!(self.change, NodeChange::Compensating { .. })
    }

    /// Whether the delta boots or terminates nodes.
    pub fn is_physical(&self) -> bool {
        matches!(self.change, NodeChange::Scale)
    }
}

/// A node group change together with the service count change it enables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralizedDelta {
    pub node_group_delta: NodeGroupDelta,
    pub service_delta: Option<ServiceCountDelta>,
}

impl GeneralizedDelta {
    fn new(group: HomogeneousNodeGroup, sign: Sign, change: NodeChange, services: ServiceCountDelta) -> Self {
        Self {
            node_group_delta: NodeGroupDelta {
                group,
                sign,
                in_change: true,
                change,
            },
            service_delta: (!services.is_empty()).then_some(services),
        }
    }

    /// Boot `group` together with the instances it hosts.
    pub fn provision(group: HomogeneousNodeGroup) -> Self {
        let services = group.instance_delta(Sign::Plus);
        Self::new(group, Sign::Plus, NodeChange::Scale, services)
    }

    /// Terminate `group` together with the instances it hosts.
    pub fn decommission(group: HomogeneousNodeGroup) -> Self {
        let services = group.instance_delta(Sign::Minus);
        Self::new(group, Sign::Minus, NodeChange::Scale, services)
    }

    /// Rewrite the service mix of `from`'s nodes into `to`'s.
    pub fn reshape(from: HomogeneousNodeGroup, to: HomogeneousNodeGroup) -> StateResult<Self> {
        if from.node_type() != to.node_type() || from.node_count() != to.node_count() {
            return Err(StateError::UnevenReshape(format!(
                "{} x{} -> {} x{}",
                from.node_type(),
                from.node_count(),
                to.node_type(),
                to.node_count()
            )));
        }
        let services = to
            .instance_delta(Sign::Plus)
            .combine(&from.instance_delta(Sign::Minus));
        Ok(Self::new(from, Sign::Plus, NodeChange::Reshape { to }, services))
    }

    /// Cancel the removal of `rescued` (a fragment of the group the pending
    /// removal `compensates` terminates), including its instances.
    pub fn compensating(compensates: DeltaId, rescued: HomogeneousNodeGroup) -> Self {
        let services = rescued.instance_delta(Sign::Plus);
        Self::new(rescued, Sign::Plus, NodeChange::Compensating { compensates }, services)
    }

    /// An instantaneous node failure: `group` disappears with its instances
    /// and no enforcement delay.
    pub fn node_failure(group: HomogeneousNodeGroup) -> Self {
        let mut delta = Self::decommission(group);
        delta.node_group_delta.in_change = false;
        delta
    }

    pub fn group(&self) -> &HomogeneousNodeGroup {
        &self.node_group_delta.group
    }

    pub fn sign(&self) -> Sign {
        self.node_group_delta.sign
    }

    pub fn in_change(&self) -> bool {
        self.node_group_delta.in_change
    }

    pub fn is_virtual(&self) -> bool {
        self.node_group_delta.is_virtual()
    }

    /// The service change, or an empty delta.
    pub fn services(&self) -> ServiceCountDelta {
        self.service_delta.clone().unwrap_or_default()
    }

    /// The same change, now past its enforcement delay.
    pub fn enforce(mut self) -> Self {
        self.node_group_delta.in_change = false;
        self
    }

    /// The opposite change. Only physical and reshape deltas can be
    /// inverted; a compensation has no meaningful inverse.
    pub fn invert(&self) -> StateResult<Option<Self>> {
        match &self.node_group_delta.change {
            NodeChange::Scale => Ok(Some(Self {
                node_group_delta: NodeGroupDelta {
                    sign: self.sign().invert(),
                    ..self.node_group_delta.clone()
                },
                service_delta: self.service_delta.as_ref().map(ServiceCountDelta::invert),
            })),
            NodeChange::Reshape { to } => {
                let mut back = Self::reshape(to.clone(), self.group().clone())?;
                back.node_group_delta.in_change = self.in_change();
                Ok(Some(back))
            }
            NodeChange::Compensating { .. } => Ok(None),
        }
    }

    /// This removal with the `rescued` fragment taken out of it. Returns
    /// `None` when nothing physical remains to remove.
    pub fn without_fragment(&self, rescued: &HomogeneousNodeGroup) -> StateResult<Option<Self>> {
        let split = self.group().split(rescued.node_count())?;
        Ok(split.remaining.map(|rest| {
            let mut delta = Self::decommission(rest);
            delta.node_group_delta.in_change = self.in_change();
            delta
        }))
    }
}
