//! Homogeneous node groups: identical nodes hosting an identical service mix.
//!
//! A group is identified by its [`NodeGroupKey`]: the node type plus the
//! per-node instance count of every service. Mutations never modify a group
//! in place; they return the resulting fragments instead, because a change
//! that does not divide evenly across the nodes turns one group into several.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use scalesim_core::NodeTypeId;

use crate::capacity::{Capacity, RequirementMap};
use crate::delta::{ServiceCountDelta, Sign};
use crate::error::{StateError, StateResult};

/// Per-node instance count of each service. Zero counts are never stored.
pub type ServiceMix = BTreeMap<String, u64>;

/// Structural identity of a node group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeGroupKey {
    pub node_type: NodeTypeId,
    pub services: Vec<(String, u64)>,
}

impl NodeGroupKey {
    /// Short, stable digest of the key for logs and reports.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.to_string().as_bytes());
        hex::encode(&digest[..6])
    }
}

impl fmt::Display for NodeGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mix: Vec<String> = self.services.iter().map(|(s, c)| format!("{s}={c}")).collect();
        write!(f, "{}[{}]", self.node_type, mix.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomogeneousNodeGroup {
    node_type: NodeTypeId,
    node_count: u64,
    services: ServiceMix,
    /// Capacity taken on each node of the group.
    capacity_taken: Capacity,
}

/// Outcome of [`HomogeneousNodeGroup::apply_service_deltas`].
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMutation {
    /// Nodes the deltas did not touch, with the original mix.
    pub remaining: Option<HomogeneousNodeGroup>,
    /// Changed nodes, one group per resulting mix.
    pub new_groups: Vec<HomogeneousNodeGroup>,
    /// Portion of the deltas that could not be realized.
    pub unmet: ServiceCountDelta,
    /// Portion of the deltas that was realized.
    pub applied: ServiceCountDelta,
}

/// Outcome of [`HomogeneousNodeGroup::split`].
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSplit {
    pub remaining: Option<HomogeneousNodeGroup>,
    pub removed: Option<HomogeneousNodeGroup>,
    /// Instance change implied by dropping `removed` (non-positive).
    pub services_removed: ServiceCountDelta,
}

impl HomogeneousNodeGroup {
    /// Build a group, computing the capacity each node's mix takes.
    ///
    /// `requirements` must cover every service in `services`.
    pub fn new(
        node_type: NodeTypeId,
        node_count: u64,
        mut services: ServiceMix,
        requirements: &RequirementMap,
    ) -> StateResult<Self> {
        services.retain(|_, c| *c > 0);
        let capacity_taken = mix_capacity(&node_type, &services, requirements)?;
        Ok(Self {
            node_type,
            node_count,
            services,
            capacity_taken,
        })
    }

    /// `node_count` idle nodes.
    pub fn empty(node_type: NodeTypeId, node_count: u64) -> Self {
        Self {
            capacity_taken: Capacity::empty(node_type.clone()),
            node_type,
            node_count,
            services: ServiceMix::new(),
        }
    }

    pub fn key(&self) -> NodeGroupKey {
        NodeGroupKey {
            node_type: self.node_type.clone(),
            services: self.services.iter().map(|(s, c)| (s.clone(), *c)).collect(),
        }
    }

    pub fn node_type(&self) -> &NodeTypeId {
        &self.node_type
    }

    pub fn node_count(&self) -> u64 {
        self.node_count
    }

    /// Per-node service mix.
    pub fn services(&self) -> &ServiceMix {
        &self.services
    }

    pub fn capacity_taken(&self) -> &Capacity {
        &self.capacity_taken
    }

    /// True when the nodes host no instances.
    pub fn is_idle(&self) -> bool {
        self.services.is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        self.capacity_taken.is_exhausted()
    }

    /// Instances of `service` across the whole group.
    pub fn instance_count(&self, service: &str) -> u64 {
        self.services.get(service).copied().unwrap_or(0) * self.node_count
    }

    /// Instances of every service across the whole group.
    pub fn instance_counts(&self) -> BTreeMap<String, u64> {
        self.services
            .iter()
            .map(|(s, c)| (s.clone(), c * self.node_count))
            .collect()
    }

    /// The instance change of adding (`Plus`) or dropping (`Minus`) the group.
    pub fn instance_delta(&self, sign: Sign) -> ServiceCountDelta {
        ServiceCountDelta::from_counts(
            self.instance_counts()
                .into_iter()
                .map(|(s, c)| (s, sign.as_i64() * c as i64)),
        )
    }

    pub fn with_node_count(&self, node_count: u64) -> Self {
        Self {
            node_count,
            ..self.clone()
        }
    }

    /// The same nodes with every instance removed.
    pub fn emptied(&self) -> Self {
        Self::empty(self.node_type.clone(), self.node_count)
    }

    /// Whether one more instance needing `requirement` fits on a node.
    pub fn can_accommodate(&self, requirement: &Capacity) -> StateResult<bool> {
        self.capacity_taken.fits(requirement)
    }

    /// Greedily realize `deltas` on the group's nodes, one node at a time.
    ///
    /// Removals are applied first on each node, then additions while the
    /// node has room; services with the largest requirement go first. A
    /// node is finished before the next one is touched, so reductions free
    /// whole nodes and additions fill whole nodes.
    pub fn apply_service_deltas(
        &self,
        deltas: &ServiceCountDelta,
        requirements: &RequirementMap,
    ) -> StateResult<GroupMutation> {
        let order = processing_order(deltas, requirements);
        let mut outstanding: BTreeMap<String, i64> =
            deltas.iter().map(|(s, c)| (s.to_string(), c)).collect();
        let mut fragments: BTreeMap<NodeGroupKey, HomogeneousNodeGroup> = BTreeMap::new();
        let mut touched = 0;

        while touched < self.node_count {
            let mut mix = self.services.clone();
            let mut changed = false;

            for service in &order {
                let want = outstanding[service];
                if want >= 0 {
                    continue;
                }
                let present = mix.get(service).copied().unwrap_or(0);
                let take = present.min(want.unsigned_abs());
                if take > 0 {
                    set_count(&mut mix, service, present - take);
                    outstanding.insert(service.clone(), want + take as i64);
                    changed = true;
                }
            }

            let mut capacity = mix_capacity(&self.node_type, &mix, requirements)?;
            for service in &order {
                let want = outstanding[service];
                if want <= 0 {
                    continue;
                }
                let Some(requirement) = requirements.get(service) else {
                    continue;
                };
                let mut added = 0i64;
                while added < want && capacity.fits(requirement)? {
                    capacity = capacity.add(requirement)?;
                    added += 1;
                }
                if added > 0 {
                    let present = mix.get(service).copied().unwrap_or(0);
                    set_count(&mut mix, service, present + added as u64);
                    outstanding.insert(service.clone(), want - added);
                    changed = true;
                }
            }

            // Every remaining node is identical to this one and the
            // outstanding deltas only shrank, so none of them would change.
            if !changed {
                break;
            }

            let node = Self::new(self.node_type.clone(), 1, mix, requirements)?;
            fragments
                .entry(node.key())
                .and_modify(|g| g.node_count += 1)
                .or_insert(node);
            touched += 1;
        }

        let unmet = ServiceCountDelta::from_counts(outstanding);
        Ok(GroupMutation {
            remaining: (touched < self.node_count)
                .then(|| self.with_node_count(self.node_count - touched)),
            new_groups: fragments.into_values().collect(),
            applied: deltas.combine(&unmet.invert()),
            unmet,
        })
    }

    /// Split `fragment_node_count` nodes off the group.
    pub fn split(&self, fragment_node_count: u64) -> StateResult<GroupSplit> {
        if fragment_node_count > self.node_count {
            return Err(StateError::SplitOutOfRange {
                requested: fragment_node_count,
                available: self.node_count,
            });
        }
        let remaining_count = self.node_count - fragment_node_count;
        let removed = (fragment_node_count > 0).then(|| self.with_node_count(fragment_node_count));
        Ok(GroupSplit {
            remaining: (remaining_count > 0).then(|| self.with_node_count(remaining_count)),
            services_removed: removed
                .as_ref()
                .map(|g| g.instance_delta(Sign::Minus))
                .unwrap_or_default(),
            removed,
        })
    }

    /// Combine two groups with the same key into one.
    pub fn merge(&self, other: &HomogeneousNodeGroup) -> StateResult<Self> {
        let (a, b) = (self.key(), other.key());
        if a != b {
            return Err(StateError::KeyMismatch(a.to_string(), b.to_string()));
        }
        Ok(self.with_node_count(self.node_count + other.node_count))
    }
}

impl fmt::Display for HomogeneousNodeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x{}", self.key(), self.node_count)
    }
}

fn set_count(mix: &mut ServiceMix, service: &str, count: u64) {
    if count == 0 {
        mix.remove(service);
    } else {
        mix.insert(service.to_string(), count);
    }
}

/// Capacity one node takes when hosting `mix`.
fn mix_capacity(
    node_type: &NodeTypeId,
    mix: &ServiceMix,
    requirements: &RequirementMap,
) -> StateResult<Capacity> {
    let mut capacity = Capacity::empty(node_type.clone());
    for (service, count) in mix {
        let requirement =
            requirements
                .get(service)
                .ok_or_else(|| StateError::MissingRequirement {
                    service: service.clone(),
                    node_type: node_type.clone(),
                })?;
        capacity = capacity.add(&requirement.scale(*count))?;
    }
    Ok(capacity)
}

/// Services in `deltas`, largest requirement first.
fn processing_order(deltas: &ServiceCountDelta, requirements: &RequirementMap) -> Vec<String> {
    let mut order: Vec<(String, f64)> = deltas
        .services()
        .map(|s| {
            let weight = requirements.get(s).map(Capacity::collapse).unwrap_or(0.0);
            (s.to_string(), weight)
        })
        .collect();
    order.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    order.into_iter().map(|(s, _)| s).collect()
}
