//! Placement engine: realizes service count changes on existing nodes.
//!
//! Given the node groups of a region and a signed demand, the engine runs
//! three passes and emits the deltas that realize as much of the demand as
//! the existing capacity allows:
//! 1. **Decommission**: reductions are taken from the least-loaded groups
//!    first, so whole nodes are freed.
//! 2. **Fill**: additions go to the most-loaded groups first, so nodes are
//!    packed before fresh ones are used.
//! 3. **Rescue**: nodes freed in this cycle, then nodes whose removal is
//!    already in flight, are refilled with what is still outstanding instead
//!    of being terminated.
//!
//! Whatever cannot be realized is returned as the residual demand.

use tracing::{debug, info};

use scalesim_state::{DeltaId, GeneralizedDelta, GroupMutation, HomogeneousNodeGroup, ServiceCountDelta};

use crate::convert::RequirementCatalog;
use crate::error::PlacementResult;

/// A removal accepted earlier whose enforcement delay has not elapsed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRemoval {
    pub id: DeltaId,
    /// Nodes the removal will still terminate.
    pub group: HomogeneousNodeGroup,
}

/// Result of [`place_in_existing`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InPlacePlacement {
    /// Deltas in the order they were decided.
    pub deltas: Vec<GeneralizedDelta>,
    /// Demand the existing nodes could not absorb. Positive entries need
    /// new capacity; negative entries name instances that do not exist.
    pub unmet: ServiceCountDelta,
}

/// Realize `demand` on `groups`, rescuing nodes from `pending_removals` where
/// that avoids booting new ones.
pub fn place_in_existing(
    groups: &[HomogeneousNodeGroup],
    pending_removals: &[PendingRemoval],
    demand: &ServiceCountDelta,
    requirements: &RequirementCatalog,
) -> PlacementResult<InPlacePlacement> {
    let mut pass = Pass {
        requirements,
        outstanding: demand.clone(),
        deltas: Vec::new(),
    };

    // Idle nodes are only worth keeping if the rescue pass finds them work.
    let (mut freed, busy): (Vec<_>, Vec<_>) =
        groups.iter().cloned().partition(HomogeneousNodeGroup::is_idle);

    let busy = pass.decommission(busy, &mut freed)?;
    pass.fill(busy)?;
    let unrescued = pass.rescue_freed(freed)?;
    pass.rescue_pending(pending_removals)?;

    for group in unrescued {
        debug!(group = %group, "decommissioning freed nodes");
        pass.deltas.push(GeneralizedDelta::decommission(group));
    }

    if !pass.outstanding.is_empty() {
        debug!(unmet = %pass.outstanding, "demand not absorbed in place");
    }

    Ok(InPlacePlacement {
        deltas: pass.deltas,
        unmet: pass.outstanding,
    })
}

struct Pass<'a> {
    requirements: &'a RequirementCatalog,
    outstanding: ServiceCountDelta,
    deltas: Vec<GeneralizedDelta>,
}

impl Pass<'_> {
    fn mutate(
        &mut self,
        group: &HomogeneousNodeGroup,
        wanted: &ServiceCountDelta,
    ) -> PlacementResult<GroupMutation> {
        let requirements = self.requirements.for_node_type(group.node_type())?;
        let mutation = group.apply_service_deltas(wanted, requirements)?;
        self.outstanding = self.outstanding.combine(&mutation.applied.invert());
        Ok(mutation)
    }

    /// Returns the groups still hosting instances; emptied nodes go to `freed`.
    fn decommission(
        &mut self,
        mut groups: Vec<HomogeneousNodeGroup>,
        freed: &mut Vec<HomogeneousNodeGroup>,
    ) -> PlacementResult<Vec<HomogeneousNodeGroup>> {
        groups.sort_by(|a, b| by_load(a, b).then_with(|| a.key().cmp(&b.key())));

        let mut kept = Vec::with_capacity(groups.len());
        for group in groups {
            let wanted = self.outstanding.negative_part();
            if wanted.is_empty() {
                kept.push(group);
                continue;
            }
            let mutation = self.mutate(&group, &wanted)?;
            kept.extend(mutation.remaining);
            for fragment in mutation.new_groups {
                let from = group.with_node_count(fragment.node_count());
                if fragment.is_idle() {
                    debug!(group = %from, "nodes emptied");
                    freed.push(from);
                } else {
                    self.deltas.push(GeneralizedDelta::reshape(from, fragment.clone())?);
                    kept.push(fragment);
                }
            }
        }
        Ok(kept)
    }

    fn fill(&mut self, mut groups: Vec<HomogeneousNodeGroup>) -> PlacementResult<()> {
        groups.sort_by(|a, b| by_load(b, a).then_with(|| a.key().cmp(&b.key())));

        for group in groups {
            let wanted = self.outstanding.positive_part();
            if wanted.is_empty() {
                break;
            }
            let mutation = self.mutate(&group, &wanted)?;
            for fragment in mutation.new_groups {
                let from = group.with_node_count(fragment.node_count());
                debug!(from = %from, to = %fragment, "filled nodes");
                self.deltas.push(GeneralizedDelta::reshape(from, fragment)?);
            }
        }
        Ok(())
    }

    /// Refill nodes emptied in this cycle. Returns the nodes left idle.
    fn rescue_freed(
        &mut self,
        freed: Vec<HomogeneousNodeGroup>,
    ) -> PlacementResult<Vec<HomogeneousNodeGroup>> {
        let mut unrescued = Vec::new();
        for from in freed {
            let wanted = self.outstanding.positive_part();
            if wanted.is_empty() {
                unrescued.push(from);
                continue;
            }
            let mutation = self.mutate(&from.emptied(), &wanted)?;
            for fragment in mutation.new_groups {
                let rescued = from.with_node_count(fragment.node_count());
                debug!(from = %rescued, to = %fragment, "rescued freed nodes");
                self.deltas.push(GeneralizedDelta::reshape(rescued, fragment)?);
            }
            if let Some(rest) = mutation.remaining {
                unrescued.push(from.with_node_count(rest.node_count()));
            }
        }
        Ok(unrescued)
    }

    /// Refill nodes a pending removal would terminate: the removal is
    /// compensated for the rescued nodes, which are then reshaped.
    fn rescue_pending(&mut self, removals: &[PendingRemoval]) -> PlacementResult<()> {
        for removal in removals {
            let wanted = self.outstanding.positive_part();
            if wanted.is_empty() {
                break;
            }
            let mutation = self.mutate(&removal.group.emptied(), &wanted)?;
            for fragment in mutation.new_groups {
                let rescued = removal.group.with_node_count(fragment.node_count());
                info!(
                    compensates = %removal.id,
                    nodes = rescued.node_count(),
                    to = %fragment,
                    "rescued nodes from pending removal"
                );
                self.deltas
                    .push(GeneralizedDelta::compensating(removal.id, rescued.clone()));
                self.deltas.push(GeneralizedDelta::reshape(rescued, fragment)?);
            }
        }
        Ok(())
    }
}

fn by_load(a: &HomogeneousNodeGroup, b: &HomogeneousNodeGroup) -> std::cmp::Ordering {
    a.capacity_taken()
        .collapse()
        .total_cmp(&b.capacity_taken().collapse())
}
