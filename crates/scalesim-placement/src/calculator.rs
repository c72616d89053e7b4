//! Desired-state calculator: decides what new capacity to provision.
//!
//! Demand that existing nodes cannot absorb is turned into new node groups
//! in three stages:
//! 1. **Place**: every configured [`Placer`] builds a [`PlacementRecipe`]
//!    for every node type, covering the services that fit it.
//! 2. **Score**: the configured [`Scorer`] rates each recipe over the
//!    provisioning horizon.
//! 3. **Optimize**: the configured [`Optimizer`] picks among the recipes
//!    that cover the whole demand. When none does, the best recipe among
//!    those covering the most services is committed and the rest of the
//!    demand goes round again.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use scalesim_core::{NodeType, NodeTypeId};
use scalesim_state::{
    Capacity, GeneralizedDelta, HomogeneousNodeGroup, RequirementMap, ServiceCountDelta,
    ServiceMix,
};

use crate::convert::RequirementCatalog;
use crate::error::PlacementResult;
use crate::scorer::{Score, Scorer};

/// New node groups of a single node type, as proposed by one placer.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementRecipe {
    pub placer: &'static str,
    pub node_type: NodeTypeId,
    pub groups: Vec<HomogeneousNodeGroup>,
    /// Instances the groups host, per service.
    pub placed: ServiceCountDelta,
}

impl PlacementRecipe {
    pub fn node_count(&self) -> u64 {
        self.groups.iter().map(HomogeneousNodeGroup::node_count).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecipe {
    pub recipe: PlacementRecipe,
    pub score: Score,
}

/// Demand for a service no node type can host a single instance of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnfitRequirement {
    pub service: String,
    pub count: i64,
}

/// Result of [`DesiredStateCalculator::compute`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Provisioning {
    /// One `provision` delta per new node group.
    pub deltas: Vec<GeneralizedDelta>,
    /// Recipes committed, in order.
    pub chosen: Vec<ScoredRecipe>,
    pub unfit: Vec<UnfitRequirement>,
}

// ── Placers ────────────────────────────────────────────────────────

/// Builds a recipe for the positive entries of `demand` on one node type.
///
/// Services without a requirement on the node type, or too large for an
/// idle node of it, are left out of the recipe. `None` means nothing fits.
pub trait Placer {
    fn name(&self) -> &'static str;

    fn place(
        &self,
        node_type: &NodeType,
        requirements: &RequirementMap,
        demand: &ServiceCountDelta,
    ) -> PlacementResult<Option<PlacementRecipe>>;
}

/// One service per node, each node packed as full as it goes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecializedPlacer;

impl Placer for SpecializedPlacer {
    fn name(&self) -> &'static str {
        "specialized"
    }

    fn place(
        &self,
        node_type: &NodeType,
        requirements: &RequirementMap,
        demand: &ServiceCountDelta,
    ) -> PlacementResult<Option<PlacementRecipe>> {
        let mut groups = Vec::new();
        let mut placed = ServiceCountDelta::default();

        for (service, count) in demand.iter() {
            if count <= 0 {
                continue;
            }
            let Some(requirement) = requirements.get(service) else {
                continue;
            };
            let count = count as u64;
            let per_node = instances_per_node(&node_type.id, requirement, count)?;
            if per_node == 0 {
                continue;
            }

            let (full, rest) = (count / per_node, count % per_node);
            if full > 0 {
                groups.push(single_service_group(node_type, service, full, per_node, requirements)?);
            }
            if rest > 0 {
                groups.push(single_service_group(node_type, service, 1, rest, requirements)?);
            }
            placed.add(service, count as i64);
        }

        Ok((!groups.is_empty()).then(|| PlacementRecipe {
            placer: self.name(),
            node_type: node_type.id.clone(),
            groups,
            placed,
        }))
    }
}

/// Nodes host an even mixture of the demanded services, largest first.
/// Falls back to [`SpecializedPlacer`] when no mixture can be built.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalancedPlacer;

impl BalancedPlacer {
    fn mix(
        &self,
        node_type: &NodeType,
        requirements: &RequirementMap,
        demand: &ServiceCountDelta,
    ) -> PlacementResult<Option<PlacementRecipe>> {
        let idle = Capacity::empty(node_type.id.clone());
        let mut remaining: BTreeMap<String, u64> = BTreeMap::new();
        let mut order: Vec<(String, f64)> = Vec::new();
        for (service, count) in demand.iter() {
            let Some(requirement) = requirements.get(service) else {
                continue;
            };
            if count > 0 && idle.fits(requirement)? {
                remaining.insert(service.to_string(), count as u64);
                order.push((service.to_string(), requirement.collapse()));
            }
        }
        order.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let placed = ServiceCountDelta::from_counts(
            remaining.iter().map(|(s, c)| (s.clone(), *c as i64)),
        );
        let mut groups: BTreeMap<_, HomogeneousNodeGroup> = BTreeMap::new();

        while remaining.values().any(|c| *c > 0) {
            // Round-robin one instance of each service until the node is full.
            let mut node = ServiceMix::new();
            let mut taken = idle.clone();
            loop {
                let mut added = false;
                for (service, _) in &order {
                    let left = remaining.get(service).copied().unwrap_or(0);
                    let on_node = node.get(service).copied().unwrap_or(0);
                    let Some(requirement) = requirements.get(service) else {
                        continue;
                    };
                    if on_node < left && taken.fits(requirement)? {
                        taken = taken.add(requirement)?;
                        *node.entry(service.clone()).or_insert(0) += 1;
                        added = true;
                    }
                }
                if !added {
                    break;
                }
            }
            if node.is_empty() {
                return Ok(None);
            }

            let copies = node
                .iter()
                .map(|(s, c)| remaining.get(s).copied().unwrap_or(0) / c)
                .min()
                .unwrap_or(1)
                .max(1);
            for (service, count) in &node {
                if let Some(left) = remaining.get_mut(service) {
                    *left = left.saturating_sub(count * copies);
                }
            }
            let group = HomogeneousNodeGroup::new(node_type.id.clone(), copies, node, requirements)?;
            match groups.get_mut(&group.key()) {
                Some(existing) => *existing = existing.merge(&group)?,
                None => {
                    groups.insert(group.key(), group);
                }
            }
        }

        if groups.is_empty() {
            return Ok(None);
        }
        Ok(Some(PlacementRecipe {
            placer: self.name(),
            node_type: node_type.id.clone(),
            groups: groups.into_values().collect(),
            placed,
        }))
    }
}

impl Placer for BalancedPlacer {
    fn name(&self) -> &'static str {
        "balanced"
    }

    fn place(
        &self,
        node_type: &NodeType,
        requirements: &RequirementMap,
        demand: &ServiceCountDelta,
    ) -> PlacementResult<Option<PlacementRecipe>> {
        match self.mix(node_type, requirements, demand) {
            Ok(Some(recipe)) => Ok(Some(recipe)),
            Ok(None) => SpecializedPlacer.place(node_type, requirements, demand),
            Err(e) => {
                debug!(node_type = %node_type.id, error = %e, "mixture failed, placing specialized");
                SpecializedPlacer.place(node_type, requirements, demand)
            }
        }
    }
}

fn instances_per_node(
    node_type: &NodeTypeId,
    requirement: &Capacity,
    limit: u64,
) -> PlacementResult<u64> {
    let mut taken = Capacity::empty(node_type.clone());
    let mut count = 0;
    while count < limit && taken.fits(requirement)? {
        taken = taken.add(requirement)?;
        count += 1;
    }
    Ok(count)
}

fn single_service_group(
    node_type: &NodeType,
    service: &str,
    node_count: u64,
    per_node: u64,
    requirements: &RequirementMap,
) -> PlacementResult<HomogeneousNodeGroup> {
    Ok(HomogeneousNodeGroup::new(
        node_type.id.clone(),
        node_count,
        [(service.to_string(), per_node)].into(),
        requirements,
    )?)
}

// ── Optimizers ─────────────────────────────────────────────────────

/// Picks one recipe out of scored candidates.
pub trait Optimizer {
    fn name(&self) -> &'static str;

    /// Index of the chosen candidate; `None` for an empty slice.
    fn select(&self, candidates: &[ScoredRecipe]) -> PlacementResult<Option<usize>>;
}

/// Best score wins; the first-seen recipe wins ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxScoreOptimizer;

impl Optimizer for MaxScoreOptimizer {
    fn name(&self) -> &'static str {
        "max_score"
    }

    fn select(&self, candidates: &[ScoredRecipe]) -> PlacementResult<Option<usize>> {
        let mut best: Option<usize> = None;
        for (i, candidate) in candidates.iter().enumerate() {
            match best {
                None => best = Some(i),
                Some(b) if candidate.score.is_better_than(&candidates[b].score)? => best = Some(i),
                Some(_) => {}
            }
        }
        Ok(best)
    }
}

// ── Calculator ─────────────────────────────────────────────────────

pub struct DesiredStateCalculator {
    placers: Vec<Arc<dyn Placer>>,
    scorer: Arc<dyn Scorer>,
    optimizer: Arc<dyn Optimizer>,
    horizon: Duration,
}

impl DesiredStateCalculator {
    pub fn new(
        placers: Vec<Arc<dyn Placer>>,
        scorer: Arc<dyn Scorer>,
        optimizer: Arc<dyn Optimizer>,
        horizon: Duration,
    ) -> Self {
        Self {
            placers,
            scorer,
            optimizer,
            horizon,
        }
    }

    /// Both built-in placers, the price scorer and the max-score optimizer.
    pub fn with_defaults(horizon: Duration) -> Self {
        let placers: Vec<Arc<dyn Placer>> =
            vec![Arc::new(SpecializedPlacer), Arc::new(BalancedPlacer)];
        Self::new(
            placers,
            Arc::new(crate::scorer::PriceScorer),
            Arc::new(MaxScoreOptimizer),
            horizon,
        )
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    /// New node groups for the positive entries of `demand`.
    pub fn compute(
        &self,
        demand: &ServiceCountDelta,
        requirements: &RequirementCatalog,
    ) -> PlacementResult<Provisioning> {
        let mut remaining = ServiceCountDelta::default();
        let mut unfit = Vec::new();
        for (service, count) in demand.positive_part().iter() {
            if requirements.fits_anywhere(service) {
                remaining.add(service, count);
            } else {
                warn!(service, count, "service fits no node type");
                unfit.push(UnfitRequirement {
                    service: service.to_string(),
                    count,
                });
            }
        }

        let mut out = Provisioning {
            unfit,
            ..Default::default()
        };

        while !remaining.is_empty() {
            let candidates = self.candidates(&remaining, requirements)?;
            let (complete, partial): (Vec<_>, Vec<_>) = candidates
                .into_iter()
                .partition(|c| c.recipe.placed == remaining);
            let pool = if complete.is_empty() {
                widest(partial)
            } else {
                complete
            };

            let Some(index) = self.optimizer.select(&pool)? else {
                for (service, count) in remaining.iter() {
                    warn!(service, count, "no recipe places service");
                    out.unfit.push(UnfitRequirement {
                        service: service.to_string(),
                        count,
                    });
                }
                break;
            };
            let Some(pick) = pool.into_iter().nth(index) else {
                break;
            };

            info!(
                placer = pick.recipe.placer,
                node_type = %pick.recipe.node_type,
                nodes = pick.recipe.node_count(),
                score = %pick.score,
                placed = %pick.recipe.placed,
                "recipe chosen"
            );
            remaining = remaining.combine(&pick.recipe.placed.invert());
            out.deltas.extend(
                pick.recipe
                    .groups
                    .iter()
                    .cloned()
                    .map(GeneralizedDelta::provision),
            );
            out.chosen.push(pick);
        }

        Ok(out)
    }

    fn candidates(
        &self,
        demand: &ServiceCountDelta,
        requirements: &RequirementCatalog,
    ) -> PlacementResult<Vec<ScoredRecipe>> {
        let mut out = Vec::new();
        for node_type in requirements.node_types() {
            let reqs = requirements.for_node_type(&node_type.id)?;
            for placer in &self.placers {
                if let Some(recipe) = placer.place(node_type, reqs, demand)? {
                    let score = self.scorer.score(&recipe, node_type, self.horizon);
                    debug!(
                        placer = recipe.placer,
                        node_type = %node_type.id,
                        nodes = recipe.node_count(),
                        score = %score,
                        "recipe scored"
                    );
                    out.push(ScoredRecipe { recipe, score });
                }
            }
        }
        Ok(out)
    }
}

/// The candidates covering the most services.
fn widest(candidates: Vec<ScoredRecipe>) -> Vec<ScoredRecipe> {
    let most = candidates
        .iter()
        .map(|c| c.recipe.placed.services().count())
        .max()
        .unwrap_or(0);
    candidates
        .into_iter()
        .filter(|c| c.recipe.placed.services().count() == most)
        .collect()
}
