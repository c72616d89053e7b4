//! Recipe scoring for provisioning decisions.
//!
//! A [`Score`] carries its unit so that scores of different kinds are never
//! compared or combined by accident. Each unit knows whether higher or lower
//! values are better; [`Score::compare`] folds that in, so `Greater` always
//! means "better".

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use scalesim_core::NodeType;

use crate::calculator::PlacementRecipe;
use crate::error::{PlacementError, PlacementResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreUnit {
    /// Money spent over the provisioning horizon; lower is better.
    Price,
    /// Mean node utilization in `[0, 1]`; higher is better.
    Packing,
}

impl ScoreUnit {
    pub fn higher_is_better(self) -> bool {
        matches!(self, ScoreUnit::Packing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub unit: ScoreUnit,
    pub value: f64,
}

impl Score {
    pub fn new(unit: ScoreUnit, value: f64) -> Self {
        Self { unit, value }
    }

    fn check_unit(&self, other: &Score) -> PlacementResult<()> {
        if self.unit != other.unit {
            return Err(PlacementError::ScoreUnitMismatch {
                left: self.unit,
                right: other.unit,
            });
        }
        Ok(())
    }

    /// Sum of two scores of the same unit.
    pub fn combine(&self, other: &Score) -> PlacementResult<Score> {
        self.check_unit(other)?;
        Ok(Score::new(self.unit, self.value + other.value))
    }

    pub fn scale(&self, factor: f64) -> Score {
        Score::new(self.unit, self.value * factor)
    }

    /// `Greater` when `self` is the better score.
    pub fn compare(&self, other: &Score) -> PlacementResult<Ordering> {
        self.check_unit(other)?;
        let raw = self.value.total_cmp(&other.value);
        Ok(if self.unit.higher_is_better() {
            raw
        } else {
            raw.reverse()
        })
    }

    pub fn is_better_than(&self, other: &Score) -> PlacementResult<bool> {
        Ok(self.compare(other)? == Ordering::Greater)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            ScoreUnit::Price => write!(f, "{:.4}$", self.value),
            ScoreUnit::Packing => write!(f, "{:.1}%", self.value * 100.0),
        }
    }
}

/// Evaluates a placement recipe on the node type it was built for.
pub trait Scorer {
    fn name(&self) -> &'static str;

    fn score(&self, recipe: &PlacementRecipe, node_type: &NodeType, horizon: Duration) -> Score;
}

/// Cost of running the recipe's nodes for the provisioning horizon.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceScorer;

impl Scorer for PriceScorer {
    fn name(&self) -> &'static str {
        "price"
    }

    fn score(&self, recipe: &PlacementRecipe, node_type: &NodeType, horizon: Duration) -> Score {
        Score::new(ScoreUnit::Price, node_type.price_for(recipe.node_count(), horizon))
    }
}

/// Node-weighted mean utilization of the recipe's nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackingScorer;

impl Scorer for PackingScorer {
    fn name(&self) -> &'static str {
        "packing"
    }

    fn score(&self, recipe: &PlacementRecipe, _node_type: &NodeType, _horizon: Duration) -> Score {
        let nodes = recipe.node_count();
        if nodes == 0 {
            return Score::new(ScoreUnit::Packing, 0.0);
        }
        let used: f64 = recipe
            .groups
            .iter()
            .map(|g| g.capacity_taken().collapse() * g.node_count() as f64)
            .sum();
        Score::new(ScoreUnit::Packing, used / nodes as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scalesim_core::{NodeTypeId, ResourceVector};
    use scalesim_state::{Capacity, HomogeneousNodeGroup, RequirementMap, ServiceCountDelta};

    fn make_node_type(price: f64) -> NodeType {
        NodeType::new(NodeTypeId::new("aws", "m"), ResourceVector::new(4.0, 4096.0, 0.0), price)
    }

    fn make_recipe(nodes: u64, api_per_node: u64) -> PlacementRecipe {
        let node_type = make_node_type(1.0);
        let mut reqs = RequirementMap::new();
        reqs.insert(
            "api".to_string(),
            Capacity::from_requirement(
                node_type.id.clone(),
                &ResourceVector::new(1.0, 1024.0, 0.0),
                &node_type.capacity,
            ),
        );
        let group = HomogeneousNodeGroup::new(
            node_type.id.clone(),
            nodes,
            [("api".to_string(), api_per_node)].into(),
            &reqs,
        )
        .unwrap();
        PlacementRecipe {
            placer: "specialized",
            node_type: node_type.id,
            placed: ServiceCountDelta::single("api", (nodes * api_per_node) as i64),
            groups: vec![group],
        }
    }

    #[test]
    fn price_scales_with_nodes_and_horizon() {
        let s = PriceScorer.score(&make_recipe(3, 4), &make_node_type(0.5), Duration::from_secs(7200));
        assert_eq!(s.unit, ScoreUnit::Price);
        assert!((s.value - 3.0).abs() < 1e-9);
    }

    #[test]
    fn cheaper_price_is_better() {
        let cheap = Score::new(ScoreUnit::Price, 1.0);
        let dear = Score::new(ScoreUnit::Price, 2.0);
        assert!(cheap.is_better_than(&dear).unwrap());
        assert!(!dear.is_better_than(&cheap).unwrap());
        assert_eq!(cheap.compare(&cheap).unwrap(), Ordering::Equal);
    }

    #[test]
    fn fuller_packing_is_better() {
        let full = PackingScorer.score(&make_recipe(1, 4), &make_node_type(1.0), Duration::ZERO);
        let half = PackingScorer.score(&make_recipe(1, 2), &make_node_type(1.0), Duration::ZERO);
        assert!(full.is_better_than(&half).unwrap());
    }

    #[test]
    fn mixed_units_are_rejected() {
        let price = Score::new(ScoreUnit::Price, 1.0);
        let packing = Score::new(ScoreUnit::Packing, 0.5);
        assert!(matches!(
            price.compare(&packing),
            Err(PlacementError::ScoreUnitMismatch { .. })
        ));
        assert!(price.combine(&packing).is_err());
        assert_eq!(price.combine(&price).unwrap().value, 2.0);
        assert_eq!(price.scale(3.0).value, 3.0);
    }
}
