//! Normalized resource consumption of one node.
//!
//! A [`Capacity`] records, per resource dimension, the share of a single
//! node of a given type that is taken: `0.0` is an idle node, `1.0` a node
//! with that dimension fully used. Arithmetic is only defined between
//! capacities of the same node type.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use scalesim_core::{NodeTypeId, ResourceVector};

use crate::error::{StateError, StateResult};

/// Slack tolerated when comparing against a full node, so that e.g. four
/// quarter-node instances fill a node exactly instead of overflowing it.
const EPSILON: f64 = 1e-9;

/// Capacity consumed by one instance of a service on a given node type.
pub type ServiceInstanceRequirement = Capacity;

/// Per-service instance requirements, all for the same node type.
pub type RequirementMap = BTreeMap<String, ServiceInstanceRequirement>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capacity {
    node_type: NodeTypeId,
    taken: [f64; 3],
}

impl Capacity {
    /// An idle node of `node_type`.
    pub fn empty(node_type: NodeTypeId) -> Self {
        Self {
            node_type,
            taken: [0.0; 3],
        }
    }

    /// The share of one `node_type` node (of absolute size `node_capacity`)
    /// that `requirement` takes.
    pub fn from_requirement(
        node_type: NodeTypeId,
        requirement: &ResourceVector,
        node_capacity: &ResourceVector,
    ) -> Self {
        Self {
            node_type,
            taken: requirement.normalized_by(node_capacity),
        }
    }

    pub fn node_type(&self) -> &NodeTypeId {
        &self.node_type
    }

    fn check_same_type(&self, other: &Capacity) -> StateResult<()> {
        if self.node_type != other.node_type {
            return Err(StateError::CapacityTypeMismatch {
                left: self.node_type.clone(),
                right: other.node_type.clone(),
            });
        }
        Ok(())
    }

    pub fn add(&self, other: &Capacity) -> StateResult<Capacity> {
        self.check_same_type(other)?;
        let mut taken = self.taken;
        for (t, o) in taken.iter_mut().zip(other.taken) {
            *t += o;
        }
        Ok(Capacity {
            node_type: self.node_type.clone(),
            taken,
        })
    }

    /// Subtract `other`, clamping at zero.
    pub fn subtract(&self, other: &Capacity) -> StateResult<Capacity> {
        self.check_same_type(other)?;
        let mut taken = self.taken;
        for (t, o) in taken.iter_mut().zip(other.taken) {
            *t = (*t - o).max(0.0);
        }
        Ok(Capacity {
            node_type: self.node_type.clone(),
            taken,
        })
    }

    pub fn scale(&self, factor: u64) -> Capacity {
        let mut taken = self.taken;
        for t in taken.iter_mut() {
            // 0 * inf stays 0: zero instances of an unplaceable service take nothing.
            *t = if factor == 0 { 0.0 } else { *t * factor as f64 };
        }
        Capacity {
            node_type: self.node_type.clone(),
            taken,
        }
    }

    /// True when some dimension takes more than the whole node.
    pub fn is_exhausted(&self) -> bool {
        self.taken.iter().any(|t| *t > 1.0 + EPSILON)
    }

    pub fn is_empty(&self) -> bool {
        self.taken.iter().all(|t| *t <= EPSILON)
    }

    /// Mean utilization across dimensions; grows monotonically towards
    /// exhaustion and is used as a sort key.
    pub fn collapse(&self) -> f64 {
        self.taken.iter().sum::<f64>() / self.taken.len() as f64
    }

    /// Whether `requirement` can be added without exhausting the node.
    pub fn fits(&self, requirement: &Capacity) -> StateResult<bool> {
        Ok(!self.add(requirement)?.is_exhausted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m() -> NodeTypeId {
        NodeTypeId::new("aws", "m")
    }

    fn node_capacity() -> ResourceVector {
        ResourceVector::new(4.0, 4096.0, 0.0)
    }

    fn slot() -> Capacity {
        Capacity::from_requirement(m(), &ResourceVector::new(1.0, 1024.0, 0.0), &node_capacity())
    }

    #[test]
    fn four_quarter_slots_fill_exactly() {
        let full = slot().scale(4);
        assert!(!full.is_exhausted());
        assert!(!full.fits(&slot()).unwrap());
        assert!(slot().scale(3).fits(&slot()).unwrap());
        assert!(slot().scale(5).is_exhausted());
    }

    #[test]
    fn mismatched_types_are_rejected() {
        let other = Capacity::empty(NodeTypeId::new("aws", "c"));
        assert!(matches!(
            slot().add(&other),
            Err(StateError::CapacityTypeMismatch { .. })
        ));
        assert!(slot().subtract(&other).is_err());
    }

    #[test]
    fn subtract_clamps_at_zero() {
        let c = Capacity::empty(m()).subtract(&slot()).unwrap();
        assert!(c.is_empty());
    }

    #[test]
    fn collapse_orders_by_load() {
        let light = slot();
        let heavy = slot().scale(3);
        assert!(light.collapse() < heavy.collapse());
        assert_eq!(Capacity::empty(m()).collapse(), 0.0);
    }

    #[test]
    fn missing_dimension_never_fits() {
        let needs_net =
            Capacity::from_requirement(m(), &ResourceVector::new(0.1, 1.0, 5.0), &node_capacity());
        assert!(!Capacity::empty(m()).fits(&needs_net).unwrap());
        assert!(needs_net.scale(0).is_empty());
    }
}
