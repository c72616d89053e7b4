//! Conversions from absolute service requirements to per-node-type
//! capacities.
//!
//! Bridges `scalesim_core::Catalog` (vCPU / MiB / Mbps per instance) to the
//! normalized [`Capacity`] values the node groups pack with.

use std::collections::BTreeMap;

use scalesim_core::{Catalog, NodeType, NodeTypeId};
use scalesim_state::{Capacity, RequirementMap};

use crate::error::{PlacementError, PlacementResult};

/// Instance requirements of every service with a known requirement,
/// normalized against each node type.
#[derive(Debug, Clone, Default)]
pub struct RequirementCatalog {
    node_types: Vec<NodeType>,
    by_node_type: BTreeMap<NodeTypeId, RequirementMap>,
}

impl RequirementCatalog {
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let mut by_node_type = BTreeMap::new();
        for node_type in catalog.node_types() {
            let requirements: RequirementMap = catalog
                .services()
                .filter_map(|profile| {
                    let requirement = profile.requirement.as_ref()?;
                    Some((
                        profile.name.clone(),
                        Capacity::from_requirement(
                            node_type.id.clone(),
                            requirement,
                            &node_type.capacity,
                        ),
                    ))
                })
                .collect();
            by_node_type.insert(node_type.id.clone(), requirements);
        }
        Self {
            node_types: catalog.node_types().to_vec(),
            by_node_type,
        }
    }

    /// Node types in configuration order.
    pub fn node_types(&self) -> &[NodeType] {
        &self.node_types
    }

    pub fn for_node_type(&self, id: &NodeTypeId) -> PlacementResult<&RequirementMap> {
        self.by_node_type
            .get(id)
            .ok_or_else(|| PlacementError::UnknownNodeType(id.clone()))
    }

    pub fn requirement(&self, service: &str, node_type: &NodeTypeId) -> Option<&Capacity> {
        self.by_node_type.get(node_type)?.get(service)
    }

    /// Whether one instance of `service` fits on an idle `node_type` node.
    pub fn fits_on(&self, service: &str, node_type: &NodeTypeId) -> bool {
        self.requirement(service, node_type)
            .is_some_and(|r| !r.is_exhausted())
    }

    /// Whether some node type can host an instance of `service`.
    pub fn fits_anywhere(&self, service: &str) -> bool {
        self.node_types.iter().any(|t| self.fits_on(service, &t.id))
    }
}
