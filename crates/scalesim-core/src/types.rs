//! Shared types used across scalesim crates.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name of the service profile that supplies timings to services which do
/// not declare their own.
pub const DEFAULT_SERVICE_PROFILE: &str = "default";

// ── Simulated time ─────────────────────────────────────────────────

/// A simulated instant, in milliseconds since the simulation started.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_millis(ms: u64) -> Self {
        Timestamp(ms)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs.saturating_mul(1000))
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Advance by `delay`, saturating at the end of representable time.
    pub fn after(self, delay: Duration) -> Self {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_add(ms))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ── Resources ──────────────────────────────────────────────────────

/// A resource dimension tracked for every node and service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Cpu,
    Memory,
    Network,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Cpu, ResourceKind::Memory, ResourceKind::Network];

    pub const fn index(self) -> usize {
        match self {
            ResourceKind::Cpu => 0,
            ResourceKind::Memory => 1,
            ResourceKind::Network => 2,
        }
    }
}

/// Absolute resource quantities (vCPU, MiB of memory, Mbit/s of bandwidth).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceVector {
    pub vcpu: f64,
    pub memory_mb: f64,
    #[serde(default)]
    pub network_mbps: f64,
}

impl ResourceVector {
    pub fn new(vcpu: f64, memory_mb: f64, network_mbps: f64) -> Self {
        Self {
            vcpu,
            memory_mb,
            network_mbps,
        }
    }

    pub fn get(&self, kind: ResourceKind) -> f64 {
        match kind {
            ResourceKind::Cpu => self.vcpu,
            ResourceKind::Memory => self.memory_mb,
            ResourceKind::Network => self.network_mbps,
        }
    }

    /// Per-dimension ratio `self / capacity`. A dimension the capacity does
    /// not provide is infinitely scarce if anything is asked of it.
    pub fn normalized_by(&self, capacity: &ResourceVector) -> [f64; 3] {
        let mut out = [0.0; 3];
        for kind in ResourceKind::ALL {
            let want = self.get(kind);
            let have = capacity.get(kind);
            out[kind.index()] = if want <= 0.0 {
                0.0
            } else if have <= 0.0 {
                f64::INFINITY
            } else {
                want / have
            };
        }
        out
    }

    pub fn is_non_negative(&self) -> bool {
        ResourceKind::ALL.iter().all(|k| self.get(*k) >= 0.0 && self.get(*k).is_finite())
    }
}

// ── Delays ─────────────────────────────────────────────────────────

/// How long a scaling action takes: a fixed value or a normal
/// distribution sampled each time the action is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelaySpec {
    Fixed(Duration),
    Normal { mean: Duration, std: Duration },
}

impl DelaySpec {
    pub const ZERO: DelaySpec = DelaySpec::Fixed(Duration::ZERO);

    pub fn mean(&self) -> Duration {
        match self {
            DelaySpec::Fixed(d) => *d,
            DelaySpec::Normal { mean, .. } => *mean,
        }
    }
}

impl Default for DelaySpec {
    fn default() -> Self {
        DelaySpec::ZERO
    }
}

/// Boot and termination durations of one node type or service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalingTiming {
    pub booting: DelaySpec,
    pub termination: DelaySpec,
}

impl ScalingTiming {
    pub fn fixed(booting: Duration, termination: Duration) -> Self {
        Self {
            booting: DelaySpec::Fixed(booting),
            termination: DelaySpec::Fixed(termination),
        }
    }
}

// ── Node types ─────────────────────────────────────────────────────

/// Identity of a node type: the provider and the provider's type name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeTypeId {
    pub provider: String,
    pub name: String,
}

impl NodeTypeId {
    pub fn new(provider: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NodeTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.name)
    }
}

/// A virtual machine flavour that can be provisioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeType {
    pub id: NodeTypeId,
    pub capacity: ResourceVector,
    /// Price of one node for one hour.
    pub price_per_hour: f64,
    pub timing: ScalingTiming,
}

impl NodeType {
    /// A node type with zero boot and termination delay.
    pub fn new(id: NodeTypeId, capacity: ResourceVector, price_per_hour: f64) -> Self {
        Self {
            id,
            capacity,
            price_per_hour,
            timing: ScalingTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: ScalingTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Price of running `node_count` nodes of this type for `duration`.
    pub fn price_for(&self, node_count: u64, duration: Duration) -> f64 {
        node_count as f64 * (duration.as_secs_f64() / 3600.0) * self.price_per_hour
    }
}

// ── Services ───────────────────────────────────────────────────────

/// A service known to the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceProfile {
    pub name: String,
    /// Resources one instance consumes. `None` until a scaling decision
    /// supplies it.
    pub requirement: Option<ResourceVector>,
    pub timing: ScalingTiming,
}

impl ServiceProfile {
    pub fn new(name: impl Into<String>, requirement: ResourceVector) -> Self {
        Self {
            name: name.into(),
            requirement: Some(requirement),
            timing: ScalingTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: ScalingTiming) -> Self {
        self.timing = timing;
        self
    }
}

// ── Catalog ────────────────────────────────────────────────────────

/// Every node type and service profile the simulation knows about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    node_types: Vec<NodeType>,
    services: BTreeMap<String, ServiceProfile>,
}

impl Catalog {
    pub fn new(node_types: Vec<NodeType>, services: Vec<ServiceProfile>) -> Self {
        Self {
            node_types,
            services: services.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    /// Node types in configuration order.
    pub fn node_types(&self) -> &[NodeType] {
        &self.node_types
    }

    pub fn node_type(&self, id: &NodeTypeId) -> Option<&NodeType> {
        self.node_types.iter().find(|t| &t.id == id)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceProfile> {
        self.services.get(name)
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceProfile> {
        self.services.values()
    }

    /// Scaling timing for `service`, falling back to the `default` profile.
    pub fn service_timing(&self, service: &str) -> Option<ScalingTiming> {
        self.services
            .get(service)
            .or_else(|| self.services.get(DEFAULT_SERVICE_PROFILE))
            .map(|p| p.timing)
    }

    /// Record the per-instance requirement of `service`, creating a profile
    /// with default timings if the service is unknown.
    pub fn set_requirement(&mut self, service: &str, requirement: ResourceVector) {
        let timing = self.service_timing(service).unwrap_or_default();
        self.services
            .entry(service.to_string())
            .or_insert_with(|| ServiceProfile {
                name: service.to_string(),
                requirement: None,
                timing,
            })
            .requirement = Some(requirement);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_after_saturates() {
        let t = Timestamp::from_millis(u64::MAX - 5);
        assert_eq!(t.after(Duration::from_secs(1)).as_millis(), u64::MAX);
        assert_eq!(Timestamp::from_secs(2).after(Duration::from_millis(500)).as_millis(), 2500);
    }

    #[test]
    fn normalized_by_handles_missing_dimension() {
        let cap = ResourceVector::new(4.0, 8192.0, 0.0);
        let req = ResourceVector::new(1.0, 2048.0, 10.0);
        let n = req.normalized_by(&cap);
        assert_eq!(n[0], 0.25);
        assert_eq!(n[1], 0.25);
        assert!(n[2].is_infinite());

        let quiet = ResourceVector::new(1.0, 1024.0, 0.0);
        assert_eq!(quiet.normalized_by(&cap)[2], 0.0);
    }

    #[test]
    fn service_timing_falls_back_to_default() {
        let default = ServiceProfile {
            name: DEFAULT_SERVICE_PROFILE.to_string(),
            requirement: None,
            timing: ScalingTiming::fixed(Duration::from_secs(3), Duration::from_secs(1)),
        };
        let catalog = Catalog::new(Vec::new(), vec![default]);
        let timing = catalog.service_timing("api").unwrap();
        assert_eq!(timing.booting.mean(), Duration::from_secs(3));
    }

    #[test]
    fn set_requirement_creates_profile() {
        let mut catalog = Catalog::default();
        catalog.set_requirement("api", ResourceVector::new(0.5, 256.0, 0.0));
        let profile = catalog.service("api").unwrap();
        assert_eq!(profile.requirement.unwrap().vcpu, 0.5);
    }

    #[test]
    fn price_scales_with_nodes_and_duration() {
        let t = NodeType::new(NodeTypeId::new("aws", "m5"), ResourceVector::new(2.0, 8192.0, 0.0), 0.5);
        let price = t.price_for(4, Duration::from_secs(1800));
        assert!((price - 1.0).abs() < 1e-9);
    }
}
