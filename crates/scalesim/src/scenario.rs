//! scenario.toml parser: the timed decisions and faults `scalesim run` replays.
//!
//! ```toml
//! [[decisions]]
//! at = "30s"
//! region = "eu-west-1"
//! service = "api"
//! count = 4              # signed change...
//! # desired = 4          # ...or an absolute target counting in-flight instances
//! vcpu = 0.5             # optional per-instance requirement
//! memory_mb = 512
//!
//! [[faults]]
//! at = "5m"
//! region = "eu-west-1"
//! provider = "aws"
//! node_type = "m5.large"
//! nodes = 1
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use scalesim_core::config::DurationConfig;
use scalesim_core::{NodeTypeId, Platform, ResourceVector, Timestamp};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub decisions: Vec<DecisionConfig>,
    #[serde(default)]
    pub faults: Vec<FaultConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecisionConfig {
    pub at: DurationConfig,
    pub region: String,
    pub service: String,
    pub count: Option<i64>,
    pub desired: Option<u64>,
    pub vcpu: Option<f64>,
    pub memory_mb: Option<f64>,
    pub network_mbps: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FaultConfig {
    pub at: DurationConfig,
    pub region: String,
    pub provider: String,
    pub node_type: String,
    pub nodes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demand {
    /// Signed instance change.
    Change(i64),
    /// Instance count to converge to.
    Target(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub at: Timestamp,
    pub region: String,
    pub service: String,
    pub demand: Demand,
    pub requirement: Option<ResourceVector>,
}

/// Instantaneous loss of `nodes` nodes of one type.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub at: Timestamp,
    pub region: String,
    pub node_type: NodeTypeId,
    pub nodes: u64,
}

/// A validated scenario; both lists are ordered by timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scenario {
    pub decisions: Vec<Decision>,
    pub faults: Vec<Fault>,
}

impl Scenario {
    /// Timestamp of the latest decision or fault.
    pub fn last_event(&self) -> Option<Timestamp> {
        let decisions = self.decisions.iter().map(|d| d.at);
        let faults = self.faults.iter().map(|f| f.at);
        decisions.chain(faults).max()
    }
}

impl ScenarioConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing scenario {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve timestamps and check every entry against `platform`.
    pub fn build(&self, platform: &Platform) -> anyhow::Result<Scenario> {
        let regions: BTreeSet<&str> = platform.regions.iter().map(String::as_str).collect();
        let known_region = |name: &str| -> anyhow::Result<()> {
            if !regions.contains(name) {
                bail!("unknown region {name:?}");
            }
            Ok(())
        };

        let mut decisions = Vec::with_capacity(self.decisions.len());
        for (i, raw) in self.decisions.iter().enumerate() {
            known_region(&raw.region).with_context(|| format!("decision #{i}"))?;
            decisions.push(raw.build().with_context(|| format!("decision #{i}"))?);
        }

        let mut faults = Vec::with_capacity(self.faults.len());
        for (i, raw) in self.faults.iter().enumerate() {
            known_region(&raw.region).with_context(|| format!("fault #{i}"))?;
            let fault = raw.build().with_context(|| format!("fault #{i}"))?;
            if platform.catalog.node_type(&fault.node_type).is_none() {
                bail!("fault #{i}: unknown node type {}", fault.node_type);
            }
            faults.push(fault);
        }

        // Stable: same-instant entries keep file order.
        decisions.sort_by_key(|d| d.at);
        faults.sort_by_key(|f| f.at);
        Ok(Scenario { decisions, faults })
    }
}

fn timestamp(at: &DurationConfig) -> anyhow::Result<Timestamp> {
    Ok(Timestamp::ZERO.after(at.to_fixed()?))
}

impl DecisionConfig {
    fn build(&self) -> anyhow::Result<Decision> {
        let demand = match (self.count, self.desired) {
            (Some(count), None) => Demand::Change(count),
            (None, Some(desired)) => Demand::Target(desired),
            _ => bail!("exactly one of `count` or `desired` is required"),
        };
        Ok(Decision {
            at: timestamp(&self.at)?,
            region: self.region.clone(),
            service: self.service.clone(),
            demand,
            requirement: self.requirement()?,
        })
    }

    fn requirement(&self) -> anyhow::Result<Option<ResourceVector>> {
        if self.vcpu.is_none() && self.memory_mb.is_none() && self.network_mbps.is_none() {
            return Ok(None);
        }
        let req = ResourceVector::new(
            self.vcpu.unwrap_or(0.0),
            self.memory_mb.unwrap_or(0.0),
            self.network_mbps.unwrap_or(0.0),
        );
        if !req.is_non_negative() {
            bail!("requirement of {} must be non-negative", self.service);
        }
        Ok(Some(req))
    }
}

impl FaultConfig {
    fn build(&self) -> anyhow::Result<Fault> {
        if self.nodes == 0 {
            bail!("a fault must fail at least one node");
        }
        Ok(Fault {
            at: timestamp(&self.at)?,
            region: self.region.clone(),
            node_type: NodeTypeId::new(&self.provider, &self.node_type),
            nodes: self.nodes,
        })
    }
}
