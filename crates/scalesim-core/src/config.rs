//! platform.toml configuration parser.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::types::*;

const DEFAULT_PLACERS: [&str; 2] = ["specialized", "balanced"];
const DEFAULT_SCORER: &str = "price";
const DEFAULT_OPTIMIZER: &str = "max_score";
const DEFAULT_HORIZON: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformConfig {
    pub adjustment: Option<AdjustmentConfig>,
    pub delays: Option<DelaysConfig>,
    #[serde(default)]
    pub node_types: Vec<NodeTypeConfig>,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub regions: Vec<RegionConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdjustmentConfig {
    pub placers: Option<Vec<String>>,
    pub scorer: Option<String>,
    pub optimizer: Option<String>,
    pub provisioning_horizon: Option<DurationConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelaysConfig {
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeTypeConfig {
    pub provider: String,
    pub name: String,
    pub vcpu: f64,
    pub memory_mb: f64,
    pub network_mbps: Option<f64>,
    pub price_per_hour: f64,
    pub booting: DurationConfig,
    pub termination: DurationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    pub name: String,
    pub vcpu: Option<f64>,
    pub memory_mb: Option<f64>,
    pub network_mbps: Option<f64>,
    pub booting: Option<DurationConfig>,
    pub termination: Option<DurationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionConfig {
    pub name: String,
}

/// A duration as written in the config file.
///
/// ```toml
/// booting = "120s"
/// booting = { value = 2, unit = "m" }
/// booting = { mean = 120, std = 15, unit = "s" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationConfig {
    Text(String),
    Normal { mean: f64, std: f64, unit: String },
    Fixed { value: f64, unit: String },
}

impl DurationConfig {
    pub fn to_delay(&self) -> ConfigResult<DelaySpec> {
        match self {
            DurationConfig::Text(s) => parse_duration(s).map(DelaySpec::Fixed),
            DurationConfig::Fixed { value, unit } => {
                scaled_duration(*value, unit).map(DelaySpec::Fixed)
            }
            DurationConfig::Normal { mean, std, unit } => Ok(DelaySpec::Normal {
                mean: scaled_duration(*mean, unit)?,
                std: scaled_duration(*std, unit)?,
            }),
        }
    }

    /// The duration, rejecting stochastic forms.
    pub fn to_fixed(&self) -> ConfigResult<Duration> {
        match self.to_delay()? {
            DelaySpec::Fixed(d) => Ok(d),
            DelaySpec::Normal { .. } => Err(ConfigError::InvalidDuration(format!("{self:?}"))),
        }
    }
}

/// Strategy selection for the desired-state calculator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentSettings {
    pub placers: Vec<String>,
    pub scorer: String,
    pub optimizer: String,
    pub provisioning_horizon: Duration,
}

impl Default for AdjustmentSettings {
    fn default() -> Self {
        Self {
            placers: DEFAULT_PLACERS.iter().map(|s| s.to_string()).collect(),
            scorer: DEFAULT_SCORER.to_string(),
            optimizer: DEFAULT_OPTIMIZER.to_string(),
            provisioning_horizon: DEFAULT_HORIZON,
        }
    }
}

/// A validated platform configuration.
#[derive(Debug, Clone)]
pub struct Platform {
    pub catalog: Catalog,
    pub adjustment: AdjustmentSettings,
    pub delay_seed: u64,
    pub regions: Vec<String>,
}

impl PlatformConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load and validate in one step.
    pub fn load(path: &Path) -> ConfigResult<Platform> {
        let platform = Self::from_file(path)?.build()?;
        info!(
            ?path,
            node_types = platform.catalog.node_types().len(),
            regions = platform.regions.len(),
            "platform config loaded"
        );
        Ok(platform)
    }

    /// Validate the raw config and resolve it into a [`Platform`].
    pub fn build(&self) -> ConfigResult<Platform> {
        if self.node_types.is_empty() {
            return Err(ConfigError::NoNodeTypes);
        }

        let mut seen = BTreeSet::new();
        let mut node_types = Vec::with_capacity(self.node_types.len());
        for raw in &self.node_types {
            let node_type = raw.build()?;
            if !seen.insert(node_type.id.clone()) {
                return Err(ConfigError::Duplicate {
                    entity: "node type",
                    name: node_type.id.to_string(),
                });
            }
            node_types.push(node_type);
        }

        let default_timing = self
            .services
            .iter()
            .find(|s| s.name == DEFAULT_SERVICE_PROFILE)
            .map(|s| s.partial_timing())
            .transpose()?
            .unwrap_or((None, None));

        let mut names = BTreeSet::new();
        let mut services = Vec::with_capacity(self.services.len());
        for raw in &self.services {
            if !names.insert(raw.name.clone()) {
                return Err(ConfigError::Duplicate {
                    entity: "service",
                    name: raw.name.clone(),
                });
            }
            services.push(raw.build(default_timing)?);
        }

        let mut regions = Vec::with_capacity(self.regions.len());
        for region in &self.regions {
            if regions.contains(&region.name) {
                return Err(ConfigError::Duplicate {
                    entity: "region",
                    name: region.name.clone(),
                });
            }
            regions.push(region.name.clone());
        }

        let adjustment = match &self.adjustment {
            Some(cfg) => cfg.build()?,
            None => AdjustmentSettings::default(),
        };

        Ok(Platform {
            catalog: Catalog::new(node_types, services),
            adjustment,
            delay_seed: self.delays.as_ref().and_then(|d| d.seed).unwrap_or(0),
            regions,
        })
    }
}

impl AdjustmentConfig {
    fn build(&self) -> ConfigResult<AdjustmentSettings> {
        let defaults = AdjustmentSettings::default();
        let placers = self.placers.clone().unwrap_or(defaults.placers);
        if placers.is_empty() {
            return Err(ConfigError::Invalid {
                entity: "adjustment",
                name: "placers".to_string(),
                reason: "at least one placer is required".to_string(),
            });
        }
        let provisioning_horizon = match &self.provisioning_horizon {
            Some(d) => d.to_fixed()?,
            None => defaults.provisioning_horizon,
        };
        Ok(AdjustmentSettings {
            placers,
            scorer: self.scorer.clone().unwrap_or(defaults.scorer),
            optimizer: self.optimizer.clone().unwrap_or(defaults.optimizer),
            provisioning_horizon,
        })
    }
}

impl NodeTypeConfig {
    fn build(&self) -> ConfigResult<NodeType> {
        let name = format!("{}/{}", self.provider, self.name);
        let invalid = |reason: &str| ConfigError::Invalid {
            entity: "node type",
            name: name.clone(),
            reason: reason.to_string(),
        };

        let capacity =
            ResourceVector::new(self.vcpu, self.memory_mb, self.network_mbps.unwrap_or(0.0));
        if !capacity.is_non_negative() || capacity.vcpu <= 0.0 || capacity.memory_mb <= 0.0 {
            return Err(invalid("vcpu and memory_mb must be positive"));
        }
        if !self.price_per_hour.is_finite() || self.price_per_hour < 0.0 {
            return Err(invalid("price_per_hour must be non-negative"));
        }

        Ok(NodeType {
            id: NodeTypeId::new(&self.provider, &self.name),
            capacity,
            price_per_hour: self.price_per_hour,
            timing: ScalingTiming {
                booting: self.booting.to_delay()?,
                termination: self.termination.to_delay()?,
            },
        })
    }
}

impl ServiceConfig {
    fn partial_timing(&self) -> ConfigResult<(Option<DelaySpec>, Option<DelaySpec>)> {
        let booting = self.booting.as_ref().map(|d| d.to_delay()).transpose()?;
        let termination = self.termination.as_ref().map(|d| d.to_delay()).transpose()?;
        Ok((booting, termination))
    }

    fn requirement(&self) -> ConfigResult<Option<ResourceVector>> {
        if self.vcpu.is_none() && self.memory_mb.is_none() && self.network_mbps.is_none() {
            return Ok(None);
        }
        let req = ResourceVector::new(
            self.vcpu.unwrap_or(0.0),
            self.memory_mb.unwrap_or(0.0),
            self.network_mbps.unwrap_or(0.0),
        );
        if !req.is_non_negative() {
            return Err(ConfigError::Invalid {
                entity: "service",
                name: self.name.clone(),
                reason: "resource requirements must be non-negative".to_string(),
            });
        }
        Ok(Some(req))
    }

    fn build(
        &self,
        default: (Option<DelaySpec>, Option<DelaySpec>),
    ) -> ConfigResult<ServiceProfile> {
        let (booting, termination) = self.partial_timing()?;
        let booting = booting.or(default.0).ok_or_else(|| ConfigError::MissingTiming {
            service: self.name.clone(),
            phase: "booting",
        })?;
        let termination = termination.or(default.1).ok_or_else(|| ConfigError::MissingTiming {
            service: self.name.clone(),
            phase: "termination",
        })?;
        Ok(ServiceProfile {
            name: self.name.clone(),
            requirement: self.requirement()?,
            timing: ScalingTiming {
                booting,
                termination,
            },
        })
    }
}

/// Parse a duration string like "500ms", "30s", "5m", "1.5h" or a bare
/// number of seconds.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(s.to_string()))?;
    let unit = if unit.trim().is_empty() { "s" } else { unit.trim() };
    scaled_duration(value, unit)
}

fn scaled_duration(value: f64, unit: &str) -> ConfigResult<Duration> {
    let millis_per_unit = match unit {
        "ms" => 1.0,
        "s" | "sec" => 1_000.0,
        "m" | "min" => 60_000.0,
        "h" => 3_600_000.0,
        other => return Err(ConfigError::UnknownUnit(other.to_string())),
    };
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::InvalidDuration(format!("{value}{unit}")));
    }
    Ok(Duration::from_secs_f64(value * millis_per_unit / 1000.0))
}
