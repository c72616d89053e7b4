//! Scaling delays: how long a proposed delta takes to become real.
//!
//! Node types and services each carry a booting and a termination delay,
//! fixed or normally distributed. Stochastic delays are drawn from a seeded
//! generator so a simulation run is reproducible.

use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use scalesim_core::{Catalog, DelaySpec};
use scalesim_state::{GeneralizedDelta, NodeChange, NodeGroupDelta, ServiceCountDelta, Sign};

use crate::error::{TimelineError, TimelineResult};

pub struct ScalingDelayProvider {
    catalog: Catalog,
    rng: StdRng,
}

impl ScalingDelayProvider {
    pub fn new(catalog: Catalog, seed: u64) -> Self {
        Self {
            catalog,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    /// One draw from `spec`; normal draws are clamped at zero.
    pub fn sample(&mut self, spec: &DelaySpec) -> TimelineResult<Duration> {
        match spec {
            DelaySpec::Fixed(d) => Ok(*d),
            DelaySpec::Normal { mean, std } => {
                let normal = Normal::new(mean.as_secs_f64(), std.as_secs_f64())
                    .map_err(|e| TimelineError::Sampling(e.to_string()))?;
                let secs = normal.sample(&mut self.rng).max(0.0);
                Ok(Duration::from_secs_f64(secs))
            }
        }
    }

    /// Booting (`Plus`) or termination (`Minus`) delay of the node type.
    /// Only physical changes take node time.
    pub fn delay_for_node_group_delta(&mut self, delta: &NodeGroupDelta) -> TimelineResult<Duration> {
        if !delta.is_physical() {
            return Ok(Duration::ZERO);
        }
        let node_type = delta.group.node_type();
        let timing = self
            .catalog
            .node_type(node_type)
            .map(|t| t.timing)
            .ok_or_else(|| TimelineError::UnknownNodeType(node_type.clone()))?;
        let spec = match delta.sign {
            Sign::Plus => timing.booting,
            Sign::Minus => timing.termination,
        };
        self.sample(&spec)
    }

    /// Slowest service change: booting for increases, termination for
    /// decreases. Services started in parallel, so the maximum is taken.
    pub fn delay_for_service_delta(&mut self, delta: &ServiceCountDelta) -> TimelineResult<Duration> {
        let mut slowest = Duration::ZERO;
        for (service, count) in delta.iter() {
            let timing = self
                .catalog
                .service_timing(service)
                .ok_or_else(|| TimelineError::MissingDelayProfile(service.to_string()))?;
            let spec = if count > 0 {
                timing.booting
            } else {
                timing.termination
            };
            slowest = slowest.max(self.sample(&spec)?);
        }
        Ok(slowest)
    }

    /// Total enforcement delay of `delta`: node time plus service time.
    /// Compensations are bookkeeping and take effect immediately.
    pub fn delay_for(&mut self, delta: &GeneralizedDelta) -> TimelineResult<Duration> {
        if let NodeChange::Compensating { .. } = delta.node_group_delta.change {
            return Ok(Duration::ZERO);
        }
        let nodes = self.delay_for_node_group_delta(&delta.node_group_delta)?;
        let services = match &delta.service_delta {
            Some(services) => self.delay_for_service_delta(services)?,
            None => Duration::ZERO,
        };
        Ok(nodes + services)
    }
}
