//! Named strategies the desired-state calculator is assembled from.

use std::collections::BTreeMap;
use std::sync::Arc;

use scalesim_core::{AdjustmentSettings, ConfigError, ConfigResult};

use crate::calculator::{
    BalancedPlacer, DesiredStateCalculator, MaxScoreOptimizer, Optimizer, Placer,
    SpecializedPlacer,
};
use crate::scorer::{PackingScorer, PriceScorer, Scorer};

/// Placers, scorers and optimizers by name. Built once at startup.
pub struct StrategyRegistry {
    placers: BTreeMap<&'static str, Arc<dyn Placer>>,
    scorers: BTreeMap<&'static str, Arc<dyn Scorer>>,
    optimizers: BTreeMap<&'static str, Arc<dyn Optimizer>>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            placers: BTreeMap::new(),
            scorers: BTreeMap::new(),
            optimizers: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register_placer(Arc::new(SpecializedPlacer));
        registry.register_placer(Arc::new(BalancedPlacer));
        registry.register_scorer(Arc::new(PriceScorer));
        registry.register_scorer(Arc::new(PackingScorer));
        registry.register_optimizer(Arc::new(MaxScoreOptimizer));
        registry
    }

    pub fn register_placer(&mut self, placer: Arc<dyn Placer>) {
        self.placers.insert(placer.name(), placer);
    }

    pub fn register_scorer(&mut self, scorer: Arc<dyn Scorer>) {
        self.scorers.insert(scorer.name(), scorer);
    }

    pub fn register_optimizer(&mut self, optimizer: Arc<dyn Optimizer>) {
        self.optimizers.insert(optimizer.name(), optimizer);
    }

    pub fn placer(&self, name: &str) -> ConfigResult<Arc<dyn Placer>> {
        lookup(&self.placers, "placer", name)
    }

    pub fn scorer(&self, name: &str) -> ConfigResult<Arc<dyn Scorer>> {
        lookup(&self.scorers, "scorer", name)
    }

    pub fn optimizer(&self, name: &str) -> ConfigResult<Arc<dyn Optimizer>> {
        lookup(&self.optimizers, "optimizer", name)
    }

    /// Assemble a calculator from the strategies `settings` names.
    pub fn calculator(&self, settings: &AdjustmentSettings) -> ConfigResult<DesiredStateCalculator> {
        let placers = settings
            .placers
            .iter()
            .map(|name| self.placer(name))
            .collect::<ConfigResult<Vec<_>>>()?;
        Ok(DesiredStateCalculator::new(
            placers,
            self.scorer(&settings.scorer)?,
            self.optimizer(&settings.optimizer)?,
            settings.provisioning_horizon,
        ))
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn lookup<T: ?Sized>(
    table: &BTreeMap<&'static str, Arc<T>>,
    kind: &'static str,
    name: &str,
) -> ConfigResult<Arc<T>> {
    table
        .get(name)
        .cloned()
        .ok_or_else(|| ConfigError::UnknownStrategy {
            kind,
            name: name.to_string(),
        })
}
