//! Explicit registration of custom partitioning strategies
//!
//! Strategies are registered by name at startup; the configuration picks
//! one by name. Without an explicit choice a single registered strategy is
//! used, and more than one is a fatal configuration error.

use super::custom::{
    CustomClusterPartitioner, CustomClusterPartitionerStrategy, CustomEnsemblePartitioner,
    CustomEnsemblePartitionerStrategy,
};
use super::{
    ClusterPartitioner, ConsistentClusterPartitioner, ConsistentEnsemblePartitioner,
    EnsemblePartitioner,
};
use crate::config::PartitionerConfig;
use crate::error::{EnsembleError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Named custom strategies available to the partitioner configuration
#[derive(Clone, Default)]
pub struct PartitionerRegistry {
    cluster_strategies: BTreeMap<String, Arc<dyn CustomClusterPartitionerStrategy>>,
    ensemble_strategies: BTreeMap<String, Arc<dyn CustomEnsemblePartitionerStrategy>>,
}

impl PartitionerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_cluster_strategy(
        &mut self,
        name: impl Into<String>,
        strategy: Arc<dyn CustomClusterPartitionerStrategy>,
    ) -> &mut Self {
        self.cluster_strategies.insert(name.into(), strategy);
        self
    }

    pub fn register_ensemble_strategy(
        &mut self,
        name: impl Into<String>,
        strategy: Arc<dyn CustomEnsemblePartitionerStrategy>,
    ) -> &mut Self {
        self.ensemble_strategies.insert(name.into(), strategy);
        self
    }

    /// Build the cluster partitioner selected by `config`
    pub fn cluster_partitioner(
        &self,
        config: &PartitionerConfig,
    ) -> Result<Box<dyn ClusterPartitioner>> {
        match select("cluster", config.cluster.as_deref(), &self.cluster_strategies)? {
            Some((name, strategy)) => {
                info!(strategy = %name, "Using custom cluster partitioner");
                Ok(Box::new(CustomClusterPartitioner::new(name, Arc::clone(strategy))))
            }
            None => Ok(Box::new(ConsistentClusterPartitioner::new())),
        }
    }

    /// Build the ensemble partitioner selected by `config`
    pub fn ensemble_partitioner(
        &self,
        config: &PartitionerConfig,
    ) -> Result<Box<dyn EnsemblePartitioner>> {
        match select("ensemble", config.ensemble.as_deref(), &self.ensemble_strategies)? {
            Some((name, strategy)) => {
                info!(strategy = %name, "Using custom ensemble partitioner");
                Ok(Box::new(CustomEnsemblePartitioner::new(name, Arc::clone(strategy))))
            }
            None => Ok(Box::new(ConsistentEnsemblePartitioner::new())),
        }
    }
}

fn select<'a, T: ?Sized>(
    kind: &str,
    chosen: Option<&str>,
    strategies: &'a BTreeMap<String, Arc<T>>,
) -> Result<Option<(&'a str, &'a Arc<T>)>> {
    match chosen {
        Some(name) => strategies
            .get_key_value(name)
            .map(|(name, strategy)| Some((name.as_str(), strategy)))
            .ok_or_else(|| {
                EnsembleError::Config(format!("Unknown {} partitioner strategy '{}'", kind, name))
            }),
        None if strategies.len() > 1 => Err(EnsembleError::Config(format!(
            "Found {} custom {} partitioner strategies ({}), at most one may be active",
            strategies.len(),
            kind,
            strategies.keys().cloned().collect::<Vec<_>>().join(", ")
        ))),
        None => Ok(strategies
            .iter()
            .next()
            .map(|(name, strategy)| (name.as_str(), strategy))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Endpoint;

    struct Nowhere;

    impl CustomClusterPartitionerStrategy for Nowhere {
        fn node_for(&self, _cluster: &str, _bucket: &str, _key: Option<&str>) -> Option<Endpoint> {
            None
        }
    }

    impl CustomEnsemblePartitionerStrategy for Nowhere {
        fn cluster_for(&self, _bucket: &str, _key: Option<&str>) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_defaults_to_consistent_hashing() {
        let registry = PartitionerRegistry::new();
        let config = PartitionerConfig::default();
        assert_eq!(registry.cluster_partitioner(&config).unwrap().name(), "consistent");
        assert_eq!(registry.ensemble_partitioner(&config).unwrap().name(), "consistent");
    }

    #[test]
    fn test_single_strategy_is_picked_up() {
        let mut registry = PartitionerRegistry::new();
        registry.register_cluster_strategy("nowhere", Arc::new(Nowhere));

        let config = PartitionerConfig::default();
        assert_eq!(registry.cluster_partitioner(&config).unwrap().name(), "nowhere");
        assert_eq!(registry.ensemble_partitioner(&config).unwrap().name(), "consistent");
    }

    #[test]
    fn test_two_strategies_without_choice_is_fatal() {
        let mut registry = PartitionerRegistry::new();
        registry
            .register_ensemble_strategy("one", Arc::new(Nowhere))
            .register_ensemble_strategy("two", Arc::new(Nowhere));

        let err = registry
            .ensemble_partitioner(&PartitionerConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, EnsembleError::Config(msg) if msg.contains("at most one")));

        let config = PartitionerConfig {
            ensemble: Some("two".to_string()),
            ..Default::default()
        };
        assert_eq!(registry.ensemble_partitioner(&config).unwrap().name(), "two");
    }

    #[test]
    fn test_unknown_strategy_is_fatal() {
        let registry = PartitionerRegistry::new();
        let config = PartitionerConfig {
            cluster: Some("missing".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            registry.cluster_partitioner(&config),
            Err(EnsembleError::Config(_))
        ));
    }
}
