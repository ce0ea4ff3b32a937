//! User-supplied partitioning strategies
//!
//! A strategy is a single function. The adapters in this module keep the
//! bookkeeping the router needs (known clusters, endpoint to node name) so
//! strategies can stay stateless.

use super::{ClusterPartitioner, EnsemblePartitioner};
use crate::types::{Cluster, Endpoint, Member};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Picks the cluster owning a bucket or key, by cluster name
pub trait CustomEnsemblePartitionerStrategy: Send + Sync {
    fn cluster_for(&self, bucket: &str, key: Option<&str>) -> Option<String>;
}

/// Picks the node owning a bucket or key inside a cluster, by endpoint
pub trait CustomClusterPartitionerStrategy: Send + Sync {
    fn node_for(&self, cluster: &str, bucket: &str, key: Option<&str>) -> Option<Endpoint>;
}

/// Ensemble partitioner delegating to a custom strategy
pub struct CustomEnsemblePartitioner {
    name: String,
    strategy: Arc<dyn CustomEnsemblePartitionerStrategy>,
    clusters: BTreeMap<String, Cluster>,
}

impl CustomEnsemblePartitioner {
    pub fn new(name: impl Into<String>, strategy: Arc<dyn CustomEnsemblePartitionerStrategy>) -> Self {
        Self {
            name: name.into(),
            strategy,
            clusters: BTreeMap::new(),
        }
    }
}

impl EnsemblePartitioner for CustomEnsemblePartitioner {
    fn setup_clusters(&mut self, clusters: &BTreeSet<Cluster>) {
        self.clusters = clusters
            .iter()
            .map(|c| (c.name().to_string(), c.clone()))
            .collect();
    }

    fn cluster_for(&self, bucket: &str, key: Option<&str>) -> Option<Cluster> {
        let name = self.strategy.cluster_for(bucket, key)?;
        let cluster = self.clusters.get(&name).cloned();
        if cluster.is_none() {
            debug!(strategy = %self.name, cluster = %name, "Strategy chose an unknown cluster");
        }
        cluster
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Cluster partitioner delegating to a custom strategy
pub struct CustomClusterPartitioner {
    name: String,
    strategy: Arc<dyn CustomClusterPartitionerStrategy>,
    endpoints: BTreeMap<Cluster, HashMap<Endpoint, String>>,
}

impl CustomClusterPartitioner {
    pub fn new(name: impl Into<String>, strategy: Arc<dyn CustomClusterPartitionerStrategy>) -> Self {
        Self {
            name: name.into(),
            strategy,
            endpoints: BTreeMap::new(),
        }
    }
}

impl ClusterPartitioner for CustomClusterPartitioner {
    fn add_node(&mut self, cluster: &Cluster, member: &Member) {
        self.endpoints
            .entry(cluster.clone())
            .or_default()
            .insert(member.endpoint(), member.name.clone());
    }

    fn remove_node(&mut self, cluster: &Cluster, node_name: &str) {
        if let Some(endpoints) = self.endpoints.get_mut(cluster) {
            endpoints.retain(|_, name| name != node_name);
        }
    }

    fn clear(&mut self) {
        self.endpoints.clear();
    }

    fn node_for(&self, cluster: &Cluster, bucket: &str, key: Option<&str>) -> Option<String> {
        let endpoints = self.endpoints.get(cluster)?;
        let endpoint = self.strategy.node_for(cluster.name(), bucket, key)?;
        let name = endpoints.get(&endpoint).cloned();
        if name.is_none() {
            debug!(strategy = %self.name, cluster = %cluster, endpoint = %endpoint, "Strategy chose an unknown node");
        }
        name
    }

    fn name(&self) -> &str {
        &self.name
    }
}
