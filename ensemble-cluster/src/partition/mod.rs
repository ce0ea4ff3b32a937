//! Partitioning of buckets and keys across the ensemble
//!
//! Routing is two-level:
//!
//! - an [`EnsemblePartitioner`] picks the cluster owning a bucket (or a key
//!   of a bucket),
//! - a [`ClusterPartitioner`] picks the node inside that cluster.
//!
//! Both default to consistent hashing. A custom single-method strategy can
//! replace either one, see [`custom`] and [`PartitionerRegistry`].
//!
//! Partitioners are owned by the [`Router`](crate::router::Router) and only
//! ever mutated under its write lock, together with the node sets they
//! describe.

pub mod custom;
mod registry;
mod ring;

pub use custom::{
    CustomClusterPartitioner, CustomClusterPartitionerStrategy, CustomEnsemblePartitioner,
    CustomEnsemblePartitionerStrategy,
};
pub use registry::PartitionerRegistry;
pub use ring::{HashRing, DEFAULT_VNODES_PER_MEMBER};

use crate::types::{Cluster, Member};
use ring::routing_key;
use std::collections::{BTreeMap, BTreeSet};

/// Maps a bucket (and optionally a key) to the owning cluster
pub trait EnsemblePartitioner: Send + Sync {
    /// Replace the set of known clusters
    fn setup_clusters(&mut self, clusters: &BTreeSet<Cluster>);

    fn cluster_for(&self, bucket: &str, key: Option<&str>) -> Option<Cluster>;

    fn name(&self) -> &str;
}

/// Maps a bucket (and optionally a key) to a node of a given cluster
pub trait ClusterPartitioner: Send + Sync {
    fn add_node(&mut self, cluster: &Cluster, member: &Member);

    fn remove_node(&mut self, cluster: &Cluster, node_name: &str);

    /// Forget every node of every cluster
    fn clear(&mut self);

    /// Name of the owning node, if the cluster has any
    fn node_for(&self, cluster: &Cluster, bucket: &str, key: Option<&str>) -> Option<String>;

    fn name(&self) -> &str;
}

/// Consistent hashing over cluster names
#[derive(Debug, Default)]
pub struct ConsistentEnsemblePartitioner {
    ring: HashRing,
    clusters: BTreeMap<String, Cluster>,
}

impl ConsistentEnsemblePartitioner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EnsemblePartitioner for ConsistentEnsemblePartitioner {
    fn setup_clusters(&mut self, clusters: &BTreeSet<Cluster>) {
        self.ring.clear();
        self.clusters.clear();
        for cluster in clusters {
            self.ring.add(cluster.name());
            self.clusters
                .insert(cluster.name().to_string(), cluster.clone());
        }
    }

    fn cluster_for(&self, bucket: &str, key: Option<&str>) -> Option<Cluster> {
        self.ring
            .owner(&routing_key(bucket, key))
            .and_then(|name| self.clusters.get(name))
            .cloned()
    }

    fn name(&self) -> &str {
        "consistent"
    }
}

/// Consistent hashing over node names, one ring per cluster
#[derive(Debug, Default)]
pub struct ConsistentClusterPartitioner {
    rings: BTreeMap<Cluster, HashRing>,
}

impl ConsistentClusterPartitioner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClusterPartitioner for ConsistentClusterPartitioner {
    fn add_node(&mut self, cluster: &Cluster, member: &Member) {
        self.rings
            .entry(cluster.clone())
            .or_default()
            .add(&member.name);
    }

    fn remove_node(&mut self, cluster: &Cluster, node_name: &str) {
        if let Some(ring) = self.rings.get_mut(cluster) {
            ring.remove(node_name);
        }
    }

    fn clear(&mut self) {
        self.rings.clear();
    }

    fn node_for(&self, cluster: &Cluster, bucket: &str, key: Option<&str>) -> Option<String> {
        self.rings
            .get(cluster)
            .and_then(|ring| ring.owner(&routing_key(bucket, key)))
            .map(str::to_string)
    }

    fn name(&self) -> &str {
        "consistent"
    }
}
