//! Routing table of the ensemble
//!
//! The router maps clusters to their node sets and resolves a bucket, or a
//! key of a bucket, to the node owning it. Node sets and partitioner state
//! live behind one lock, so a reader never sees a node present in a set
//! but missing from its ring, or the other way around.

use crate::error::{EnsembleError, Result};
use crate::metrics::{record_cluster_nodes, record_route_lookup};
use crate::node::NodeRef;
use crate::partition::{
    ClusterPartitioner, ConsistentClusterPartitioner, ConsistentEnsemblePartitioner,
    EnsemblePartitioner,
};
use crate::types::{Cluster, MembershipView};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

struct RoutingTable {
    clusters: BTreeMap<Cluster, BTreeMap<String, NodeRef>>,
    local_node: Option<NodeRef>,
    cluster_partitioner: Box<dyn ClusterPartitioner>,
    ensemble_partitioner: Box<dyn EnsemblePartitioner>,
}

impl RoutingTable {
    fn resolve(&self, bucket: &str, key: Option<&str>) -> Result<NodeRef> {
        let cluster = self
            .ensemble_partitioner
            .cluster_for(bucket, key)
            .ok_or_else(|| EnsembleError::MissingRoute(format!("No cluster for bucket {}", bucket)))?;

        let nodes = self.clusters.get(&cluster).ok_or_else(|| {
            EnsembleError::MissingRoute(format!("Unknown cluster {}", cluster))
        })?;

        self.cluster_partitioner
            .node_for(&cluster, bucket, key)
            .and_then(|name| nodes.get(&name))
            .cloned()
            .ok_or_else(|| {
                EnsembleError::MissingRoute(format!(
                    "No node of cluster {} for bucket {}",
                    cluster, bucket
                ))
            })
    }

    fn nodes_of(&self, cluster: &Cluster) -> Result<BTreeSet<NodeRef>> {
        self.clusters
            .get(cluster)
            .map(|nodes| nodes.values().cloned().collect())
            .ok_or_else(|| EnsembleError::MissingRoute(format!("Unknown cluster {}", cluster)))
    }
}

/// Thread-safe routing table with pluggable partitioners
pub struct Router {
    table: RwLock<RoutingTable>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(
            Box::new(ConsistentClusterPartitioner::new()),
            Box::new(ConsistentEnsemblePartitioner::new()),
        )
    }
}

impl Router {
    pub fn new(
        cluster_partitioner: Box<dyn ClusterPartitioner>,
        ensemble_partitioner: Box<dyn EnsemblePartitioner>,
    ) -> Self {
        info!(
            cluster_partitioner = cluster_partitioner.name(),
            ensemble_partitioner = ensemble_partitioner.name(),
            "Router created"
        );
        Self {
            table: RwLock::new(RoutingTable {
                clusters: BTreeMap::new(),
                local_node: None,
                cluster_partitioner,
                ensemble_partitioner,
            }),
        }
    }

    /// Replace the set of known clusters.
    ///
    /// Routes of clusters still present are kept; new clusters start
    /// empty. Routes of clusters no longer present are dropped.
    pub fn setup_clusters(&self, clusters: impl IntoIterator<Item = Cluster>) {
        let clusters: BTreeSet<Cluster> = clusters.into_iter().collect();
        let mut table = self.table.write();

        let mut previous = std::mem::take(&mut table.clusters);
        for cluster in &clusters {
            let nodes = previous.remove(cluster).unwrap_or_default();
            table.clusters.insert(cluster.clone(), nodes);
        }
        for (dropped, nodes) in previous {
            for name in nodes.keys() {
                table.cluster_partitioner.remove_node(&dropped, name);
            }
            debug!(cluster = %dropped, routes = nodes.len(), "Cluster dropped");
        }
        table.ensemble_partitioner.setup_clusters(&clusters);

        info!(
            clusters = ?clusters.iter().map(Cluster::name).collect::<Vec<_>>(),
            "Clusters set up"
        );
    }

    /// Register the node representing this process
    pub fn add_route_to_local_node(&self, node: NodeRef) {
        let mut table = self.table.write();
        if let Some(previous) = table.local_node.replace(node.clone()) {
            if previous != node {
                info!(previous = %previous.name(), node = %node.name(), "Local node replaced");
            }
        }
    }

    pub fn route_to_local_node(&self) -> Result<NodeRef> {
        self.table
            .read()
            .local_node
            .clone()
            .ok_or_else(|| EnsembleError::MissingRoute("No local node registered".into()))
    }

    /// Add a node to a cluster's node set.
    ///
    /// Returns `false` when a node with the same name is already routed; the
    /// existing node is kept.
    pub fn add_route_to(&self, cluster: &Cluster, node: NodeRef) -> Result<bool> {
        let mut table = self.table.write();
        let RoutingTable {
            clusters,
            cluster_partitioner,
            ..
        } = &mut *table;

        let nodes = clusters
            .get_mut(cluster)
            .ok_or_else(|| EnsembleError::MissingRoute(format!("Unknown cluster {}", cluster)))?;

        if nodes.contains_key(node.name()) {
            return Ok(false);
        }

        cluster_partitioner.add_node(cluster, &node.member());
        debug!(cluster = %cluster, node = %node, "Route added");
        nodes.insert(node.name().to_string(), node);
        record_cluster_nodes(cluster.name(), nodes.len());
        Ok(true)
    }

    /// Remove a node from a cluster's node set.
    ///
    /// Sends already in progress on the node are unaffected; the caller
    /// decides whether to disconnect the returned node.
    pub fn remove_route_to(&self, cluster: &Cluster, node_name: &str) -> Option<NodeRef> {
        let mut table = self.table.write();
        let RoutingTable {
            clusters,
            cluster_partitioner,
            ..
        } = &mut *table;

        let nodes = clusters.get_mut(cluster)?;
        let removed = nodes.remove(node_name)?;
        cluster_partitioner.remove_node(cluster, node_name);
        record_cluster_nodes(cluster.name(), nodes.len());
        debug!(cluster = %cluster, node = %removed, "Route removed");
        Some(removed)
    }

    /// Node owning a bucket
    pub fn route_to_node_for(&self, bucket: &str) -> Result<NodeRef> {
        let result = self.table.read().resolve(bucket, None);
        record_lookup(&result);
        result
    }

    /// Node owning a key of a bucket, possibly in another cluster than the
    /// bucket's
    pub fn route_to_node_for_key(&self, bucket: &str, key: &str) -> Result<NodeRef> {
        let result = self.table.read().resolve(bucket, Some(key));
        record_lookup(&result);
        result
    }

    /// Group keys by owning node, in one pass over one table snapshot
    pub fn route_to_nodes_for<I, K>(&self, bucket: &str, keys: I) -> Result<HashMap<NodeRef, BTreeSet<String>>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let table = self.table.read();
        let mut routes: HashMap<NodeRef, BTreeSet<String>> = HashMap::new();
        for key in keys {
            let key = key.as_ref();
            let node = table.resolve(bucket, Some(key));
            record_lookup(&node);
            routes.entry(node?).or_default().insert(key.to_string());
        }
        Ok(routes)
    }

    /// Every routed node, grouped by cluster. Empty clusters are left out.
    pub fn broadcast_route(&self) -> Result<BTreeMap<Cluster, BTreeSet<NodeRef>>> {
        let table = self.table.read();
        let routes: BTreeMap<Cluster, BTreeSet<NodeRef>> = table
            .clusters
            .iter()
            .filter(|(_, nodes)| !nodes.is_empty())
            .map(|(cluster, nodes)| (cluster.clone(), nodes.values().cloned().collect()))
            .collect();

        if routes.is_empty() {
            return Err(EnsembleError::MissingRoute("No routed nodes".into()));
        }
        Ok(routes)
    }

    /// Node set of a registered cluster, possibly empty
    pub fn cluster_route(&self, cluster: &Cluster) -> Result<BTreeSet<NodeRef>> {
        self.table.read().nodes_of(cluster)
    }

    pub fn cluster_route_by_name(&self, name: &str) -> Result<BTreeSet<NodeRef>> {
        self.cluster_route(&Cluster::remote(name))
    }

    pub fn clusters(&self) -> BTreeSet<Cluster> {
        self.table.read().clusters.keys().cloned().collect()
    }

    pub fn local_cluster(&self) -> Option<Cluster> {
        self.table
            .read()
            .clusters
            .keys()
            .find(|c| c.is_local())
            .cloned()
    }

    /// Members of the local cluster, as answered to membership queries
    pub fn membership_view(&self) -> Result<MembershipView> {
        let table = self.table.read();
        let (cluster, nodes) = table
            .clusters
            .iter()
            .find(|(c, _)| c.is_local())
            .ok_or_else(|| EnsembleError::MissingRoute("No local cluster".into()))?;

        let members = nodes
            .values()
            .chain(table.local_node.iter())
            .map(|node| node.member());
        Ok(MembershipView::new(cluster.name(), members))
    }

    /// Drop and disconnect every route except the local node's.
    ///
    /// Clusters stay registered, with empty (or local-only) node sets.
    pub async fn cleanup(&self) -> usize {
        let removed = self.take_remote_routes();
        let count = removed.len();
        for node in removed {
            node.disconnect().await;
        }
        info!(removed = count, "Remote routes cleaned up");
        count
    }

    fn take_remote_routes(&self) -> Vec<NodeRef> {
        let mut table = self.table.write();
        let RoutingTable {
            clusters,
            local_node,
            cluster_partitioner,
            ..
        } = &mut *table;

        let mut removed = Vec::new();
        for (cluster, nodes) in clusters.iter_mut() {
            let remote: Vec<String> = nodes
                .keys()
                .filter(|name| local_node.as_ref().map(|l| l.name()) != Some(name.as_str()))
                .cloned()
                .collect();
            for name in remote {
                if let Some(node) = nodes.remove(&name) {
                    cluster_partitioner.remove_node(cluster, &name);
                    removed.push(node);
                }
            }
            record_cluster_nodes(cluster.name(), nodes.len());
        }
        removed
    }
}

fn record_lookup<T>(result: &Result<T>) {
    record_route_lookup(if result.is_ok() { "hit" } else { "miss" });
}
