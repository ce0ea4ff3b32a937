//! Ensemble configuration

use crate::error::{EnsembleError, Result};
use crate::types::{Endpoint, Member};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

/// Main configuration handed to the coordinator
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EnsembleConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub ensemble: DiscoveryConfig,

    #[serde(default)]
    pub partitioner: PartitionerConfig,
}

/// Settings of the local cluster and of this node
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Name of the cluster this node belongs to
    #[serde(default = "default_cluster_name")]
    pub name: String,

    /// Unique name of this node within its cluster
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Host the command server binds to and advertises
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Port the command server binds to and advertises
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Static peers of the local cluster, as `name@host:port`
    #[serde(default)]
    pub peers: Vec<String>,

    /// Worker tasks draining the command pipeline
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Timeout for a command sent to a remote node, in milliseconds
    #[serde(default = "default_node_timeout")]
    pub node_timeout_ms: u64,
}

fn default_cluster_name() -> String {
    "cluster".to_string()
}

fn default_node_name() -> String {
    format!("node-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    6000
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Upper bound for discovery delays and intervals (one week)
pub const MAX_DISCOVERY_SECS: u64 = 7 * 24 * 3600;

/// Upper bound for the node timeout (one hour)
pub const MAX_NODE_TIMEOUT_MS: u64 = 3_600_000;

fn default_node_timeout() -> u64 {
    10_000
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: default_cluster_name(),
            node_name: default_node_name(),
            bind_host: default_bind_host(),
            bind_port: default_bind_port(),
            peers: Vec::new(),
            worker_threads: default_worker_threads(),
            node_timeout_ms: default_node_timeout(),
        }
    }
}

impl ClusterConfig {
    /// Get node timeout as Duration
    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    /// Address the command server binds to
    pub fn bind_endpoint(&self) -> Endpoint {
        Endpoint::new(self.bind_host.clone(), self.bind_port)
    }

    /// Parsed static peers
    pub fn peer_members(&self) -> Result<Vec<Member>> {
        self.peers.iter().map(|p| Member::parse(p)).collect()
    }
}

/// A remote cluster and the seed used to discover it
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RemoteClusterConfig {
    pub name: String,
    /// Seed address, `host:port`
    pub seed: String,
}

impl RemoteClusterConfig {
    pub fn seed_endpoint(&self) -> Result<Endpoint> {
        Endpoint::parse(&self.seed)
    }
}

/// Ensemble discovery settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Remote clusters to discover
    #[serde(default)]
    pub clusters: Vec<RemoteClusterConfig>,

    /// Delay before the first membership refresh, in seconds
    #[serde(default = "default_initial_delay")]
    pub discovery_initial_delay_secs: u64,

    /// Membership refresh interval, in seconds
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_secs: u64,
}

fn default_initial_delay() -> u64 {
    5
}

fn default_discovery_interval() -> u64 {
    30
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            clusters: Vec::new(),
            discovery_initial_delay_secs: default_initial_delay(),
            discovery_interval_secs: default_discovery_interval(),
        }
    }
}

impl DiscoveryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.discovery_initial_delay_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }
}

/// Names of the custom partitioner strategies to use, if any
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PartitionerConfig {
    #[serde(default)]
    pub cluster: Option<String>,

    #[serde(default)]
    pub ensemble: Option<String>,
}

impl EnsembleConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EnsembleError::Config(format!("Cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: EnsembleConfig = toml::from_str(content)
            .map_err(|e| EnsembleError::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for errors that must stop startup
    pub fn validate(&self) -> Result<()> {
        if self.cluster.name.is_empty() {
            return Err(EnsembleError::Config("cluster.name must not be empty".into()));
        }
        if self.cluster.node_name.is_empty() {
            return Err(EnsembleError::Config(
                "cluster.node_name must not be empty".into(),
            ));
        }
        if self.cluster.worker_threads == 0 {
            return Err(EnsembleError::Config(
                "cluster.worker_threads must be at least 1".into(),
            ));
        }
        if self.ensemble.discovery_interval_secs == 0 {
            return Err(EnsembleError::Config(
                "ensemble.discovery_interval_secs must be at least 1".into(),
            ));
        }
        if self.ensemble.discovery_interval_secs > MAX_DISCOVERY_SECS {
            return Err(EnsembleError::Config(format!(
                "ensemble.discovery_interval_secs must be at most {}",
                MAX_DISCOVERY_SECS
            )));
        }
        if self.ensemble.discovery_initial_delay_secs > MAX_DISCOVERY_SECS {
            return Err(EnsembleError::Config(format!(
                "ensemble.discovery_initial_delay_secs must be at most {}",
                MAX_DISCOVERY_SECS
            )));
        }
        if self.cluster.node_timeout_ms == 0 || self.cluster.node_timeout_ms > MAX_NODE_TIMEOUT_MS {
            return Err(EnsembleError::Config(format!(
                "cluster.node_timeout_ms must be between 1 and {}",
                MAX_NODE_TIMEOUT_MS
            )));
        }

        for peer in self.cluster.peer_members()? {
            if peer.name == self.cluster.node_name {
                return Err(EnsembleError::Config(format!(
                    "peer '{}' has the same name as this node",
                    peer
                )));
            }
        }

        let mut seen = BTreeSet::new();
        for remote in &self.ensemble.clusters {
            if remote.name == self.cluster.name {
                return Err(EnsembleError::Config(format!(
                    "remote cluster '{}' has the same name as the local cluster",
                    remote.name
                )));
            }
            if !seen.insert(remote.name.as_str()) {
                return Err(EnsembleError::Config(format!(
                    "remote cluster '{}' is configured twice",
                    remote.name
                )));
            }
            remote.seed_endpoint()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EnsembleConfig::default();
        assert!(config.cluster.node_name.starts_with("node-"));
        assert_eq!(config.cluster.node_name.len(), "node-".len() + 8);
        assert!(config.cluster.worker_threads > 0);
        assert_eq!(config.cluster.node_timeout(), Duration::from_secs(10));
        assert_eq!(config.ensemble.interval(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = EnsembleConfig::from_toml(
            r#"
            [cluster]
            name = "cluster1"
            node_name = "node1"
            bind_port = 6100
            peers = ["node2@10.0.0.2:6100"]
            worker_threads = 2

            [ensemble]
            discovery_interval_secs = 10

            [[ensemble.clusters]]
            name = "cluster2"
            seed = "127.0.0.1:6000"

            [partitioner]
            ensemble = "by-region"
            "#,
        )
        .unwrap();

        assert_eq!(config.cluster.name, "cluster1");
        assert_eq!(config.cluster.bind_endpoint(), Endpoint::new("127.0.0.1", 6100));
        assert_eq!(config.cluster.peer_members().unwrap()[0].name, "node2");
        assert_eq!(config.ensemble.clusters.len(), 1);
        assert_eq!(
            config.ensemble.clusters[0].seed_endpoint().unwrap(),
            Endpoint::new("127.0.0.1", 6000)
        );
        assert_eq!(config.ensemble.initial_delay(), Duration::from_secs(5));
        assert_eq!(config.partitioner.ensemble.as_deref(), Some("by-region"));
        assert!(config.partitioner.cluster.is_none());
    }

    #[test]
    fn test_rejects_remote_cluster_named_like_local() {
        let mut config = EnsembleConfig::default();
        config.cluster.name = "c1".into();
        config.ensemble.clusters.push(RemoteClusterConfig {
            name: "c1".into(),
            seed: "localhost:6000".into(),
        });
        assert!(matches!(config.validate(), Err(EnsembleError::Config(_))));
    }

    #[test]
    fn test_rejects_duplicate_remote_cluster_and_bad_seed() {
        let mut config = EnsembleConfig::default();
        let remote = RemoteClusterConfig {
            name: "c2".into(),
            seed: "localhost:6000".into(),
        };
        config.ensemble.clusters = vec![remote.clone(), remote];
        assert!(config.validate().is_err());

        config.ensemble.clusters = vec![RemoteClusterConfig {
            name: "c2".into(),
            seed: "localhost".into(),
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_workers() {
        let mut config = EnsembleConfig::default();
        config.cluster.worker_threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_durations() {
        let err = EnsembleConfig::from_toml(
            "[ensemble]\ndiscovery_initial_delay_secs = 9223372036854775807",
        )
        .unwrap_err();
        assert!(matches!(err, EnsembleError::Config(_)));

        let mut config = EnsembleConfig::default();
        config.ensemble.discovery_interval_secs = MAX_DISCOVERY_SECS + 1;
        assert!(config.validate().is_err());

        let mut config = EnsembleConfig::default();
        config.cluster.node_timeout_ms = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = EnsembleConfig::default();
        config.ensemble.discovery_initial_delay_secs = MAX_DISCOVERY_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ensemble.toml");
        std::fs::write(&path, "[cluster]\nname = \"from-file\"\n").unwrap();

        let config = EnsembleConfig::load(&path).unwrap();
        assert_eq!(config.cluster.name, "from-file");

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            EnsembleConfig::load(&missing),
            Err(EnsembleError::Config(_))
        ));
    }

    #[test]
    fn test_config_serde() {
        let config = EnsembleConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("node_timeout_ms"));
    }
}
