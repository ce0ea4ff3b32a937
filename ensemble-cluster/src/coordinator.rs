//! Wiring of one ensemble node
//!
//! The coordinator owns the pipeline, the router, the command server and
//! one discovery per remote cluster, and drives their lifecycle.

use crate::config::EnsembleConfig;
use crate::discovery::Discovery;
use crate::error::Result;
use crate::node::{LocalNode, NodeFactory, NodeRef, RemoteNodeFactory};
use crate::partition::PartitionerRegistry;
use crate::processor::{Dispatcher, Processor};
use crate::router::Router;
use crate::server::EnsembleServer;
use crate::store::Store;
use crate::types::{Cluster, Endpoint};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// A running ensemble node
pub struct Coordinator {
    config: EnsembleConfig,
    router: Arc<Router>,
    processor: Arc<Processor>,
    local_node: NodeRef,
    server: EnsembleServer,
    discoveries: Vec<Discovery>,
}

impl Coordinator {
    /// Start every component described by `config`.
    ///
    /// Configuration problems are fatal. A remote cluster whose seed cannot
    /// be reached is not: it stays unrouted until a scheduled refresh
    /// joins it.
    pub async fn start(
        config: EnsembleConfig,
        store: Arc<dyn Store>,
        registry: &PartitionerRegistry,
    ) -> Result<Self> {
        config.validate()?;

        let router = Arc::new(Router::new(
            registry.cluster_partitioner(&config.partitioner)?,
            registry.ensemble_partitioner(&config.partitioner)?,
        ));

        let local_cluster = Cluster::local(config.cluster.name.as_str());
        let remotes = config
            .ensemble
            .clusters
            .iter()
            .map(|remote| Ok((Cluster::remote(remote.name.as_str()), remote.seed_endpoint()?)))
            .collect::<Result<Vec<(Cluster, Endpoint)>>>()?;
        router.setup_clusters(
            std::iter::once(local_cluster.clone()).chain(remotes.iter().map(|(c, _)| c.clone())),
        );

        let dispatcher = Dispatcher::new(store, Arc::clone(&router));
        let processor = Arc::new(Processor::start(
            config.cluster.worker_threads,
            Arc::new(dispatcher),
        ));

        let server =
            EnsembleServer::bind(&config.cluster.bind_endpoint(), Arc::clone(&processor)).await?;

        let local_node = NodeRef::new(LocalNode::new(
            config.cluster.node_name.as_str(),
            config.cluster.bind_host.as_str(),
            server.local_addr().port(),
            Arc::clone(&processor),
        ));
        router.add_route_to_local_node(local_node.clone());
        router.add_route_to(&local_cluster, local_node.clone())?;

        let timeout = config.cluster.node_timeout();
        let factory: Arc<dyn NodeFactory> = Arc::new(RemoteNodeFactory::new(timeout, timeout));

        for peer in config.cluster.peer_members()? {
            let node = factory.make_node(&peer.host, peer.port, &peer.name);
            router.add_route_to(&local_cluster, node.clone())?;
            if let Err(e) = node.connect().await {
                warn!(peer = %peer, error = %e, "Cannot connect to static peer");
            }
        }

        let mut discoveries = Vec::with_capacity(remotes.len());
        for (cluster, seed) in remotes {
            let discovery = Discovery::new(cluster, Arc::clone(&router), Arc::clone(&factory));
            if let Err(e) = discovery.join(&seed).await {
                warn!(
                    cluster = %discovery.cluster(),
                    seed = %seed,
                    error = %e,
                    "Initial join failed, will retry on refresh"
                );
            }
            discovery.schedule(config.ensemble.initial_delay(), config.ensemble.interval());
            discoveries.push(discovery);
        }

        info!(
            cluster = %local_cluster,
            node = %local_node,
            remote_clusters = discoveries.len(),
            "Ensemble node started"
        );

        Ok(Self {
            config,
            router,
            processor,
            local_node,
            server,
            discoveries,
        })
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn router(&self) -> Arc<Router> {
        Arc::clone(&self.router)
    }

    pub fn processor(&self) -> Arc<Processor> {
        Arc::clone(&self.processor)
    }

    pub fn local_node(&self) -> NodeRef {
        self.local_node.clone()
    }

    /// Address the command server listens on
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn discoveries(&self) -> &[Discovery] {
        &self.discoveries
    }

    /// Pause the local pipeline, waiting for running commands
    pub async fn pause(&self) {
        self.processor.pause().await;
    }

    pub fn resume(&self) {
        self.processor.resume();
    }

    /// Stop discovery, drop remote routes and stop the pipeline and server
    pub async fn shutdown(&self) {
        for discovery in &self.discoveries {
            discovery.cancel();
        }
        self.router.cleanup().await;
        self.processor.shutdown().await;
        self.server.stop();
        info!(node = %self.local_node, "Ensemble node shut down");
    }
}
