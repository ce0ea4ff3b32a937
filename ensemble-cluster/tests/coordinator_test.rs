//! End-to-end tests: two nodes of different clusters talking over TCP

use ensemble_cluster::partition::CustomEnsemblePartitionerStrategy;
use ensemble_cluster::{
    Command, Coordinator, EnsembleConfig, EnsembleError, MemoryStore, Node, NodeRef,
    PartitionerRegistry, RemoteClusterConfig, RemoteNode, Response, Store, Value,
};
use std::sync::Arc;
use std::time::Duration;

fn node_config(cluster: &str, node: &str) -> EnsembleConfig {
    let mut config = EnsembleConfig::default();
    config.cluster.name = cluster.to_string();
    config.cluster.node_name = node.to_string();
    config.cluster.bind_host = "127.0.0.1".to_string();
    config.cluster.bind_port = 0;
    config.cluster.worker_threads = 2;
    config.cluster.node_timeout_ms = 500;
    // Keep scheduled refreshes out of the way
    config.ensemble.discovery_initial_delay_secs = 60;
    config
}

async fn start(config: EnsembleConfig) -> (Coordinator, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::start(config, store.clone(), &PartitionerRegistry::new())
        .await
        .unwrap();
    (coordinator, store)
}

/// Node `a1` of cluster1, and node `b1` of cluster2 discovering cluster1
async fn two_clusters() -> (Coordinator, Arc<MemoryStore>, Coordinator) {
    let (a, a_store) = start(node_config("cluster1", "a1")).await;

    let mut config = node_config("cluster2", "b1");
    config.ensemble.clusters.push(RemoteClusterConfig {
        name: "cluster1".to_string(),
        seed: a.local_addr().to_string(),
    });
    let (b, _) = start(config).await;

    (a, a_store, b)
}

fn remote_a1(b: &Coordinator) -> NodeRef {
    let route = b.router().cluster_route_by_name("cluster1").unwrap();
    assert_eq!(route.len(), 1);
    route.into_iter().next().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_cluster_discovered_from_seed() {
    let (a, _a_store, b) = two_clusters().await;

    let a1 = remote_a1(&b);
    assert_eq!(a1.name(), "a1");
    assert_eq!(a1.port(), a.local_addr().port());

    // b only knows itself in its own cluster
    let own: Vec<String> = b
        .router()
        .cluster_route_by_name("cluster2")
        .unwrap()
        .iter()
        .map(|n| n.name().to_string())
        .collect();
    assert_eq!(own, vec!["b1".to_string()]);

    b.shutdown().await;
    a.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_node_pings_even_while_paused() {
    let (a, _) = start(node_config("cluster1", "a1")).await;
    let node = RemoteNode::new(
        "a1",
        "127.0.0.1",
        a.local_addr().port(),
        Duration::from_secs(1),
        Duration::from_millis(500),
    );

    assert!(matches!(node.ping().await, Err(EnsembleError::Communication(_))));

    node.connect().await.unwrap();
    assert!(node.is_connected());
    assert_eq!(node.ping().await.unwrap(), "pong");

    // Pings bypass the command pipeline
    a.pause().await;
    assert_eq!(node.ping().await.unwrap(), "pong");
    a.resume();

    node.disconnect().await;
    assert!(!node.is_connected());
    a.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connect_fails_against_a_non_ensemble_listener() {
    // Accepts TCP but never speaks the protocol
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let node = RemoteNode::new(
        "mute",
        "127.0.0.1",
        port,
        Duration::from_secs(1),
        Duration::from_millis(200),
    );
    assert!(matches!(
        node.connect().await,
        Err(EnsembleError::Communication(_))
    ));
    assert!(!node.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_commands_execute_on_remote_node() {
    let (a, a_store, b) = two_clusters().await;
    let a1 = remote_a1(&b);

    let put = a1
        .send(Command::PutValue {
            bucket: "users".into(),
            key: "alice".into(),
            value: Value::from("admin"),
        })
        .await
        .unwrap();
    assert_eq!(put, Response::Done);
    assert_eq!(
        a_store.get_value("users", "alice").unwrap(),
        Some(Value::from("admin"))
    );

    let get = a1
        .send(Command::GetValue {
            bucket: "users".into(),
            key: "alice".into(),
        })
        .await
        .unwrap();
    assert_eq!(get, Response::Value(Some(Value::from("admin"))));

    // Failures on the remote node come back as they were raised
    let missing = a1
        .send(Command::GetKeys {
            bucket: "ghost".into(),
        })
        .await;
    assert!(matches!(missing, Err(EnsembleError::Processing(_))));

    b.shutdown().await;
    a.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_paused_remote_node_times_out() {
    let (a, _a_store, b) = two_clusters().await;
    let a1 = remote_a1(&b);

    a.pause().await;
    let result = a1.send(Command::GetBuckets).await;
    assert!(matches!(result, Err(EnsembleError::Communication(_))));

    a.resume();
    // The queued command ran after resume; fresh ones go through again
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(
        a1.send(Command::GetBuckets).await.unwrap(),
        Response::Buckets(_)
    ));

    b.shutdown().await;
    a.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreachable_seed_does_not_stop_startup() {
    let mut config = node_config("cluster2", "b1");
    config.ensemble.clusters.push(RemoteClusterConfig {
        name: "cluster1".to_string(),
        // Nothing listens on the discard port
        seed: "127.0.0.1:9".to_string(),
    });
    let (b, _) = start(config).await;

    assert!(b.router().cluster_route_by_name("cluster1").unwrap().is_empty());
    assert_eq!(b.discoveries().len(), 1);
    assert!(b.discoveries()[0].is_scheduled());

    b.shutdown().await;
    assert!(!b.discoveries()[0].is_scheduled());
}

struct Always(&'static str);

impl CustomEnsemblePartitionerStrategy for Always {
    fn cluster_for(&self, _bucket: &str, _key: Option<&str>) -> Option<String> {
        Some(self.0.to_string())
    }
}

#[tokio::test]
async fn test_ambiguous_partitioner_strategies_fail_startup() {
    let mut registry = PartitionerRegistry::new();
    registry
        .register_ensemble_strategy("first", Arc::new(Always("cluster1")))
        .register_ensemble_strategy("second", Arc::new(Always("cluster2")));

    let result = Coordinator::start(
        node_config("cluster1", "a1"),
        Arc::new(MemoryStore::new()),
        &registry,
    )
    .await;
    assert!(matches!(result, Err(EnsembleError::Config(_))));

    // Naming one of them resolves the ambiguity
    let mut config = node_config("cluster1", "a1");
    config.partitioner.ensemble = Some("second".to_string());
    let coordinator = Coordinator::start(config, Arc::new(MemoryStore::new()), &registry)
        .await
        .unwrap();
    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_drops_remote_routes() {
    let (a, _a_store, b) = two_clusters().await;

    b.shutdown().await;
    assert!(b.router().cluster_route_by_name("cluster1").unwrap().is_empty());
    assert_eq!(b.router().route_to_local_node().unwrap().name(), "b1");
    assert!(b.processor().process(Command::GetBuckets).await.is_err());

    a.shutdown().await;
}
