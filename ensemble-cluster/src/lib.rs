//! Ensemble Cluster - Coordination layer of a clustered key/value store
//!
//! Routes commands to the node owning a bucket or key, propagates them
//! between nodes, and keeps track of the members of independently deployed
//! clusters (an "ensemble").
//!
//! # Architecture
//!
//! - **Router**: cluster to node-set table with two-level partitioning
//!   (bucket/key to cluster, then to node), consistent hashing by default
//! - **Processor**: staged command pipeline with a worker pool, pause and
//!   resume
//! - **Node**: the local pipeline and remote peers behind one interface
//! - **Discovery**: per remote cluster join from a seed and periodic
//!   membership refresh
//! - **Transport**: tarpc over TCP with length-delimited bincode frames
//! - **Coordinator**: wires everything from an [`EnsembleConfig`]
//!
//! # Key Operations
//!
//! - Routing: route_to_node_for, route_to_nodes_for, broadcast_route
//! - Pipeline: execute, process, pause, resume, shutdown
//! - Discovery: join, update, schedule, cancel

pub mod command;
pub mod config;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod node;
pub mod partition;
pub mod processor;
pub mod retry;
pub mod router;
pub mod service;
pub mod store;
pub mod types;

mod coordinator;
mod server;

pub use command::{Command, Response, Target};
pub use config::{ClusterConfig, DiscoveryConfig, EnsembleConfig, PartitionerConfig, RemoteClusterConfig};
pub use coordinator::Coordinator;
pub use discovery::{Discovery, DiscoveryEvent};
pub use error::{EnsembleError, ErrorKind, Result};
pub use node::{LocalNode, Node, NodeFactory, NodeRef, RemoteNode, RemoteNodeFactory};
pub use partition::{
    ClusterPartitioner, ConsistentClusterPartitioner, ConsistentEnsemblePartitioner,
    CustomClusterPartitionerStrategy, CustomEnsemblePartitionerStrategy, EnsemblePartitioner,
    PartitionerRegistry,
};
pub use processor::{CommandExecutor, Completion, Dispatcher, PipelineState, Processor};
pub use retry::RetryPolicy;
pub use router::Router;
pub use server::EnsembleServer;
pub use service::EnsembleServiceClient;
pub use store::{MemoryStore, Store};
pub use types::*;
