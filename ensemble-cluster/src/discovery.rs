//! Discovery of remote clusters
//!
//! Each remote cluster gets one [`Discovery`]. It joins the cluster through
//! a seed address, then refreshes membership on a schedule:
//!
//! - every routed node of the cluster is asked for its membership view,
//! - the views of the nodes that answered are merged,
//! - nodes missing from the merged view, or not answering, are removed and
//!   disconnected,
//! - reported members not routed yet are added and connected.
//!
//! A cluster left without nodes stays registered in the router, and the
//! next refresh joins it again from the seed.
//!
//! # Example
//!
//! ```ignore
//! let discovery = Discovery::new(Cluster::remote("cluster2"), router, factory);
//! discovery.join(&Endpoint::parse("10.0.0.7:6000")?).await?;
//! discovery.schedule(Duration::from_secs(5), Duration::from_secs(30));
//!
//! let mut events = discovery.subscribe();
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         DiscoveryEvent::NodeJoined(member) => println!("joined: {}", member),
//!         DiscoveryEvent::NodeLeft(name) => println!("left: {}", name),
//!         DiscoveryEvent::RefreshComplete { node_count } => println!("{} nodes", node_count),
//!     }
//! }
//! ```

use crate::command::{Command, Response};
use crate::config::MAX_DISCOVERY_SECS;
use crate::error::{EnsembleError, Result};
use crate::metrics::record_discovery_event;
use crate::node::{NodeFactory, NodeRef};
use crate::router::Router;
use crate::types::{Cluster, Endpoint, Member, MembershipView};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Events emitted while discovering a cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A member was routed and connected
    NodeJoined(Member),

    /// A node was removed (name)
    NodeLeft(String),

    /// Refresh cycle completed
    RefreshComplete { node_count: usize },
}

/// Membership discovery for one remote cluster
pub struct Discovery {
    inner: Arc<DiscoveryInner>,

    /// Whether the scheduled refresh is running
    running: Arc<AtomicBool>,

    /// Background task handle
    task_handle: RwLock<Option<JoinHandle<()>>>,
}

struct DiscoveryInner {
    cluster: Cluster,
    router: Arc<Router>,
    factory: Arc<dyn NodeFactory>,

    /// Seed of the last join, used to rejoin an emptied cluster
    seed: RwLock<Option<Endpoint>>,

    /// Serializes joins and refresh cycles
    flight: Mutex<()>,

    event_tx: broadcast::Sender<DiscoveryEvent>,
}

impl Discovery {
    pub fn new(cluster: Cluster, router: Arc<Router>, factory: Arc<dyn NodeFactory>) -> Self {
        let (event_tx, _) = broadcast::channel(64);

        Self {
            inner: Arc::new(DiscoveryInner {
                cluster,
                router,
                factory,
                seed: RwLock::new(None),
                flight: Mutex::new(()),
                event_tx,
            }),
            running: Arc::new(AtomicBool::new(false)),
            task_handle: RwLock::new(None),
        }
    }

    pub fn cluster(&self) -> &Cluster {
        &self.inner.cluster
    }

    pub fn seed(&self) -> Option<Endpoint> {
        self.inner.seed.read().clone()
    }

    /// Subscribe to discovery events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Route the members reported by the seed.
    ///
    /// The seed connection is transient. The seed stays routed only when it
    /// lists itself in its own view. Returns the number of members added.
    pub async fn join(&self, seed: &Endpoint) -> Result<usize> {
        let _flight = self.inner.flight.lock().await;
        *self.inner.seed.write() = Some(seed.clone());
        self.inner.join_from(seed).await
    }

    /// Run one refresh cycle; never overlaps another cycle or a join
    pub async fn update(&self) -> Result<()> {
        self.inner.update().await
    }

    /// Refresh periodically in the background, first after `initial_delay`
    pub fn schedule(&self, initial_delay: Duration, period: Duration) {
        if self.running.swap(true, Ordering::SeqCst) {
            return; // Already scheduled
        }

        let inner = Arc::clone(&self.inner);
        let running = Arc::clone(&self.running);
        let initial_delay = initial_delay.min(MAX_SCHEDULE_DELAY);
        let period = period.clamp(Duration::from_millis(1), MAX_SCHEDULE_DELAY);

        let handle = tokio::spawn(async move {
            let _reset = ResetOnPanic(Arc::clone(&running));
            info!(
                cluster = %inner.cluster,
                initial_delay_ms = initial_delay.as_millis() as u64,
                period_ms = period.as_millis() as u64,
                "Starting discovery refresh"
            );

            let mut interval = tokio::time::interval_at(first_tick(initial_delay), period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while running.load(Ordering::SeqCst) {
                interval.tick().await;

                if !running.load(Ordering::SeqCst) {
                    break;
                }

                if let Err(e) = inner.update().await {
                    warn!(cluster = %inner.cluster, error = %e, "Discovery refresh failed");
                }
            }

            info!(cluster = %inner.cluster, "Discovery refresh stopped");
        });

        *self.task_handle.write() = Some(handle);
    }

    /// Stop the scheduled refresh
    pub fn cancel(&self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.task_handle.write().take() {
            handle.abort();
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Longest delay or period a schedule accepts; longer values are clamped
const MAX_SCHEDULE_DELAY: Duration = Duration::from_secs(MAX_DISCOVERY_SECS);

fn first_tick(initial_delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(initial_delay).unwrap_or(now)
}

/// Clears the scheduled flag when the refresh task unwinds
struct ResetOnPanic(Arc<AtomicBool>);

impl Drop for ResetOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.store(false, Ordering::SeqCst);
        }
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl DiscoveryInner {
    async fn join_from(&self, seed: &Endpoint) -> Result<usize> {
        let seed_name = format!("seed@{}", seed);
        let seed_node = self.factory.make_node(&seed.host, seed.port, &seed_name);

        let result = match seed_node.connect().await {
            Ok(()) => seed_node.send(Command::Membership).await,
            Err(e) => Err(e),
        };
        seed_node.disconnect().await;

        let view = self.expect_view(result?)?;
        let mut added = 0;
        for member in &view.members {
            if member.name == seed_name {
                continue;
            }
            if self.add_member(member).await? {
                added += 1;
            }
        }

        info!(
            cluster = %self.cluster,
            seed = %seed,
            reported = view.members.len(),
            added,
            "Joined cluster"
        );
        Ok(added)
    }

    async fn update(&self) -> Result<()> {
        let _flight = self.flight.lock().await;

        let routed = self.router.cluster_route(&self.cluster)?;
        if routed.is_empty() {
            let seed = self.seed.read().clone();
            if let Some(seed) = seed {
                debug!(cluster = %self.cluster, seed = %seed, "No routed nodes, joining from seed");
                self.join_from(&seed).await?;
            }
            self.refresh_complete()?;
            return Ok(());
        }

        let (live, unresponsive) = self.query_views(&routed).await;

        for node in &routed {
            if unresponsive.contains(node.name()) || !live.contains_key(node.name()) {
                self.remove_node(node.name()).await;
            }
        }

        let routed_names: BTreeSet<&str> = routed.iter().map(|node| node.name()).collect();
        for member in live.values() {
            if routed_names.contains(member.name.as_str()) || unresponsive.contains(&member.name) {
                continue;
            }
            self.add_member(member).await?;
        }

        self.refresh_complete()
    }

    /// Ask every routed node for its view. Returns the merged members and the
    /// names of the nodes that did not answer.
    async fn query_views(
        &self,
        routed: &BTreeSet<NodeRef>,
    ) -> (BTreeMap<String, Member>, BTreeSet<String>) {
        let responses = futures::future::join_all(routed.iter().map(|node| async move {
            let result = node.send(Command::Membership).await;
            (node, result)
        }))
        .await;

        let mut live = BTreeMap::new();
        let mut unresponsive = BTreeSet::new();
        for (node, result) in responses {
            match result.and_then(|response| self.expect_view(response)) {
                Ok(view) => {
                    for member in view.members {
                        live.entry(member.name.clone()).or_insert(member);
                    }
                }
                Err(e) => {
                    warn!(cluster = %self.cluster, node = %node.name(), error = %e, "Membership query failed");
                    unresponsive.insert(node.name().to_string());
                }
            }
        }
        (live, unresponsive)
    }

    fn expect_view(&self, response: Response) -> Result<MembershipView> {
        let view = match response {
            Response::Membership(view) => view,
            other => {
                return Err(EnsembleError::Processing(format!(
                    "Unexpected response to membership query: {:?}",
                    other
                )))
            }
        };
        if view.cluster_name != self.cluster.name() {
            return Err(EnsembleError::Processing(format!(
                "Node belongs to cluster {}, expected {}",
                view.cluster_name, self.cluster
            )));
        }
        Ok(view)
    }

    /// Route and connect a member. Returns `false` when it was already routed
    /// or could not be connected.
    async fn add_member(&self, member: &Member) -> Result<bool> {
        let node = self
            .factory
            .make_node(&member.host, member.port, &member.name);
        if !self.router.add_route_to(&self.cluster, node.clone())? {
            return Ok(false);
        }

        if let Err(e) = node.connect().await {
            warn!(cluster = %self.cluster, node = %member, error = %e, "Cannot connect to member");
            self.router.remove_route_to(&self.cluster, &member.name);
            return Ok(false);
        }

        info!(cluster = %self.cluster, node = %member, "Node joined");
        record_discovery_event(self.cluster.name(), "joined");
        let _ = self.event_tx.send(DiscoveryEvent::NodeJoined(member.clone()));
        Ok(true)
    }

    async fn remove_node(&self, name: &str) {
        if let Some(removed) = self.router.remove_route_to(&self.cluster, name) {
            removed.disconnect().await;
            info!(cluster = %self.cluster, node = %name, "Node left");
            record_discovery_event(self.cluster.name(), "left");
            let _ = self.event_tx.send(DiscoveryEvent::NodeLeft(name.to_string()));
        }
    }

    fn refresh_complete(&self) -> Result<()> {
        let node_count = self.router.cluster_route(&self.cluster)?.len();
        debug!(cluster = %self.cluster, node_count, "Discovery refresh complete");
        record_discovery_event(self.cluster.name(), "refresh");
        let _ = self
            .event_tx
            .send(DiscoveryEvent::RefreshComplete { node_count });
        Ok(())
    }
}
