//! Shared test doubles: scripted nodes and a factory handing them out

#![allow(dead_code)]

use async_trait::async_trait;
use ensemble_cluster::{
    Command, EnsembleError, Member, MembershipView, Node, NodeFactory, NodeRef, Response, Result,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Behaviour and call counters shared by every node created for one name
#[derive(Default)]
pub struct MockState {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub sends: AtomicUsize,
    fail_connect: AtomicBool,
    /// `None` makes membership queries fail
    view: Mutex<Option<MembershipView>>,
}

impl MockState {
    pub fn answer_with(&self, view: MembershipView) {
        *self.view.lock() = Some(view);
    }

    pub fn stop_answering(&self) {
        *self.view.lock() = None;
    }

    pub fn refuse_connections(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

pub struct MockNode {
    name: String,
    host: String,
    port: u16,
    state: Arc<MockState>,
}

impl MockNode {
    pub fn new(name: &str, host: &str, port: u16, state: Arc<MockState>) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            port,
            state,
        }
    }
}

#[async_trait]
impl Node for MockNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }

    async fn connect(&self) -> Result<()> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(EnsembleError::Communication(format!(
                "{} refused the connection",
                self.name
            )));
        }
        Ok(())
    }

    async fn send(&self, command: Command) -> Result<Response> {
        self.state.sends.fetch_add(1, Ordering::SeqCst);
        match command {
            Command::Membership => {
                let view = self.state.view.lock().clone();
                view.map(Response::Membership).ok_or_else(|| {
                    EnsembleError::Communication(format!("{} did not answer", self.name))
                })
            }
            _ => Ok(Response::Done),
        }
    }

    async fn disconnect(&self) {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out mock nodes; nodes created for the same name share state
#[derive(Default)]
pub struct MockNodeFactory {
    states: Mutex<HashMap<String, Arc<MockState>>>,
}

impl MockNodeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// State of the node(s) named `name`, created on first use
    pub fn state(&self, name: &str) -> Arc<MockState> {
        Arc::clone(self.states.lock().entry(name.to_string()).or_default())
    }
}

impl NodeFactory for MockNodeFactory {
    fn make_node(&self, host: &str, port: u16, name: &str) -> NodeRef {
        NodeRef::new(MockNode::new(name, host, port, self.state(name)))
    }
}

/// A standalone mock node for routing tests
pub fn node(name: &str) -> NodeRef {
    NodeRef::new(MockNode::new(
        name,
        "localhost",
        6000,
        Arc::new(MockState::default()),
    ))
}

pub fn view(cluster: &str, members: &[&str]) -> MembershipView {
    MembershipView::new(
        cluster,
        members
            .iter()
            .map(|m| Member::parse(m).expect("valid member")),
    )
}
