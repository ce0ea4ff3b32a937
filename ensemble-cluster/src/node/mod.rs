//! Nodes: the local pipeline and remote peers behind one interface

mod local;
mod remote;

pub use local::LocalNode;
pub use remote::{RemoteNode, RemoteNodeFactory};

use crate::command::{Command, Response};
use crate::error::Result;
use crate::types::{Endpoint, Member};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

/// A routing target able to execute commands
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique name of the node within its cluster
    fn name(&self) -> &str;

    fn host(&self) -> &str;

    fn port(&self) -> u16;

    /// Open the transport channel, no-op when already connected
    async fn connect(&self) -> Result<()>;

    /// Execute a command on this node and wait for its response
    async fn send(&self, command: Command) -> Result<Response>;

    /// Release transport resources
    async fn disconnect(&self);

    fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host(), self.port())
    }

    fn member(&self) -> Member {
        Member::new(self.name(), self.host(), self.port())
    }
}

/// Shared handle to a node
///
/// Equality, hashing and ordering use the node name only, so two handles to
/// independently created nodes with the same name are the same route.
#[derive(Clone)]
pub struct NodeRef(Arc<dyn Node>);

impl NodeRef {
    pub fn new(node: impl Node + 'static) -> Self {
        Self(Arc::new(node))
    }

    pub fn from_arc(node: Arc<dyn Node>) -> Self {
        Self(node)
    }
}

impl Deref for NodeRef {
    type Target = dyn Node;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for NodeRef {}

impl Hash for NodeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state);
    }
}

impl PartialOrd for NodeRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name().cmp(other.name())
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name())
            .field("host", &self.host())
            .field("port", &self.port())
            .finish()
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.name(), self.host(), self.port())
    }
}

/// Creates nodes for discovered or configured peers
pub trait NodeFactory: Send + Sync {
    fn make_node(&self, host: &str, port: u16, name: &str) -> NodeRef;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    struct Named(&'static str, u16);

    #[async_trait]
    impl Node for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn host(&self) -> &str {
            "localhost"
        }

        fn port(&self) -> u16 {
            self.1
        }

        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn send(&self, _command: Command) -> Result<Response> {
            Ok(Response::Done)
        }

        async fn disconnect(&self) {}
    }

    #[test]
    fn test_identity_by_name() {
        let a = NodeRef::new(Named("a", 1));
        let a2 = NodeRef::new(Named("a", 2));
        let b = NodeRef::new(Named("b", 1));

        assert_eq!(a, a2);
        assert_ne!(a, b);

        let set: BTreeSet<NodeRef> = [b.clone(), a.clone(), a2].into();
        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().next().unwrap().name(), "a");
    }

    #[test]
    fn test_member_and_display() {
        let node = NodeRef::new(Named("n1", 6000));
        assert_eq!(node.member(), Member::new("n1", "localhost", 6000));
        assert_eq!(node.endpoint().to_string(), "localhost:6000");
        assert_eq!(node.to_string(), "n1@localhost:6000");
    }
}
