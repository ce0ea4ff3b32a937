//! Core value types shared by routing, discovery and the wire protocol

use crate::error::{EnsembleError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A named cluster, either the one this process belongs to or a remote one.
///
/// Identity, equality and ordering use the name only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    name: String,
    is_local: bool,
}

impl Cluster {
    pub fn new(name: impl Into<String>, is_local: bool) -> Self {
        Self {
            name: name.into(),
            is_local,
        }
    }

    /// Create the local cluster
    pub fn local(name: impl Into<String>) -> Self {
        Self::new(name, true)
    }

    /// Create a remote cluster
    pub fn remote(name: impl Into<String>) -> Self {
        Self::new(name, false)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }
}

impl PartialEq for Cluster {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Cluster {}

impl Hash for Cluster {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for Cluster {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cluster {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Opaque stored value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Value(Vec<u8>);

impl Value {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// A host/port pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a `host:port` string
    pub fn parse(addr: &str) -> Result<Self> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| EnsembleError::Config(format!("Invalid address '{}': missing port", addr)))?;
        if host.is_empty() {
            return Err(EnsembleError::Config(format!(
                "Invalid address '{}': missing host",
                addr
            )));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| EnsembleError::Config(format!("Invalid address '{}': {}", addr, e)))?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A cluster member as reported in a membership view
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl Member {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    /// Parse a `name@host:port` string
    pub fn parse(member: &str) -> Result<Self> {
        let (name, addr) = member.split_once('@').ok_or_else(|| {
            EnsembleError::Config(format!("Invalid member '{}': expected name@host:port", member))
        })?;
        if name.is_empty() {
            return Err(EnsembleError::Config(format!(
                "Invalid member '{}': empty name",
                member
            )));
        }
        let endpoint = Endpoint::parse(addr)?;
        Ok(Self::new(name, endpoint.host, endpoint.port))
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.name, self.host, self.port)
    }
}

/// Snapshot of a cluster's members, answered to membership queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipView {
    pub cluster_name: String,
    pub members: BTreeSet<Member>,
}

impl MembershipView {
    pub fn new(cluster_name: impl Into<String>, members: impl IntoIterator<Item = Member>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            members: members.into_iter().collect(),
        }
    }

    /// Names of every reported member
    pub fn member_names(&self) -> BTreeSet<String> {
        self.members.iter().map(|m| m.name.clone()).collect()
    }
}
