//! Cluster Nodes
//!
//! Node records (proxies and targets) as they appear in the cluster map.

mod flags;

pub use flags::{NodeFlag, NodeFlags};

use serde::{Deserialize, Serialize};

/// Role of a node in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Gateway node; one of them is the primary
    Proxy,
    /// Storage node
    Target,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Proxy => write!(f, "PROXY"),
            NodeRole::Target => write!(f, "TARGET"),
        }
    }
}

/// One of the networks a node listens on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetInfo {
    pub hostname: String,
    pub port: u16,
    pub url: String,
}

impl NetInfo {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        let hostname = hostname.into();
        let url = format!("http://{}:{}", hostname, port);
        Self { hostname, port, url }
    }
}

/// A cluster node record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier, stable for the node's lifetime
    pub id: String,
    pub role: NodeRole,
    /// Public network (clients)
    pub public_net: NetInfo,
    /// Intra-cluster control network
    pub control_net: NetInfo,
    /// Intra-cluster data network
    pub data_net: NetInfo,
    #[serde(default)]
    pub flags: NodeFlags,
}

impl Node {
    /// Create a node that uses the same host for all three networks
    pub fn new(id: impl Into<String>, role: NodeRole, hostname: &str, port: u16) -> Self {
        Self {
            id: id.into(),
            role,
            public_net: NetInfo::new(hostname, port),
            control_net: NetInfo::new(hostname, port.wrapping_add(1)),
            data_net: NetInfo::new(hostname, port.wrapping_add(2)),
            flags: NodeFlags::NONE,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_proxy(&self) -> bool {
        self.role == NodeRole::Proxy
    }

    pub fn is_target(&self) -> bool {
        self.role == NodeRole::Target
    }

    /// Proxy may be chosen as primary or committee member
    pub fn is_electable(&self) -> bool {
        !self.flags.is_set(NodeFlag::NonElectable) && !self.in_maint_or_decomm()
    }

    pub fn in_maint_or_decomm(&self) -> bool {
        self.flags.is_any_set(NodeFlags::MAINT_DECOMM)
    }

    /// Different node advertising any of the same endpoints
    pub fn is_duplicate_of(&self, other: &Node) -> bool {
        if self.id == other.id {
            return false;
        }
        self.public_net.url == other.public_net.url
            || self.control_net.url == other.control_net.url
            || self.data_net.url == other.data_net.url
    }

    /// Name with role and endpoint, for logs
    pub fn string_ex(&self) -> String {
        format!("{}({})", self, self.public_net.url)
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.role {
            NodeRole::Proxy => write!(f, "p[{}]", self.id),
            NodeRole::Target => write!(f, "t[{}]", self.id),
        }
    }
}
