//! Node Flags
//!
//! Membership and status flags carried by each node record.

use serde::{Deserialize, Serialize};

/// A single membership/status flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeFlag {
    /// Member of the information committee
    Ic,
    /// Proxy that must never become primary
    NonElectable,
    /// Temporarily out of service
    Maintenance,
    /// Being removed from the cluster
    Decommission,
}

impl NodeFlag {
    const ALL: [NodeFlag; 4] = [
        NodeFlag::Ic,
        NodeFlag::NonElectable,
        NodeFlag::Maintenance,
        NodeFlag::Decommission,
    ];

    fn bit(self) -> u8 {
        match self {
            NodeFlag::Ic => 1 << 0,
            NodeFlag::NonElectable => 1 << 1,
            NodeFlag::Maintenance => 1 << 2,
            NodeFlag::Decommission => 1 << 3,
        }
    }
}

impl std::fmt::Display for NodeFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeFlag::Ic => write!(f, "IC"),
            NodeFlag::NonElectable => write!(f, "NON_ELECTABLE"),
            NodeFlag::Maintenance => write!(f, "MAINTENANCE"),
            NodeFlag::Decommission => write!(f, "DECOMMISSION"),
        }
    }
}

/// Set of node flags
///
/// Serialized as a list of flag names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<NodeFlag>", into = "Vec<NodeFlag>")]
pub struct NodeFlags(u8);

impl NodeFlags {
    /// Empty set
    pub const NONE: NodeFlags = NodeFlags(0);

    /// Maintenance or decommission; both take a node out of the committee
    pub const MAINT_DECOMM: NodeFlags = NodeFlags((1 << 2) | (1 << 3));

    /// Set holding a single flag
    pub fn of(flag: NodeFlag) -> Self {
        Self(flag.bit())
    }

    /// Union of this set and `other`
    pub fn set(self, other: impl Into<NodeFlags>) -> Self {
        Self(self.0 | other.into().0)
    }

    /// This set without the flags in `other`
    pub fn clear(self, other: impl Into<NodeFlags>) -> Self {
        Self(self.0 & !other.into().0)
    }

    /// All flags in `other` are present
    pub fn is_set(self, other: impl Into<NodeFlags>) -> bool {
        let other = other.into();
        self.0 & other.0 == other.0
    }

    /// At least one flag in `other` is present
    pub fn is_any_set(self, other: impl Into<NodeFlags>) -> bool {
        self.0 & other.into().0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate over contained flags
    pub fn iter(self) -> impl Iterator<Item = NodeFlag> {
        NodeFlag::ALL.into_iter().filter(move |f| self.0 & f.bit() != 0)
    }
}

impl From<NodeFlag> for NodeFlags {
    fn from(flag: NodeFlag) -> Self {
        Self::of(flag)
    }
}

impl From<Vec<NodeFlag>> for NodeFlags {
    fn from(flags: Vec<NodeFlag>) -> Self {
        flags.into_iter().fold(NodeFlags::NONE, NodeFlags::set)
    }
}

impl From<NodeFlags> for Vec<NodeFlag> {
    fn from(flags: NodeFlags) -> Self {
        flags.iter().collect()
    }
}

impl FromIterator<NodeFlag> for NodeFlags {
    fn from_iter<I: IntoIterator<Item = NodeFlag>>(iter: I) -> Self {
        iter.into_iter().fold(NodeFlags::NONE, NodeFlags::set)
    }
}

impl std::fmt::Display for NodeFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.iter().map(|f| f.to_string()).collect();
        write!(f, "[{}]", names.join(","))
    }
}
