//! ClusterMap - Cluster Membership Map
//!
//! Maintains the versioned map of a storage cluster's gateways (proxies)
//! and storage nodes (targets): who is a member, who is primary, which
//! nodes are in maintenance, and which proxies sit on the Information
//! Committee.
//!
//! # Architecture
//!
//! Every node holds one [`SmapOwner`]. Readers get the current map without
//! locking; writers clone it, change the clone, persist it and publish it
//! under a single mutex. Each committed version is announced to registered
//! listeners in commit order.
//!
//! # Features
//!
//! - Lock-free snapshot reads with copy-on-write updates
//! - Crash-safe persistence with optional compression and checksums
//! - Version-ordered synchronization with peers
//! - Information Committee staffing
//! - Rebalance triggering on target membership changes

pub mod config;
pub mod error;
pub mod id;
pub mod node;
pub mod persist;
pub mod rebalance;
pub mod smap;

pub use config::ClusterMapConfig;
pub use error::{Error, Result};
pub use smap::{Smap, SmapOwner};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::ClusterMapConfig;
    pub use crate::error::{Error, Result};
    pub use crate::node::{Node, NodeFlag, NodeFlags, NodeRole};
    pub use crate::rebalance::{RebMd, RebalanceTrigger, RmdOwner};
    pub use crate::smap::{
        actions, ActionMsg, ModifyIntent, Smap, SmapListener, SmapModifier, SmapOwner,
        SynchronizeOutcome,
    };
}
