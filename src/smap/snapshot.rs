//! Cluster Map Snapshot
//!
//! A versioned, immutable-once-published record of the cluster's proxies,
//! targets and primary. Mutations happen only on a private clone inside a
//! [`SmapOwner`](super::SmapOwner) transaction; each topology or flag change
//! bumps the version.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{invariant_violated, Error, Result};
use crate::id;
use crate::node::{Node, NodeFlag, NodeFlags, NodeRole};
use crate::persist;

use super::DEFAULT_IC_SIZE;

/// Cluster map
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Smap {
    /// Targets by node ID
    #[serde(rename = "tmap")]
    pub(crate) targets: HashMap<String, Node>,
    /// Proxies by node ID
    #[serde(rename = "pmap")]
    pub(crate) proxies: HashMap<String, Node>,
    /// ID of the primary; always a key of `proxies` once valid
    #[serde(rename = "primary_id", default)]
    pub(crate) primary: Option<String>,
    /// Monotonic version, 0 = uninitialized
    pub(crate) version: u64,
    /// Cluster identity, assigned once at genesis
    #[serde(default)]
    pub(crate) uuid: String,
    #[serde(default)]
    pub(crate) creation_time: Option<DateTime<Utc>>,

    /// Version string as of the last publication
    #[serde(skip)]
    vstr: String,
    /// Encoded form, if already produced
    #[serde(skip)]
    encoded: Option<Bytes>,
}

impl Clone for Smap {
    /// Deep copy; keeps the version string, drops the encoded form
    fn clone(&self) -> Self {
        Self {
            targets: self.targets.clone(),
            proxies: self.proxies.clone(),
            primary: self.primary.clone(),
            version: self.version,
            uuid: self.uuid.clone(),
            creation_time: self.creation_time,
            vstr: self.vstr.clone(),
            encoded: None,
        }
    }
}

impl Smap {
    /// Genesis map: version 0, no nodes, no identity
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Version string cached at publication
    pub fn version_str(&self) -> &str {
        &self.vstr
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        self.creation_time
    }

    /// Assign cluster UUID and creation time unless already set
    pub fn init_identity(&mut self) {
        if self.uuid.is_empty() {
            self.uuid = id::gen_uuid();
            self.creation_time = Some(Utc::now());
            tracing::info!("new cluster UUID {}", self.uuid);
        }
    }

    pub(crate) fn refresh_version_str(&mut self) {
        self.vstr = self.version.to_string();
    }

    pub(crate) fn set_encoded(&mut self, body: Bytes) {
        self.encoded = Some(body);
    }

    /// Encoded form, if already produced by persistence
    pub fn encoded(&self) -> Option<&Bytes> {
        self.encoded.as_ref()
    }

    /// Serialized body, as persisted and as sent to peers
    pub fn marshal(&self) -> Result<Bytes> {
        match &self.encoded {
            Some(body) => Ok(body.clone()),
            None => persist::encode(self, 0),
        }
    }

    /// Decode a body produced by [`Smap::marshal`]
    pub fn unmarshal(body: &[u8]) -> Result<Self> {
        let mut smap: Smap = persist::decode(body)?;
        smap.set_encoded(Bytes::copy_from_slice(body));
        Ok(smap)
    }

    // ----- lookups -----

    pub fn get_proxy(&self, id: &str) -> Option<&Node> {
        self.proxies.get(id)
    }

    pub fn get_target(&self, id: &str) -> Option<&Node> {
        self.targets.get(id)
    }

    /// Look up a node of either role
    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.proxies.get(id).or_else(|| self.targets.get(id))
    }

    fn get_node_mut(&mut self, id: &str) -> Option<&mut Node> {
        match self.proxies.get_mut(id) {
            Some(node) => Some(node),
            None => self.targets.get_mut(id),
        }
    }

    pub fn proxies(&self) -> impl Iterator<Item = &Node> {
        self.proxies.values()
    }

    pub fn targets(&self) -> impl Iterator<Item = &Node> {
        self.targets.values()
    }

    pub fn count_proxies(&self) -> usize {
        self.proxies.len()
    }

    pub fn count_targets(&self) -> usize {
        self.targets.len()
    }

    /// Targets not in maintenance or being decommissioned
    pub fn count_active_targets(&self) -> usize {
        self.targets.values().filter(|t| !t.in_maint_or_decomm()).count()
    }

    pub fn primary_id(&self) -> Option<&str> {
        self.primary.as_deref()
    }

    /// Resolve the primary against the proxy map
    pub fn primary(&self) -> Option<&Node> {
        self.primary.as_deref().and_then(|id| self.proxies.get(id))
    }

    pub fn is_present(&self, node: &Node) -> bool {
        match node.role {
            NodeRole::Proxy => self.proxies.contains_key(&node.id),
            NodeRole::Target => self.targets.contains_key(&node.id),
        }
    }

    pub fn is_primary(&self, id: &str) -> bool {
        self.is_valid() && self.primary.as_deref() == Some(id)
    }

    // ----- validation -----

    /// Primary set and present; used at startup
    pub fn is_valid(&self) -> bool {
        match self.primary() {
            Some(p) => {
                debug_assert!(!p.id.is_empty());
                true
            }
            None => false,
        }
    }

    /// Full check of a map that is about to be accepted
    pub fn validate(&self) -> Result<()> {
        if self.version == 0 {
            return Err(Error::InvalidSmap("Smap v0".into()));
        }
        let primary = match &self.primary {
            Some(id) => id,
            None => return Err(Error::InvalidSmap(format!("{}: primary <nil>", self))),
        };
        if !self.proxies.contains_key(primary) {
            return Err(Error::InvalidSmap(format!(
                "{}: primary {} not present",
                self, primary
            )));
        }
        if !id::is_valid_uuid(&self.uuid) {
            return Err(Error::InvalidSmap(format!(
                "{}: invalid UUID {:?}",
                self, self.uuid
            )));
        }
        if let Some(id) = self.targets.keys().find(|id| self.proxies.contains_key(*id)) {
            return Err(Error::InvalidSmap(format!(
                "{}: node ID {} is both a proxy and a target",
                self, id
            )));
        }
        let ic = self.ic_count();
        if ic > DEFAULT_IC_SIZE {
            return Err(Error::InvalidSmap(format!(
                "{}: IC has {} members, max {}",
                self, ic, DEFAULT_IC_SIZE
            )));
        }
        Ok(())
    }

    /// Detect maps from different clusters
    ///
    /// Tolerates an unset UUID on either side (a node that has not learned
    /// the cluster identity yet).
    pub fn validate_uuid(&self, other: &Smap, caller: &str) -> Result<()> {
        if self.uuid.is_empty() || other.uuid.is_empty() || self.uuid == other.uuid {
            return Ok(());
        }
        let caller = if caller.is_empty() { "???" } else { caller };
        Err(Error::UuidMismatch {
            caller: caller.to_string(),
            local: self.string_ex(),
            remote: other.string_ex(),
        })
    }

    // ----- topology -----

    /// Insert a new target
    ///
    /// # Panics
    /// If the ID is already present in either map.
    pub fn add_target(&mut self, node: Node) {
        debug_assert!(node.is_target());
        if let Some(existing) = self.get_node(&node.id) {
            invariant_violated(format!(
                "duplicate node ID: new {} vs {}",
                node.string_ex(),
                existing.string_ex()
            ));
        }
        self.targets.insert(node.id.clone(), node);
        self.version += 1;
    }

    /// Insert a new proxy
    ///
    /// # Panics
    /// If the ID is already present in either map.
    pub fn add_proxy(&mut self, node: Node) {
        debug_assert!(node.is_proxy());
        if let Some(existing) = self.get_node(&node.id) {
            invariant_violated(format!(
                "duplicate node ID: new {} vs {}",
                node.string_ex(),
                existing.string_ex()
            ));
        }
        self.proxies.insert(node.id.clone(), node);
        self.version += 1;
    }

    /// Insert according to role
    pub fn add_node(&mut self, node: Node) {
        match node.role {
            NodeRole::Proxy => self.add_proxy(node),
            NodeRole::Target => self.add_target(node),
        }
    }

    /// # Panics
    /// If the target is not present.
    pub fn del_target(&mut self, id: &str) -> Node {
        match self.targets.remove(id) {
            Some(node) => {
                self.version += 1;
                node
            }
            None => invariant_violated(format!("target {} is not in {}", id, self)),
        }
    }

    /// # Panics
    /// If the proxy is not present.
    pub fn del_proxy(&mut self, id: &str) -> Node {
        match self.proxies.remove(id) {
            Some(node) => {
                self.version += 1;
                node
            }
            None => invariant_violated(format!("proxy {} is not in {}", id, self)),
        }
    }

    /// Remove according to role
    pub fn remove_node(&mut self, role: NodeRole, id: &str) -> Node {
        match role {
            NodeRole::Proxy => self.del_proxy(id),
            NodeRole::Target => self.del_target(id),
        }
    }

    /// Insert or replace a node (re-join after restart)
    ///
    /// Returns true if a node with the same ID and role was replaced.
    pub fn put_node(&mut self, mut node: Node, flags: NodeFlags) -> bool {
        node.flags = flags;
        let map = match node.role {
            NodeRole::Proxy => &mut self.proxies,
            NodeRole::Target => &mut self.targets,
        };
        let exists = map.contains_key(&node.id);
        let name = node.to_string();

        if node.is_proxy() && flags.is_set(NodeFlag::NonElectable) {
            tracing::warn!("{} won't be electable", node);
        }
        if exists {
            map.insert(node.id.clone(), node);
            self.version += 1;
        } else {
            self.add_node(node);
        }

        tracing::info!(
            "joined {} (p {}, t {})",
            name,
            self.count_proxies(),
            self.count_targets()
        );
        exists
    }

    /// Designate the primary
    ///
    /// # Panics
    /// If `id` is not a proxy in this map.
    pub fn set_primary(&mut self, id: &str) {
        if !self.proxies.contains_key(id) {
            invariant_violated(format!("primary {} is not a proxy in {}", id, self));
        }
        self.primary = Some(id.to_string());
    }

    // ----- flags -----

    /// Must be called on a clone under the owner's lock
    ///
    /// Setting maintenance or decommission also drops IC membership.
    pub fn set_node_flags(&mut self, id: &str, flags: impl Into<NodeFlags>) {
        let flags = flags.into();
        let current = match self.get_node(id) {
            Some(node) => node.flags,
            None => invariant_violated(format!("node {} is not in {}", id, self)),
        };
        let mut updated = current.set(flags);
        if flags.is_any_set(NodeFlags::MAINT_DECOMM) {
            updated = updated.clear(NodeFlag::Ic);
        }
        self.apply_flags(id, updated);
    }

    /// Must be called on a clone under the owner's lock
    pub fn clear_node_flags(&mut self, id: &str, flags: impl Into<NodeFlags>) {
        let current = match self.get_node(id) {
            Some(node) => node.flags,
            None => invariant_violated(format!("node {} is not in {}", id, self)),
        };
        self.apply_flags(id, current.clear(flags));
    }

    fn apply_flags(&mut self, id: &str, flags: NodeFlags) {
        if let Some(node) = self.get_node_mut(id) {
            node.flags = flags;
        }
        self.version += 1;
    }

    // ----- merge -----

    /// First node in this map that shares an endpoint with `node`
    pub fn find_duplicate(&self, node: &Node) -> Option<&Node> {
        self.targets
            .values()
            .chain(self.proxies.values())
            .find(|existing| node.is_duplicate_of(existing))
    }

    /// Resolve an endpoint conflict with `node`
    ///
    /// With `remove_old` the conflicting node is evicted so the caller can
    /// insert `node` in its place; otherwise the conflict is returned.
    pub fn handle_duplicate_node(&mut self, node: &Node, remove_old: bool) -> Result<()> {
        let old = match self.find_duplicate(node) {
            Some(old) => old.clone(),
            None => return Ok(()),
        };
        let err = Error::DuplicateNode {
            new: node.string_ex(),
            existing: old.string_ex(),
        };
        if !remove_old {
            tracing::error!("{}", err);
            return Err(err);
        }
        tracing::error!(
            "{}: removing old {} from the current {} and future cluster maps",
            err,
            old,
            self
        );
        self.remove_node(old.role, &old.id);
        Ok(())
    }

    /// Copy this map's nodes into `dst`
    ///
    /// Nodes whose ID is already in `dst` (under either role) are skipped.
    /// Fails fast on the first endpoint conflict unless `override_dup` is
    /// set; nodes merged before the conflict stay merged. `dst` adopts this
    /// map's identity if it has none. Returns the number of nodes added.
    pub fn merge(&self, dst: &mut Smap, override_dup: bool) -> Result<usize> {
        let mut added = 0;
        for (id, node) in self.targets.iter().chain(self.proxies.iter()) {
            dst.handle_duplicate_node(node, override_dup)?;
            if dst.get_node(id).is_some() {
                continue;
            }
            let map = match node.role {
                NodeRole::Proxy => &mut dst.proxies,
                NodeRole::Target => &mut dst.targets,
            };
            map.insert(id.clone(), node.clone());
            added += 1;
        }
        if !self.uuid.is_empty() && dst.uuid.is_empty() {
            dst.uuid = self.uuid.clone();
            dst.creation_time = self.creation_time;
        }
        Ok(added)
    }

    // ----- formatting -----

    /// Pretty-printed JSON
    pub fn pp(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{}: {}", self, e))
    }

    /// Display form including the primary
    pub fn string_ex(&self) -> String {
        let primary = match self.primary() {
            Some(p) => p.to_string(),
            None => "<nil>".to_string(),
        };
        format!(
            "Smap v{}[{}, {}, t={}, p={}]",
            self.version,
            self.uuid,
            primary,
            self.count_targets(),
            self.count_proxies()
        )
    }
}

impl std::fmt::Display for Smap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Smap v{}[{}, t={}, p={}]",
            self.version,
            self.uuid,
            self.count_targets(),
            self.count_proxies()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(id: &str, host: &str) -> Node {
        Node::new(id, NodeRole::Proxy, host, 8080)
    }

    fn target(id: &str, host: &str) -> Node {
        Node::new(id, NodeRole::Target, host, 9080)
    }

    fn cluster(uuid: &str) -> Smap {
        let mut smap = Smap::new();
        smap.add_proxy(proxy("p1", "h1"));
        smap.set_primary("p1");
        smap.add_target(target("t1", "h2"));
        smap.uuid = uuid.to_string();
        smap
    }

    #[test]
    fn test_genesis_then_primary() {
        let mut smap = Smap::new();
        assert_eq!(smap.version(), 0);
        assert!(!smap.is_valid());

        smap.add_proxy(proxy("p1", "h1"));
        smap.set_primary("p1");
        assert_eq!(smap.version(), 1);
        assert_eq!(smap.primary().unwrap().id, "p1");
        assert!(smap.is_valid());
        assert!(smap.is_primary("p1"));
    }

    #[test]
    #[should_panic(expected = "duplicate node ID")]
    fn test_target_colliding_with_proxy_id() {
        let mut smap = Smap::new();
        smap.add_proxy(proxy("n1", "h1"));
        smap.add_target(target("n1", "h2"));
    }

    #[test]
    #[should_panic(expected = "is not in")]
    fn test_remove_absent_target() {
        let mut smap = Smap::new();
        smap.del_target("ghost");
    }

    #[test]
    fn test_put_node_replaces_once() {
        let mut smap = cluster("cluster-A");
        let before = smap.version();

        let mut rejoin = target("t1", "h9");
        rejoin.flags = NodeFlags::of(NodeFlag::Ic);
        assert!(smap.put_node(rejoin, NodeFlags::NONE));
        assert_eq!(smap.version(), before + 1);
        let t1 = smap.get_target("t1").unwrap();
        assert_eq!(t1.public_net.hostname, "h9");
        assert!(t1.flags.is_empty());

        assert!(!smap.put_node(target("t2", "h3"), NodeFlags::NONE));
        assert_eq!(smap.version(), before + 2);
        assert_eq!(smap.count_targets(), 2);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut smap = cluster("cluster-A");
        smap.refresh_version_str();
        smap.set_encoded(Bytes::from_static(b"{}"));

        let mut clone = smap.clone();
        assert_eq!(clone.version_str(), smap.version_str());
        assert!(clone.encoded().is_none());

        clone.add_proxy(proxy("p2", "h3"));
        clone.set_primary("p2");
        clone.set_node_flags("t1", NodeFlag::Maintenance);
        clone.del_target("t1");

        assert_eq!(smap.count_proxies(), 1);
        assert_eq!(smap.primary_id(), Some("p1"));
        assert!(smap.get_target("t1").unwrap().flags.is_empty());
        assert_eq!(smap.version(), 2);
    }

    #[test]
    fn test_validate() {
        let mut smap = Smap::new();
        assert!(smap.validate().unwrap_err().to_string().contains("v0"));

        smap.add_proxy(proxy("p1", "h1"));
        assert!(smap.validate().unwrap_err().to_string().contains("primary <nil>"));

        smap.primary = Some("p9".into());
        assert!(smap.validate().unwrap_err().to_string().contains("not present"));

        smap.set_primary("p1");
        assert!(smap.validate().unwrap_err().to_string().contains("invalid UUID"));

        smap.uuid = "cluster-A".into();
        smap.validate().unwrap();

        smap.targets.insert("p1".into(), target("p1", "h5"));
        assert!(smap.validate().unwrap_err().to_string().contains("both a proxy and a target"));
    }

    #[test]
    fn test_validate_uuid() {
        let a = cluster("cluster-A");
        let b = cluster("cluster-B");
        let err = a.validate_uuid(&b, "join").unwrap_err();
        assert!(err.is_cluster_integrity());

        let unset = cluster("");
        unset.validate_uuid(&a, "join").unwrap();
        a.validate_uuid(&unset, "").unwrap();
        a.validate_uuid(&cluster("cluster-A"), "metasync").unwrap();
    }

    #[test]
    fn test_set_maintenance_evicts_from_ic() {
        let mut smap = cluster("cluster-A");
        smap.set_node_flags("p1", NodeFlag::Ic);
        assert!(smap.get_proxy("p1").unwrap().flags.is_set(NodeFlag::Ic));

        let v = smap.version();
        smap.set_node_flags("p1", NodeFlag::Maintenance);
        let flags = smap.get_proxy("p1").unwrap().flags;
        assert!(flags.is_set(NodeFlag::Maintenance));
        assert!(!flags.is_set(NodeFlag::Ic));
        assert_eq!(smap.version(), v + 1);

        smap.clear_node_flags("p1", NodeFlag::Maintenance);
        assert!(smap.get_proxy("p1").unwrap().flags.is_empty());
    }

    #[test]
    fn test_merge_disjoint_and_adopt_uuid() {
        let src = cluster("cluster-A");
        let mut dst = Smap::new();
        dst.add_target(target("t7", "h7"));

        let added = src.merge(&mut dst, false).unwrap();
        assert_eq!(added, 2);
        assert_eq!(dst.count_targets(), 2);
        assert_eq!(dst.count_proxies(), 1);
        assert_eq!(dst.uuid(), "cluster-A");

        // nothing new the second time
        assert_eq!(src.merge(&mut dst, false).unwrap(), 0);
    }

    #[test]
    fn test_merge_is_commutative_on_members() {
        let mut a = Smap::new();
        a.add_target(target("t1", "h1"));
        a.add_proxy(proxy("p1", "h2"));
        let mut b = Smap::new();
        b.add_target(target("t2", "h3"));

        let mut ab = b.clone();
        a.merge(&mut ab, false).unwrap();
        let mut ba = a.clone();
        b.merge(&mut ba, false).unwrap();

        let ids = |s: &Smap| {
            let mut ids: Vec<String> = s.targets().chain(s.proxies()).map(|n| n.id.clone()).collect();
            ids.sort();
            ids
        };
        assert_eq!(ids(&ab), ids(&ba));
    }

    #[test]
    fn test_merge_duplicate_endpoint() {
        let mut src = Smap::new();
        src.add_target(target("t-new", "h1"));

        let mut dst = Smap::new();
        dst.add_target(target("t-old", "h1"));

        let err = src.merge(&mut dst, false).unwrap_err();
        assert!(matches!(err, Error::DuplicateNode { .. }));
        assert!(dst.get_target("t-old").is_some());
        assert!(dst.get_target("t-new").is_none());

        assert_eq!(src.merge(&mut dst, true).unwrap(), 1);
        assert!(dst.get_target("t-old").is_none());
        assert!(dst.get_target("t-new").is_some());
    }

    #[test]
    fn test_marshal_roundtrip_keeps_primary() {
        let smap = cluster("cluster-A");
        let body = smap.marshal().unwrap();
        let back = Smap::unmarshal(&body).unwrap();
        assert_eq!(back.version(), smap.version());
        assert_eq!(back.primary_id(), Some("p1"));
        assert_eq!(back.encoded(), Some(&body));
        assert!(back.pp().contains("\"primary_id\": \"p1\""));
    }

    #[test]
    fn test_display() {
        let smap = cluster("cluster-A");
        assert_eq!(smap.to_string(), "Smap v2[cluster-A, t=1, p=1]");
        assert_eq!(smap.string_ex(), "Smap v2[cluster-A, p[p1], t=1, p=1]");
    }
}
