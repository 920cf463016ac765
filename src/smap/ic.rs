//! Information Committee
//!
//! Keeps a bounded set of proxies flagged as IC members in sync with the
//! primary. Which proxies are picked is not significant; only the size
//! bound and the primary's membership are.

use crate::error::invariant_violated;
use crate::node::NodeFlag;

use super::{Smap, DEFAULT_IC_SIZE};

impl Smap {
    /// Maximum number of IC members
    pub fn default_ic_size(&self) -> usize {
        DEFAULT_IC_SIZE
    }

    pub fn is_ic(&self, id: &str) -> bool {
        self.get_proxy(id)
            .map(|p| p.flags.is_set(NodeFlag::Ic))
            .unwrap_or(false)
    }

    pub fn ic_count(&self) -> usize {
        self.proxies()
            .filter(|p| p.flags.is_set(NodeFlag::Ic))
            .count()
    }

    /// IDs of current IC members
    pub fn ic_members(&self) -> Vec<String> {
        self.proxies()
            .filter(|p| p.flags.is_set(NodeFlag::Ic))
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn add_ic(&mut self, id: &str) {
        if !self.is_ic(id) {
            self.set_node_flags(id, NodeFlag::Ic);
        }
    }

    /// Add electable proxies until the committee is full or none are left
    pub fn fill_ic(&mut self) {
        if self.ic_count() >= DEFAULT_IC_SIZE {
            return;
        }
        let candidates: Vec<String> = self
            .proxies()
            .filter(|p| p.is_electable() && !p.flags.is_set(NodeFlag::Ic))
            .map(|p| p.id.clone())
            .collect();
        for id in candidates {
            if self.ic_count() >= DEFAULT_IC_SIZE {
                break;
            }
            self.add_ic(&id);
        }
    }

    /// Drop non-primary members until the committee is within bounds
    pub fn evict_ic(&mut self) {
        while self.ic_count() > DEFAULT_IC_SIZE {
            let primary = self.primary_id().map(str::to_string);
            let victim = self
                .proxies()
                .find(|p| p.flags.is_set(NodeFlag::Ic) && Some(&p.id) != primary.as_ref())
                .map(|p| p.id.clone());
            match victim {
                Some(id) => self.clear_node_flags(&id, NodeFlag::Ic),
                None => break,
            }
        }
    }

    /// Primary only: make sure the primary is a member, then fill and trim
    ///
    /// Idempotent when the topology has not changed in between.
    pub fn staff_ic(&mut self) {
        let primary = match self.primary_id() {
            Some(id) if self.get_proxy(id).is_some() => id.to_string(),
            _ => invariant_violated(format!("{}: cannot staff IC without a primary", self)),
        };
        self.add_ic(&primary);
        self.fill_ic();
        self.evict_ic();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeFlags, NodeRole};

    fn with_proxies(n: usize) -> Smap {
        let mut smap = Smap::new();
        for i in 0..n {
            smap.add_proxy(Node::new(format!("p{}", i), NodeRole::Proxy, &format!("h{}", i), 8080));
        }
        smap.set_primary("p0");
        smap
    }

    #[test]
    fn test_fill_ic_up_to_default_size() {
        let mut smap = with_proxies(5);
        smap.fill_ic();
        assert_eq!(smap.ic_count(), DEFAULT_IC_SIZE);
    }

    #[test]
    fn test_fill_ic_skips_non_electable() {
        let mut smap = with_proxies(4);
        smap.set_node_flags("p1", NodeFlag::NonElectable);
        smap.set_node_flags("p2", NodeFlag::Maintenance);
        smap.fill_ic();
        assert_eq!(smap.ic_count(), 2);
        assert!(!smap.is_ic("p1"));
        assert!(!smap.is_ic("p2"));
    }

    #[test]
    fn test_evict_ic_keeps_primary() {
        let mut smap = with_proxies(5);
        for i in 0..5 {
            smap.set_node_flags(&format!("p{}", i), NodeFlag::Ic);
        }
        assert_eq!(smap.ic_count(), 5);
        smap.evict_ic();
        assert_eq!(smap.ic_count(), DEFAULT_IC_SIZE);
        assert!(smap.is_ic("p0"));
    }

    #[test]
    fn test_staff_ic_is_idempotent() {
        let mut smap = with_proxies(4);
        smap.staff_ic();
        assert!(smap.is_ic("p0"));
        assert_eq!(smap.ic_count(), DEFAULT_IC_SIZE);

        let version = smap.version();
        let members = {
            let mut m = smap.ic_members();
            m.sort();
            m
        };
        smap.staff_ic();
        let mut again = smap.ic_members();
        again.sort();
        assert_eq!(smap.version(), version);
        assert_eq!(again, members);
    }

    #[test]
    fn test_staff_ic_small_cluster() {
        let mut smap = with_proxies(2);
        smap.staff_ic();
        assert_eq!(smap.ic_count(), 2);
        let version = smap.version();
        smap.staff_ic();
        assert_eq!(smap.version(), version);
    }

    #[test]
    fn test_ic_bound_holds_after_mixed_operations() {
        let mut smap = with_proxies(6);
        smap.staff_ic();
        smap.put_node(
            Node::new("p9", NodeRole::Proxy, "h9", 8080),
            NodeFlags::of(NodeFlag::Ic),
        );
        assert!(smap.ic_count() > DEFAULT_IC_SIZE);
        smap.evict_ic();
        assert!(smap.ic_count() <= DEFAULT_IC_SIZE);
        smap.fill_ic();
        assert_eq!(smap.ic_count(), DEFAULT_IC_SIZE);
    }

    #[test]
    #[should_panic(expected = "without a primary")]
    fn test_staff_ic_without_primary() {
        let mut smap = Smap::new();
        smap.staff_ic();
    }
}
