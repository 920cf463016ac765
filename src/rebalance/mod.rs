//! Rebalance Metadata
//!
//! The boundary between a committed membership change and the rebalance
//! subsystem. A cluster map transaction's final stage hands an
//! [`RmdModifier`] to a [`RebalanceTrigger`]; running the rebalance itself
//! is not this crate's business.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::smap::{ActionMsg, Smap};

/// Versioned rebalance metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebMd {
    pub version: u64,
    /// Cluster map version that triggered this revision
    pub smap_version: u64,
    /// Targets expected to take part, sorted
    pub target_ids: Vec<String>,
    /// Local resilver only, no inter-target traffic
    #[serde(default)]
    pub resilver: bool,
}

/// Delivered to [`RmdModifier`] callbacks once rebalance metadata is committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebNotice {
    pub rmd_version: u64,
    pub smap_version: u64,
}

pub type RmdPreFn = Box<dyn FnOnce(&mut RmdModifier, &mut RebMd) + Send>;
pub type RmdFinalFn = Box<dyn FnOnce(&mut RmdModifier, &Arc<RebMd>) + Send>;
pub type RebCallback = Box<dyn FnOnce(RebNotice) + Send>;

/// One rebalance-metadata transaction
pub struct RmdModifier {
    pre: Option<RmdPreFn>,
    final_: Option<RmdFinalFn>,
    reb_cb: Option<RebCallback>,
    /// Committed cluster map that triggered this transaction
    pub smap: Arc<Smap>,
    pub msg: ActionMsg,
}

impl RmdModifier {
    pub fn new(smap: Arc<Smap>, msg: ActionMsg) -> Self {
        Self {
            pre: None,
            final_: None,
            reb_cb: None,
            smap,
            msg,
        }
    }

    pub fn with_pre<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut RmdModifier, &mut RebMd) + Send + 'static,
    {
        self.pre = Some(Box::new(f));
        self
    }

    pub fn with_final<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut RmdModifier, &Arc<RebMd>) + Send + 'static,
    {
        self.final_ = Some(Box::new(f));
        self
    }

    /// Invoked once the rebalance metadata has been committed
    pub fn with_callback(mut self, cb: RebCallback) -> Self {
        self.reb_cb = Some(cb);
        self
    }
}

/// Whatever owns rebalance metadata
pub trait RebalanceTrigger: Send + Sync {
    fn modify(&self, ctx: RmdModifier) -> Result<Arc<RebMd>>;
}

/// In-memory rebalance metadata owner
pub struct RmdOwner {
    rmd: ArcSwap<RebMd>,
    mu: Mutex<()>,
}

impl RmdOwner {
    pub fn new() -> Self {
        Self {
            rmd: ArcSwap::from_pointee(RebMd::default()),
            mu: Mutex::new(()),
        }
    }

    pub fn get(&self) -> Arc<RebMd> {
        self.rmd.load_full()
    }
}

impl Default for RmdOwner {
    fn default() -> Self {
        Self::new()
    }
}

impl RebalanceTrigger for RmdOwner {
    fn modify(&self, mut ctx: RmdModifier) -> Result<Arc<RebMd>> {
        if ctx.smap.count_active_targets() < 2 {
            return Err(Error::Rebalance(format!(
                "{}: not enough active targets",
                ctx.smap
            )));
        }

        let committed = {
            let _guard = self.mu.lock();
            let current = self.rmd.load_full();
            let mut clone = (*current).clone();
            clone.smap_version = ctx.smap.version();
            clone.target_ids = ctx
                .smap
                .targets()
                .filter(|t| !t.in_maint_or_decomm())
                .map(|t| t.id.clone())
                .collect();
            clone.target_ids.sort();
            if let Some(pre) = ctx.pre.take() {
                pre(&mut ctx, &mut clone);
            }
            clone.version = current.version + 1;

            let committed = Arc::new(clone);
            self.rmd.store(Arc::clone(&committed));
            committed
        };

        tracing::info!(
            "rebalance metadata v{} for {} ({})",
            committed.version,
            ctx.smap,
            ctx.msg
        );

        if let Some(fin) = ctx.final_.take() {
            fin(&mut ctx, &committed);
        }
        if let Some(cb) = ctx.reb_cb.take() {
            cb(RebNotice {
                rmd_version: committed.version,
                smap_version: committed.smap_version,
            });
        }
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeFlag, NodeFlags, NodeRole};
    use crate::smap::actions;

    fn smap_with_targets(n: usize) -> Arc<Smap> {
        let mut smap = Smap::new();
        smap.add_proxy(Node::new("p1", NodeRole::Proxy, "h0", 8080));
        smap.set_primary("p1");
        for i in 0..n {
            smap.add_target(Node::new(format!("t{}", i), NodeRole::Target, &format!("h{}", i + 1), 9080));
        }
        Arc::new(smap)
    }

    #[test]
    fn test_versions_increase_and_callback_runs() {
        let owner = RmdOwner::new();
        let smap = smap_with_targets(3);

        let (tx, rx) = std::sync::mpsc::channel();
        let first = owner
            .modify(
                RmdModifier::new(Arc::clone(&smap), ActionMsg::new(actions::JOIN, "t2"))
                    .with_callback(Box::new(move |n| {
                        let _ = tx.send(n);
                    })),
            )
            .unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.target_ids, vec!["t0", "t1", "t2"]);
        assert_eq!(rx.recv().unwrap().smap_version, smap.version());

        let second = owner
            .modify(
                RmdModifier::new(smap, ActionMsg::new(actions::JOIN, "t2"))
                    .with_pre(|_, rmd| rmd.resilver = true),
            )
            .unwrap();
        assert_eq!(second.version, 2);
        assert!(owner.get().resilver);
    }

    #[test]
    fn test_requires_two_active_targets() {
        let owner = RmdOwner::new();
        let mut smap = (*smap_with_targets(2)).clone();
        smap.put_node(
            Node::new("t1", NodeRole::Target, "h2", 9080),
            NodeFlags::of(NodeFlag::Maintenance),
        );
        let err = owner
            .modify(RmdModifier::new(Arc::new(smap), ActionMsg::default()))
            .unwrap_err();
        assert!(matches!(err, Error::Rebalance(_)));
        assert_eq!(owner.get().version, 0);
    }
}
