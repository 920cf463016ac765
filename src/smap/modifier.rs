//! Cluster Map Modification Context
//!
//! Describes one membership transaction: what changes, why, and the
//! callbacks the owner runs around the commit.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::node::{Node, NodeFlags, NodeRole};
use crate::rebalance::{RebCallback, RebMd, RebalanceTrigger, RmdModifier};

use super::Smap;

/// Validates and mutates the clone, under the owner's lock
pub type PreFn = Box<dyn FnOnce(&mut SmapModifier, &mut Smap) -> Result<()> + Send>;

/// Runs after publication; `post` still holds the lock, `final` does not
pub type PostFn = Box<dyn FnOnce(&mut SmapModifier, &Arc<Smap>) + Send>;

/// Action names carried in [`ActionMsg`]
pub mod actions {
    pub const JOIN: &str = "join";
    pub const REMOVE_NODE: &str = "remove-node";
    pub const START_MAINTENANCE: &str = "start-maintenance";
    pub const STOP_MAINTENANCE: &str = "stop-maintenance";
    pub const DECOMMISSION: &str = "decommission-node";
    pub const SET_PRIMARY: &str = "set-primary";
    pub const BOOTSTRAP: &str = "bootstrap";
}

/// The action that triggered a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionMsg {
    pub action: String,
    pub name: String,
}

impl ActionMsg {
    pub fn new(action: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ActionMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.action)
        } else {
            write!(f, "{}({})", self.action, self.name)
        }
    }
}

/// What a transaction changes
#[derive(Debug, Clone, Default)]
pub enum ModifyIntent {
    /// Everything happens in a custom `pre`
    #[default]
    None,
    AddNode { node: Node, flags: NodeFlags },
    RemoveNode { role: NodeRole, id: String },
    SetFlags { id: String, flags: NodeFlags },
    ClearFlags { id: String, flags: NodeFlags },
    SetPrimary { id: String },
}

/// One cluster map transaction
pub struct SmapModifier {
    pre: Option<PreFn>,
    post: Option<PostFn>,
    final_: Option<PostFn>,

    /// Map before the transaction
    pub smap: Option<Arc<Smap>>,
    /// Rebalance metadata committed by the final stage, if any
    pub rmd: Option<Arc<RebMd>>,
    pub msg: ActionMsg,
    pub intent: ModifyIntent,
    /// Node being added was already in the map
    pub exists: bool,
    /// Target reports an interrupted rebalance or a cold restart
    pub interrupted: bool,
    /// Skip rebalance even when targets were added or removed
    pub skip_reb: bool,
    must_reb: bool,
}

impl SmapModifier {
    pub fn new(msg: ActionMsg, intent: ModifyIntent) -> Self {
        Self {
            pre: None,
            post: None,
            final_: None,
            smap: None,
            rmd: None,
            msg,
            intent,
            exists: false,
            interrupted: false,
            skip_reb: false,
            must_reb: false,
        }
    }

    /// Replace the default `pre` (which applies the intent)
    pub fn with_pre<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut SmapModifier, &mut Smap) -> Result<()> + Send + 'static,
    {
        self.pre = Some(Box::new(f));
        self
    }

    pub fn with_post<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut SmapModifier, &Arc<Smap>) + Send + 'static,
    {
        self.post = Some(Box::new(f));
        self
    }

    pub fn with_final<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut SmapModifier, &Arc<Smap>) + Send + 'static,
    {
        self.final_ = Some(Box::new(f));
        self
    }

    pub fn skip_rebalance(mut self) -> Self {
        self.skip_reb = true;
        self
    }

    pub(crate) fn take_pre(&mut self) -> Option<PreFn> {
        self.pre.take()
    }

    pub(crate) fn take_post(&mut self) -> Option<PostFn> {
        self.post.take()
    }

    pub(crate) fn take_final(&mut self) -> Option<PostFn> {
        self.final_.take()
    }

    /// Apply [`ModifyIntent`] to the clone
    pub fn apply_intent(&mut self, clone: &mut Smap) -> Result<()> {
        match self.intent.clone() {
            ModifyIntent::None => Ok(()),
            ModifyIntent::AddNode { node, flags } => {
                if let Some(existing) = clone.get_node(&node.id) {
                    if existing.role != node.role {
                        return Err(Error::DuplicateNode {
                            new: node.string_ex(),
                            existing: existing.string_ex(),
                        });
                    }
                }
                clone.handle_duplicate_node(&node, false)?;
                let is_target = node.is_target();
                self.exists = clone.put_node(node, flags);
                if is_target && (!self.exists || self.interrupted) {
                    self.must_reb = true;
                }
                if !is_target && clone.primary().is_some() {
                    clone.staff_ic();
                }
                Ok(())
            }
            ModifyIntent::RemoveNode { role, id } => {
                let present = match role {
                    NodeRole::Proxy => clone.get_proxy(&id).is_some(),
                    NodeRole::Target => clone.get_target(&id).is_some(),
                };
                if !present {
                    return Err(Error::NodeNotFound(id));
                }
                if clone.primary_id() == Some(id.as_str()) {
                    return Err(Error::Internal(format!(
                        "cannot remove primary {} from {}",
                        id, clone
                    )));
                }
                clone.remove_node(role, &id);
                match role {
                    NodeRole::Target => self.must_reb = true,
                    NodeRole::Proxy if clone.primary().is_some() => clone.staff_ic(),
                    NodeRole::Proxy => {}
                }
                Ok(())
            }
            ModifyIntent::SetFlags { id, flags } => self.change_flags(clone, &id, flags, true),
            ModifyIntent::ClearFlags { id, flags } => self.change_flags(clone, &id, flags, false),
            ModifyIntent::SetPrimary { id } => {
                match clone.get_proxy(&id) {
                    Some(p) if p.is_electable() => {}
                    Some(p) => {
                        return Err(Error::Internal(format!("{} is not electable", p)));
                    }
                    None => return Err(Error::NodeNotFound(id)),
                }
                clone.set_primary(&id);
                clone.staff_ic();
                Ok(())
            }
        }
    }

    fn change_flags(&mut self, clone: &mut Smap, id: &str, flags: NodeFlags, set: bool) -> Result<()> {
        let is_target = match clone.get_node(id) {
            Some(node) => node.is_target(),
            None => return Err(Error::NodeNotFound(id.to_string())),
        };
        if set {
            if !is_target && clone.primary_id() == Some(id) && flags.is_any_set(NodeFlags::MAINT_DECOMM) {
                return Err(Error::Internal(format!(
                    "cannot put primary {} in maintenance",
                    id
                )));
            }
            clone.set_node_flags(id, flags);
        } else {
            clone.clear_node_flags(id, flags);
        }
        if is_target {
            if flags.is_any_set(NodeFlags::MAINT_DECOMM) {
                self.must_reb = true;
            }
        } else if clone.primary().is_some() {
            // keeps the primary in the IC and the IC within bounds
            clone.staff_ic();
        }
        Ok(())
    }

    /// Whether the committed map calls for a rebalance
    pub fn must_rebalance(&self, smap: &Smap) -> bool {
        self.must_reb && !self.skip_reb && smap.count_active_targets() >= 2
    }

    /// Trigger a rebalance-metadata update if this transaction needs one
    ///
    /// Meant for the `final` stage. `reb_cb` runs once the rebalance
    /// metadata has been committed.
    pub fn rebalance_if_needed(
        &mut self,
        committed: &Arc<Smap>,
        trigger: &dyn RebalanceTrigger,
        reb_cb: Option<RebCallback>,
    ) -> Result<bool> {
        if !self.must_rebalance(committed) {
            return Ok(false);
        }
        let mut ctx = RmdModifier::new(Arc::clone(committed), self.msg.clone());
        if let Some(cb) = reb_cb {
            ctx = ctx.with_callback(cb);
        }
        self.rmd = Some(trigger.modify(ctx)?);
        Ok(true)
    }
}

impl std::fmt::Debug for SmapModifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmapModifier")
            .field("msg", &self.msg)
            .field("intent", &self.intent)
            .field("exists", &self.exists)
            .field("interrupted", &self.interrupted)
            .field("skip_reb", &self.skip_reb)
            .field("must_reb", &self.must_reb)
            .finish()
    }
}
