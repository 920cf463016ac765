//! Cluster Map Owner
//!
//! The single authority over the current cluster map. Readers load the
//! published map without locking; writers (`modify`, `synchronize`) are
//! serialized by one mutex, persist before publishing, and announce every
//! committed version to the listeners.
//!
//! Typical local update:
//! lock -- clone -- modify the clone -- persist -- publish -- unlock
//!
//! Merges and updates from peers compare versions inside the same
//! critical section as the publication.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::config::ClusterMapConfig;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::persist::{self, MetaOptions};

use super::listeners::SmapListeners;
use super::modifier::SmapModifier;
use super::{MsPayload, Smap, REVS_SMAP_TAG};

/// Result of a non-failing [`SmapOwner::synchronize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynchronizeOutcome {
    /// Candidate persisted and published
    Applied,
    /// Candidate has the same version as the current map
    NotNewer,
}

/// Owner of the current cluster map
pub struct SmapOwner {
    /// Published map
    smap: ArcSwap<Smap>,
    listeners: SmapListeners,
    fpath: PathBuf,
    opts: MetaOptions,
    /// Serializes writers; holds the largest encoded size seen so far
    mu: Mutex<usize>,
}

impl SmapOwner {
    /// Create an owner holding the genesis map
    pub fn new(config: &ClusterMapConfig) -> Self {
        Self::with_path(
            config.smap_path(),
            MetaOptions::from(&config.persistence),
            config.notifications.queue_size,
        )
    }

    pub fn with_path(fpath: PathBuf, opts: MetaOptions, queue_size: usize) -> Self {
        let mut genesis = Smap::new();
        genesis.refresh_version_str();
        Self {
            smap: ArcSwap::from_pointee(genesis),
            listeners: SmapListeners::new(queue_size),
            fpath,
            opts,
            mu: Mutex::new(0),
        }
    }

    /// Create an owner and publish the persisted map, if there is one
    pub fn open(config: &ClusterMapConfig) -> Result<Self> {
        let owner = Self::new(config);
        if let Some(mut smap) = owner.load()? {
            tracing::info!("loaded {} from {}", smap, owner.fpath.display());
            smap.refresh_version_str();
            owner.smap.store(Arc::new(smap));
        } else {
            tracing::info!("no persisted cluster map at {}", owner.fpath.display());
        }
        Ok(owner)
    }

    /// Read the persisted map
    ///
    /// A missing file is normal at genesis and yields `None`. Any other I/O
    /// failure, or a map that is not valid, is an error.
    pub fn load(&self) -> Result<Option<Smap>> {
        let smap: Smap = match persist::load_meta(&self.fpath) {
            Ok(smap) => smap,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        if smap.version() == 0 || !smap.is_valid() {
            return Err(Error::StateCorrupted(format!(
                "{} at {}",
                smap,
                self.fpath.display()
            )));
        }
        Ok(Some(smap))
    }

    /// Current map; never blocks
    ///
    /// The returned map stays valid and unchanged for as long as the caller
    /// holds it, regardless of later commits.
    pub fn current(&self) -> Arc<Smap> {
        self.smap.load_full()
    }

    pub fn listeners(&self) -> &SmapListeners {
        &self.listeners
    }

    pub fn path(&self) -> &Path {
        &self.fpath
    }

    /// Publish and announce; caller holds `mu`
    async fn put(&self, mut smap: Smap) -> Arc<Smap> {
        smap.refresh_version_str();
        let version = smap.version();
        let smap = Arc::new(smap);
        self.smap.store(Arc::clone(&smap));
        self.listeners.notify(version).await;
        smap
    }

    /// Accept a map received from a peer
    ///
    /// `si` is this node's own record; if the candidate carries different
    /// flags for it, the candidate wins. A candidate older than the current
    /// map yields [`Error::Downgrade`], which is benign. When `payload`
    /// carries the already-encoded map it is written verbatim.
    pub async fn synchronize(
        &self,
        si: &mut Node,
        mut new_smap: Smap,
        payload: Option<&MsPayload>,
    ) -> Result<SynchronizeOutcome> {
        if let Err(e) = new_smap.validate() {
            tracing::error!("{}: rejecting {}: {}", si, new_smap, e);
            if cfg!(debug_assertions) {
                panic!("{}: {} is invalid: {}", si, new_smap, e);
            }
            return Err(e);
        }

        let mut imm_size = self.mu.lock().await;
        let current = self.current();

        if let Some(nsi) = new_smap.get_node(&si.id) {
            if nsi.flags != si.flags {
                tracing::warn!("{} changing flags from {} to {}", si, si.flags, nsi.flags);
                si.flags = nsi.flags;
            }
        }

        let (cur_ver, new_ver) = (current.version(), new_smap.version());
        if new_ver <= cur_ver {
            if new_ver < cur_ver {
                return Err(Error::Downgrade {
                    node: si.to_string(),
                    current: current.to_string(),
                    received: new_smap.to_string(),
                });
            }
            return Ok(SynchronizeOutcome::NotNewer);
        }

        match self.persist_bytes(payload) {
            Some(body) => new_smap.set_encoded(body),
            None => {
                let body = persist::encode(&new_smap, *imm_size)?;
                *imm_size = (*imm_size).max(body.len());
                persist::save(&self.fpath, &body, &self.opts)?;
                new_smap.set_encoded(body);
            }
        }

        let published = self.put(new_smap).await;
        tracing::info!("{}: synchronized {}", si, published);
        Ok(SynchronizeOutcome::Applied)
    }

    /// Write peer-sent bytes directly; `None` if there are none or the write failed
    fn persist_bytes(&self, payload: Option<&MsPayload>) -> Option<Bytes> {
        let body = payload?.get(REVS_SMAP_TAG)?;
        match persist::save(&self.fpath, body, &self.opts) {
            Ok(()) => Some(body.clone()),
            Err(e) => {
                tracing::warn!("failed to persist received cluster map bytes: {}", e);
                None
            }
        }
    }

    /// Run a local cluster map transaction
    ///
    /// Under the lock: clone the current map, run `pre` (or apply the
    /// intent), validate, persist, publish, run `post`. After the lock: run
    /// `final`. Nothing is published if `pre`, validation or persistence
    /// fails. The committed
    /// version is always greater than the one it replaces.
    pub async fn modify(&self, ctx: &mut SmapModifier) -> Result<Arc<Smap>> {
        let committed = {
            let mut imm_size = self.mu.lock().await;
            let current = self.current();
            ctx.smap = Some(Arc::clone(&current));

            let mut clone = (*current).clone();
            match ctx.take_pre() {
                Some(pre) => pre(ctx, &mut clone)?,
                None => ctx.apply_intent(&mut clone)?,
            }
            if clone.version() <= current.version() {
                clone.version = current.version() + 1;
            }
            if let Err(e) = clone.validate() {
                tracing::error!("{}: refusing to commit {}: {}", ctx.msg, clone, e);
                return Err(e);
            }

            let persisted = persist::encode(&clone, *imm_size).and_then(|body| {
                *imm_size = (*imm_size).max(body.len());
                persist::save(&self.fpath, &body, &self.opts)?;
                Ok(body)
            });
            match persisted {
                Ok(body) => clone.set_encoded(body),
                Err(e) => {
                    return Err(Error::FailedToPersist {
                        what: clone.to_string(),
                        source: Box::new(e),
                    })
                }
            }

            let committed = self.put(clone).await;
            tracing::debug!("committed {} ({})", committed, ctx.msg);
            if let Some(post) = ctx.take_post() {
                post(ctx, &committed);
            }
            committed
        };

        if let Some(fin) = ctx.take_final() {
            fin(ctx, &committed);
        }
        Ok(committed)
    }
}
