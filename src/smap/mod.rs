//! Cluster Map
//!
//! The versioned membership map (proxies, targets, primary) and the owner
//! that persists, publishes and announces it.

mod ic;
mod listeners;
mod modifier;
mod owner;
mod snapshot;

use std::collections::HashMap;

use bytes::Bytes;

pub use listeners::{SmapListener, SmapListeners};
pub use modifier::{actions, ActionMsg, ModifyIntent, PostFn, PreFn, SmapModifier};
pub use owner::{SmapOwner, SynchronizeOutcome};
pub use snapshot::Smap;

/// Maximum number of Information Committee members
pub const DEFAULT_IC_SIZE: usize = 3;

/// File name of the persisted cluster map
pub const SMAP_FNAME: &str = "Smap";

/// Key of the encoded cluster map in a metasync payload
pub const REVS_SMAP_TAG: &str = "Smap";

/// Pre-encoded metadata sent along with a cluster map update, by tag
pub type MsPayload = HashMap<String, Bytes>;
