//! ClusterMap Error Types

use thiserror::Error;

/// Result type alias for ClusterMap operations
pub type Result<T> = std::result::Result<T, Error>;

/// ClusterMap error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Cluster map errors
    #[error("Invalid cluster map: {0}")]
    InvalidSmap(String),

    /// Two valid maps that originate from different clusters
    #[error("Cluster integrity error: {caller}: cluster maps have different UUIDs: local [{local}] vs [{remote}]")]
    UuidMismatch {
        caller: String,
        local: String,
        remote: String,
    },

    #[error("{node}: attempt to downgrade cluster map {current} to {received}")]
    Downgrade {
        node: String,
        current: String,
        received: String,
    },

    #[error("Duplicate node: {new} conflicts with {existing}")]
    DuplicateNode { new: String, existing: String },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    // Persistence errors
    #[error("Failed to persist {what}: {source}")]
    FailedToPersist {
        what: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Metadata corrupted: {0}")]
    MetaCorrupted(String),

    #[error("Persistent cluster map invalid: {0}")]
    StateCorrupted(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Listener errors
    #[error("Listener already registered: {0}")]
    ListenerExists(String),

    #[error("Listener not registered: {0}")]
    ListenerNotFound(String),

    // Rebalance collaborator errors
    #[error("Rebalance error: {0}")]
    Rebalance(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Expected under concurrent updates; callers log it and move on
    pub fn is_benign(&self) -> bool {
        matches!(self, Error::Downgrade { .. })
    }

    /// Check if this error means two nodes disagree on cluster identity
    pub fn is_cluster_integrity(&self) -> bool {
        matches!(self, Error::UuidMismatch { .. })
    }

    /// Check if this error is a missing file (normal at cluster genesis)
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            Error::FailedToPersist { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

/// Abort on a broken invariant.
///
/// These are bugs (corrupted input that upstream layers must have filtered),
/// never runtime conditions, so they are not returned as [`Error`].
#[track_caller]
pub fn invariant_violated(msg: impl std::fmt::Display) -> ! {
    panic!("invariant violated: {}", msg)
}
