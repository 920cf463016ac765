//! ClusterMap Configuration
//!
//! This module provides configuration structures for a cluster node
//! that owns a copy of the cluster map.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::node::{Node, NodeRole};
use crate::smap::SMAP_FNAME;

/// Main ClusterMap configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterMapConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Metadata persistence configuration
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Change-notification configuration
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier
    pub id: String,

    /// Proxy or target
    #[serde(default = "default_role")]
    pub role: NodeRole,

    /// Hostname advertised to the rest of the cluster
    pub hostname: String,

    /// Public port; control and data networks use the next two ports
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding persisted cluster metadata
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
}

/// Metadata persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Enable LZ4 compression of persisted metadata
    #[serde(default)]
    pub compression: bool,

    /// Store a CRC32 checksum with persisted metadata
    #[serde(default = "default_true")]
    pub checksum: bool,

    /// Use fsync for durability (slower but safer)
    #[serde(default = "default_true")]
    pub fsync: bool,
}

/// Change-notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Capacity of the bounded version queue
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_role() -> NodeRole {
    NodeRole::Proxy
}

fn default_port() -> u16 {
    51080
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/var/lib/clustermap")
}

fn default_true() -> bool {
    true
}

fn default_queue_size() -> usize {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            compression: false,
            checksum: true,
            fsync: true,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ClusterMapConfig {
    /// Configuration for a node with defaults everywhere else
    pub fn for_node(id: impl Into<String>, role: NodeRole, hostname: impl Into<String>, config_dir: PathBuf) -> Self {
        Self {
            node: NodeConfig {
                id: id.into(),
                role,
                hostname: hostname.into(),
                port: default_port(),
                config_dir,
            },
            persistence: PersistenceConfig::default(),
            notifications: NotificationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: ClusterMapConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.node.hostname.is_empty() {
            return Err(crate::Error::Config("node.hostname cannot be empty".into()));
        }

        if self.notifications.queue_size == 0 {
            return Err(crate::Error::Config(
                "notifications.queue_size must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Path of the persisted cluster map
    pub fn smap_path(&self) -> PathBuf {
        self.node.config_dir.join(SMAP_FNAME)
    }

    /// This node's record, as it would join the cluster map
    pub fn local_node(&self) -> Node {
        Node::new(
            self.node.id.clone(),
            self.node.role,
            &self.node.hostname,
            self.node.port,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[node]
id = "p-1"
role = "proxy"
hostname = "10.0.0.1"
port = 8080
config_dir = "/tmp/clustermap"

[persistence]
compression = true

[notifications]
queue_size = 16
"#;

        let config = ClusterMapConfig::from_str(toml).unwrap();
        assert_eq!(config.node.id, "p-1");
        assert_eq!(config.node.role, NodeRole::Proxy);
        assert!(config.persistence.compression);
        assert!(config.persistence.checksum);
        assert_eq!(config.notifications.queue_size, 16);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.smap_path(), PathBuf::from("/tmp/clustermap/Smap"));

        let node = config.local_node();
        assert_eq!(node.public_net.url, "http://10.0.0.1:8080");
    }

    #[test]
    fn test_validate_rejects_empty_id() {
        let toml = r#"
[node]
id = ""
hostname = "h"
"#;
        let err = ClusterMapConfig::from_str(toml).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_defaults() {
        let toml = r#"
[node]
id = "t-1"
role = "target"
hostname = "h"
"#;
        let config = ClusterMapConfig::from_str(toml).unwrap();
        assert_eq!(config.node.port, 51080);
        assert_eq!(config.notifications.queue_size, 8);
        assert!(config.persistence.fsync);
    }
}
