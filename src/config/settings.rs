use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};
use std::time::Duration;

static DEFAULT_NODE_ADDR: &str = "127.0.0.1:3000";

const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";
const NODE_ID_KEY: &str = "NODE_ID";
const BOOTSTRAP_NODES_KEY: &str = "BOOTSTRAP_NODES";

/// Settings for one network node. Durations are whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_address: String,
    pub node_id: Option<String>,
    pub protocol_version: i32,
    pub max_peers: usize,
    pub bootstrap_nodes: Vec<String>,
    /// Bootstrap stops after this many successful connections
    pub bootstrap_target: usize,
    pub discovery_interval_secs: u64,
    pub maintenance_interval_secs: u64,
    pub health_check_interval_secs: u64,
    pub stale_peer_threshold_secs: u64,
    pub mempool_max_size: usize,
    pub mempool_timeout_secs: u64,
    pub mempool_cleanup_interval_secs: u64,
    pub fee_per_byte: i64,
    pub sync_interval_secs: u64,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            node_address: String::from(DEFAULT_NODE_ADDR),
            node_id: None,
            protocol_version: 1,
            max_peers: 8,
            bootstrap_nodes: vec!["127.0.0.1:3001".to_string(), "127.0.0.1:3002".to_string()],
            bootstrap_target: 2,
            discovery_interval_secs: 30,
            maintenance_interval_secs: 60,
            health_check_interval_secs: 30,
            stale_peer_threshold_secs: 5 * 60,
            mempool_max_size: 1000,
            mempool_timeout_secs: 24 * 60 * 60,
            mempool_cleanup_interval_secs: 10 * 60,
            fee_per_byte: 10,
            sync_interval_secs: 60,
            connect_timeout_ms: 5000,
            io_timeout_ms: 5000,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl NodeConfig {
    /// Defaults with environment overrides applied
    pub fn new() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.apply_env();
        config
    }

    /// Read a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<NodeConfig> {
        let contents = fs::read_to_string(path).map_err(|e| {
            NodeError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&contents)?;
        config.apply_env();
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<NodeConfig> {
        let config: NodeConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(addr) = env::var(NODE_ADDRESS_KEY) {
            self.node_address = addr;
        }
        if let Ok(node_id) = env::var(NODE_ID_KEY) {
            self.node_id = Some(node_id);
        }
        if let Ok(nodes) = env::var(BOOTSTRAP_NODES_KEY) {
            self.bootstrap_nodes = parse_node_list(&nodes);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_peers == 0 {
            return Err(NodeError::Config("max_peers must be positive".to_string()));
        }
        if self.mempool_max_size == 0 {
            return Err(NodeError::Config(
                "mempool_max_size must be positive".to_string(),
            ));
        }
        if self.bootstrap_target == 0 {
            return Err(NodeError::Config(
                "bootstrap_target must be positive".to_string(),
            ));
        }
        self.socket_addr().map(|_| ())
    }

    /// Resolve the node address, accepting host names such as `localhost:3000`
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.node_address
            .to_socket_addrs()
            .map_err(|e| {
                NodeError::Config(format!("Invalid node address {}: {e}", self.node_address))
            })?
            .next()
            .ok_or_else(|| {
                NodeError::Config(format!("Node address {} did not resolve", self.node_address))
            })
    }

    /// Extract node ID from address (e.g., "127.0.0.1:3000" -> "node_3000")
    pub fn node_id(&self) -> String {
        if let Some(id) = &self.node_id {
            return id.clone();
        }
        match self.node_address.rsplit(':').next() {
            Some(port) if !port.is_empty() => format!("node_{port}"),
            _ => "node_default".to_string(),
        }
    }

    /// Replace the port of `node_address`, keeping its host
    pub fn set_port(&mut self, port: u16) {
        let host = self
            .node_address
            .rsplit_once(':')
            .map_or("127.0.0.1", |(host, _)| host);
        self.node_address = format!("{host}:{port}");
    }

    pub fn node_data_dir(&self) -> PathBuf {
        self.data_dir.join(self.node_id())
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn stale_peer_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_peer_threshold_secs)
    }

    pub fn mempool_timeout(&self) -> Duration {
        Duration::from_secs(self.mempool_timeout_secs)
    }

    pub fn mempool_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.mempool_cleanup_interval_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// Split a comma separated address list, dropping blanks
pub fn parse_node_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
