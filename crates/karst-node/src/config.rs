//! Process-wide node configuration.
//!
//! Replaces the config-as-global-singleton pattern: callers build one
//! `NodeConfig` and thread it through, rather than reaching for a shared
//! `BU`-style handle (see the design notes on the process-wide singleton).

use std::path::PathBuf;

use karst_core::chain_params::Network;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub network: Network,
    pub data_dir: PathBuf,
    pub rpc_bind: String,
    pub rpc_port: u16,
    /// Block producer's public key (hex), used as the coinbase destination
    /// when this node mines. `None` for a read-only node.
    pub public_key: Option<String>,
    /// Matching private key (hex), needed to sign mined blocks.
    pub private_key: Option<String>,
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("karst");
        NodeConfig {
            network: Network::Mainnet,
            data_dir,
            rpc_bind: "127.0.0.1".to_string(),
            rpc_port: 7854,
            public_key: None,
            private_key: None,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db")
    }

    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_bind, self.rpc_port)
    }
}
