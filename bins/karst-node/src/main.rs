//! Karst full node binary.
//!
//! Starts a full node with RocksDB storage and a JSON-RPC server. Mines
//! new blocks when a signing key is configured; otherwise runs read-only,
//! serving chain queries and relaying submitted transactions.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use karst_core::chain_params::Network;
use karst_node_lib::{start_rpc_server, Node, NodeConfig};
use tracing::{error, info};

/// Karst full node.
#[derive(Parser, Debug)]
#[command(name = "karst-node", version, about = "Karst full node with RocksDB storage and JSON-RPC server")]
struct Args {
    /// Data directory for blockchain storage.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// RPC server bind address.
    #[arg(long, default_value = "127.0.0.1")]
    rpc_bind: String,

    /// RPC server port.
    #[arg(long, default_value_t = 7854)]
    rpc_port: u16,

    /// Mining public key (hex). Block rewards are paid here when set.
    #[arg(long)]
    public_key: Option<String>,

    /// Mining private key (hex), matching `public_key`. Required to sign
    /// mined blocks; without it the node runs relay-only.
    #[arg(long)]
    private_key: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format ("text" or "json").
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Connect to the public test network (testnet) instead of mainnet.
    #[arg(long, conflicts_with = "regnet")]
    testnet: bool,

    /// Run in local regression-test mode (regnet); intended for
    /// development, not for production chain state.
    #[arg(long, conflicts_with = "testnet")]
    regnet: bool,
}

impl Args {
    /// Convert CLI args into a NodeConfig.
    fn into_config(self) -> (NodeConfig, String) {
        let network = if self.regnet {
            Network::Regnet
        } else if self.testnet {
            Network::Testnet
        } else {
            Network::Mainnet
        };

        let default_data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("karst");
        let data_dir = self.data_dir.unwrap_or(default_data_dir);

        let config = NodeConfig {
            network,
            data_dir,
            rpc_bind: self.rpc_bind,
            rpc_port: self.rpc_port,
            public_key: self.public_key,
            private_key: self.private_key,
            log_level: self.log_level,
        };

        (config, self.log_format)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let (config, log_format) = args.into_config();

    init_logging(&config.log_level, &log_format);

    info!("Karst full node v{}", env!("CARGO_PKG_VERSION"));
    info!("network: {:?}", config.network);
    info!("data_dir: {:?}", config.data_dir);
    info!("rpc_addr: {}", config.rpc_addr());
    info!("mining: {}", config.public_key.is_some());

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!("failed to create data_dir: {}", e);
        process::exit(1);
    }

    let node = match Node::new(config.clone()).await {
        Ok(n) => n,
        Err(e) => {
            error!("failed to start node: {}", e);
            process::exit(1);
        }
    };

    info!("node initialized");

    if let Ok((height, hash)) = node.chain_tip() {
        info!("chain_tip: height={} hash={}", height, hash);
    }

    let rpc_handle = match start_rpc_server(&config.rpc_addr(), Arc::new(node.clone())).await {
        Ok(handle) => {
            info!("RPC server listening on {}", config.rpc_addr());
            handle
        }
        Err(e) => {
            error!("failed to start RPC server: {}", e);
            process::exit(1);
        }
    };

    info!("karst-node running (Ctrl+C to stop)");

    let shutdown_signal = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
        info!("received Ctrl+C, shutting down...");
    };

    tokio::select! {
        _ = node.run() => {
            info!("node event loop exited");
        }
        _ = shutdown_signal => {
            info!("shutdown signal received");
        }
    }

    rpc_handle.stop().ok();
    info!("RPC server stopped");
    info!("karst-node shutdown complete");
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output suitable for log
/// aggregation; any other value defaults to human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry().with(filter).with(fmt::layer().json()).init();
    } else {
        tracing_subscriber::registry().with(filter).with(fmt::layer().with_target(true).with_level(true)).init();
    }
}
