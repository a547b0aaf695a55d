//! Karst standalone miner: RPC-driven nonce search.
//!
//! Connects to a karst-node RPC server, fetches block templates, searches
//! for a nonce satisfying the template's target, and submits the result.
//! Mining itself is plain CPU double-SHA-256 — no external PoW library.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use karst_core::block_factory::mine_cancellable;
use karst_core::target::Target;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// CLI arguments for the miner.
#[derive(Debug, Parser)]
#[command(name = "karst-miner", about = "Karst standalone miner", long_about = None)]
struct Args {
    /// RPC server endpoint.
    #[arg(long, default_value = "http://127.0.0.1:7854")]
    rpc_endpoint: String,

    /// Wallet address correlated with the fetched template and echoed back
    /// on submission.
    #[arg(long)]
    wallet_address: String,

    /// Number of mining threads.
    #[arg(long, default_value = "1")]
    threads: usize,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// JSON representation of a mining block template, mirroring the
/// `getblocktemplate` wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlockTemplateJson {
    version: u32,
    time: String,
    index: u64,
    #[serde(rename = "prevHash")]
    prev_hash: String,
    #[serde(rename = "merkleRoot")]
    merkle_root: String,
    target: String,
    special_min: bool,
    header: String,
}

/// Result of a mining submission: `{n: "ok", hash}` or `{n: "ko"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SubmitBlockResult {
    n: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
}

/// Statistics tracker for mining.
struct MiningStats {
    blocks_found: AtomicU64,
    hashes_computed: AtomicU64,
    start_time: Instant,
}

impl MiningStats {
    fn new() -> Self {
        Self { blocks_found: AtomicU64::new(0), hashes_computed: AtomicU64::new(0), start_time: Instant::now() }
    }

    fn increment_hashes(&self, count: u64) {
        self.hashes_computed.fetch_add(count, Ordering::Relaxed);
    }

    fn increment_blocks(&self) {
        self.blocks_found.fetch_add(1, Ordering::Relaxed);
    }

    fn hashrate(&self) -> f64 {
        let hashes = self.hashes_computed.load(Ordering::Relaxed) as f64;
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 { hashes / elapsed } else { 0.0 }
    }

    fn blocks_found(&self) -> u64 {
        self.blocks_found.load(Ordering::Relaxed)
    }
}

/// Fetch a block template from the RPC server.
async fn fetch_template(client: &HttpClient, wallet_address: &str) -> Result<BlockTemplateJson> {
    let mut params = ArrayParams::new();
    params.insert(wallet_address).ok();
    let response: BlockTemplateJson =
        client.request("getblocktemplate", params).await.context("failed to fetch block template")?;
    Ok(response)
}

/// Submit a found nonce for the template previously fetched.
async fn submit_block(client: &HttpClient, nonce: &str, wallet_address: &str) -> Result<SubmitBlockResult> {
    let mut params = ArrayParams::new();
    params.insert(nonce).ok();
    params.insert(wallet_address).ok();
    let result: SubmitBlockResult =
        client.request("submitblock", params).await.context("failed to submit block")?;
    Ok(result)
}

/// Main mining loop for a single thread. Each pass fetches the current
/// template, searches a bounded nonce range, and submits on success;
/// cancellable between chunks so a stale template is abandoned promptly.
async fn mining_worker(
    client: HttpClient,
    wallet_address: String,
    stats: Arc<MiningStats>,
    running: Arc<AtomicBool>,
) {
    let mut last_template_index = u64::MAX;

    while running.load(Ordering::Relaxed) {
        let template = match fetch_template(&client, &wallet_address).await {
            Ok(t) => t,
            Err(e) => {
                error!("failed to fetch template: {e}");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        if template.index != last_template_index {
            info!("new template at height {} special_min={}", template.index, template.special_min);
            last_template_index = template.index;
        }

        let target = match Target::from_hex(&template.target) {
            Some(t) => t,
            None => {
                error!("invalid target in template");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        let cancel = AtomicBool::new(false);
        let header = template.header.clone();
        let special_min = template.special_min;
        let chunk = 100_000u64;
        let found = tokio::task::spawn_blocking(move || {
            mine_cancellable(&header, &target, 0, 2_000_000, special_min, chunk, &cancel)
        })
        .await
        .ok()
        .flatten();

        stats.increment_hashes(2_000_000);

        match found {
            Some(result) => {
                info!("found candidate nonce={} hash={}", result.nonce, result.hash);
                match submit_block(&client, &result.nonce, &wallet_address).await {
                    Ok(SubmitBlockResult { n, hash }) if n == "ok" => {
                        info!("block accepted: {}", hash.unwrap_or_default());
                        stats.increment_blocks();
                    }
                    Ok(_) => {
                        warn!("block submission rejected");
                    }
                    Err(e) => {
                        error!("failed to submit block: {e}");
                    }
                }
                last_template_index = u64::MAX; // force a fresh template next pass
            }
            None => {
                // Exhausted this range without success; re-fetch and retry.
            }
        }

        tokio::task::yield_now().await;
    }

    info!("mining worker shutting down");
}

/// Log mining statistics periodically.
async fn stats_logger(stats: Arc<MiningStats>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_secs(30)).await;
        info!("hashrate: {:.2} H/s | blocks found: {}", stats.hashrate(), stats.blocks_found());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    info!("karst-miner v{}", env!("CARGO_PKG_VERSION"));
    info!("RPC endpoint: {}", args.rpc_endpoint);
    info!("Wallet address: {}", args.wallet_address);
    info!("Mining threads: {}", args.threads);

    let client = HttpClientBuilder::default().build(&args.rpc_endpoint).context("failed to create RPC client")?;

    let _height: u64 = client.request("getheight", ArrayParams::new()).await.context("failed to connect to RPC server")?;
    info!("connected to RPC server");

    let stats = Arc::new(MiningStats::new());
    let running = Arc::new(AtomicBool::new(true));

    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        warn!("received SIGINT, shutting down...");
        running_clone.store(false, Ordering::Relaxed);
    });

    let stats_clone = Arc::clone(&stats);
    let running_clone = Arc::clone(&running);
    tokio::spawn(stats_logger(stats_clone, running_clone));

    let mut handles = vec![];
    for i in 0..args.threads {
        let client_clone = client.clone();
        let address_clone = args.wallet_address.clone();
        let stats_clone = Arc::clone(&stats);
        let running_clone = Arc::clone(&running);

        handles.push(tokio::spawn(async move {
            info!("starting mining thread {}", i);
            mining_worker(client_clone, address_clone, stats_clone, running_clone).await;
        }));
    }

    for handle in handles {
        handle.await.ok();
    }

    info!("miner shutdown complete");
    Ok(())
}
