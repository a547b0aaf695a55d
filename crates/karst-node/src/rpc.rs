//! JSON-RPC server for the Karst full node.
//!
//! Uses jsonrpsee 0.24 to expose the external collaborator interface:
//! block templates for mining, submission, balance queries, and
//! transfers. A thin delegate layer only — every method hands off to
//! [`Node`] and maps its errors to JSON-RPC error objects.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use karst_core::crypto::KeyPair;

use crate::node::Node;

/// JSON representation of a mining block template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockTemplateJson {
    pub version: u32,
    pub time: String,
    pub index: u64,
    #[serde(rename = "prevHash")]
    pub prev_hash: String,
    #[serde(rename = "merkleRoot")]
    pub merkle_root: String,
    pub target: String,
    pub special_min: bool,
    pub header: String,
}

/// Result of a mining submission: `{n: "ok"}` on success, `{n: "ko"}` on
/// any rejection, matching the historical mining-pool wire convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitBlockResult {
    pub n: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

fn ok_result(hash: String) -> SubmitBlockResult {
    SubmitBlockResult { n: "ok".to_string(), hash: Some(hash) }
}

fn ko_result() -> SubmitBlockResult {
    SubmitBlockResult { n: "ko".to_string(), hash: None }
}

fn rpc_error(code: i32, msg: impl ToString) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, msg.to_string(), None::<()>)
}

/// The Karst JSON-RPC interface (§6 external collaborator surface).
#[rpc(server)]
pub trait KarstRpc {
    /// Returns a block template paying the node's own configured key,
    /// correlated to `wallet_address` for the later `submitblock` call.
    #[method(name = "getblocktemplate")]
    async fn get_block_template(&self, wallet_address: String) -> Result<BlockTemplateJson, ErrorObjectOwned>;

    /// Submits a found nonce for the template previously handed to
    /// `wallet_address`. Rejects silently (`{n: "ko"}`) rather than
    /// erroring, matching the historical mining submission contract.
    #[method(name = "submitblock")]
    async fn submit_block(&self, nonce: String, wallet_address: String) -> Result<SubmitBlockResult, ErrorObjectOwned>;

    /// Returns the confirmed balance of a P2PKH address.
    #[method(name = "get_balance")]
    async fn get_balance(&self, address: String) -> Result<String, ErrorObjectOwned>;

    /// Returns balances for a batch of addresses in one round trip.
    #[method(name = "get_bulk_payments")]
    async fn get_bulk_payments(&self, addresses: Vec<String>) -> Result<HashMap<String, String>, ErrorObjectOwned>;

    /// Returns the current chain height (tip index + 1).
    #[method(name = "getheight")]
    async fn get_height(&self) -> Result<u64, ErrorObjectOwned>;

    /// Signs and submits a transfer from this node's own configured key.
    #[method(name = "transfer")]
    async fn transfer(&self, to: String, value: String, fee: String) -> Result<String, ErrorObjectOwned>;
}

pub struct RpcServerImpl {
    node: Arc<Node>,
}

impl RpcServerImpl {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl KarstRpcServer for RpcServerImpl {
    async fn get_block_template(&self, _wallet_address: String) -> Result<BlockTemplateJson, ErrorObjectOwned> {
        let (public_key, _) = self
            .node
            .mining_identity()
            .ok_or_else(|| rpc_error(-1, "node has no configured mining key"))?;

        let assembled = self
            .node
            .block_template(&public_key)
            .map_err(|e| rpc_error(-1, e.to_string()))?;

        Ok(BlockTemplateJson {
            version: assembled.version,
            time: assembled.time,
            index: assembled.index,
            prev_hash: assembled.prev_hash,
            merkle_root: assembled.merkle_root,
            target: assembled.target.to_hex_padded(),
            special_min: assembled.special_min,
            header: assembled.header_template,
        })
    }

    async fn submit_block(&self, nonce: String, wallet_address: String) -> Result<SubmitBlockResult, ErrorObjectOwned> {
        let (public_key, private_key) = match self.node.mining_identity() {
            Some(identity) => identity,
            None => return Ok(ko_result()),
        };
        let keypair = match KeyPair::from_secret_hex(&private_key) {
            Ok(kp) => kp,
            Err(_) => return Ok(ko_result()),
        };

        let _ = &wallet_address;
        match self.node.submit_block(&public_key, &nonce, &keypair) {
            Ok(hash) => Ok(ok_result(hash)),
            Err(_) => Ok(ko_result()),
        }
    }

    async fn get_balance(&self, address: String) -> Result<String, ErrorObjectOwned> {
        Ok(self.node.get_balance(&address).to_string())
    }

    async fn get_bulk_payments(&self, addresses: Vec<String>) -> Result<HashMap<String, String>, ErrorObjectOwned> {
        Ok(self
            .node
            .get_bulk_balances(&addresses)
            .into_iter()
            .map(|(addr, balance)| (addr, balance.to_string()))
            .collect())
    }

    async fn get_height(&self) -> Result<u64, ErrorObjectOwned> {
        Ok(self.node.height())
    }

    async fn transfer(&self, to: String, value: String, fee: String) -> Result<String, ErrorObjectOwned> {
        let value = Decimal::from_str(&value).map_err(|_| rpc_error(-22, "invalid value"))?;
        let fee = Decimal::from_str(&fee).map_err(|_| rpc_error(-22, "invalid fee"))?;
        self.node.transfer(&to, value, fee).map_err(|e| rpc_error(-25, e.to_string()))
    }
}

/// Start the JSON-RPC server on `addr`, returning a handle that can be
/// used to stop it.
pub async fn start_rpc_server(addr: &str, node: Arc<Node>) -> std::io::Result<ServerHandle> {
    let server = Server::builder().build(addr).await?;
    let rpc_impl = RpcServerImpl::new(node);
    let handle = server.start(rpc_impl.into_rpc());
    Ok(handle)
}
