//! Node composition: storage, mempool, assembly, and verification wired
//! together behind one handle shared by the RPC server and the mining
//! loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use karst_core::address::p2pkh_from_pubkey_hex;
use karst_core::block_factory::{mine_cancellable, AssembledBlock, Assembly, ParsedCandidate};
use karst_core::block_store::BlockStore;
use karst_core::block_verifier::BlockVerifier;
use karst_core::chain_params::block_reward;
use karst_core::crypto::KeyPair;
use karst_core::decimal::quantize_eight;
use karst_core::error::{ChainStoreError, CoreError};
use karst_core::hash_engine::{self, HeaderFields};
use karst_core::mempool::Mempool;
use karst_core::transaction::{Transaction, TxInput, TxOutput};
use karst_core::utxo_index::UtxoIndex;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::storage::{self, RocksStore};

/// A block template a miner is currently working against, kept around so
/// the matching `submitblock` call can be checked and assembled without
/// re-running assembly (which would pick different transactions).
struct PendingTemplate {
    assembled: AssembledBlock,
    public_key: String,
}

struct NodeInner {
    config: NodeConfig,
    store: Arc<RocksStore>,
    utxo: UtxoIndex,
    mempool: Mutex<Mempool>,
    templates: Mutex<HashMap<String, PendingTemplate>>,
    mining_cancel: AtomicBool,
}

/// Cheaply cloneable handle to a running node; every clone shares the same
/// storage, mempool, and UTXO index.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    pub async fn new(config: NodeConfig) -> Result<Self, CoreError> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| CoreError::Storage(e.to_string()))?;
        let store = storage::open_shared(&config.db_path()).map_err(|e| CoreError::Storage(e.to_string()))?;

        if store.tip().is_none() {
            bootstrap_genesis(&store)?;
        }

        let utxo = UtxoIndex::new(Arc::clone(&store) as Arc<dyn BlockStore>);
        let mut mempool = Mempool::new(50_000);
        for tx in store.load_mempool().map_err(|e| CoreError::Storage(e.to_string()))? {
            let _ = mempool.insert(tx);
        }

        Ok(Node {
            inner: Arc::new(NodeInner {
                config,
                store,
                utxo,
                mempool: Mutex::new(mempool),
                templates: Mutex::new(HashMap::new()),
                mining_cancel: AtomicBool::new(false),
            }),
        })
    }

    pub fn chain_tip(&self) -> Result<(u64, String), CoreError> {
        self.inner
            .store
            .tip()
            .map(|b| (b.index, b.hash))
            .ok_or_else(|| CoreError::ChainStore(ChainStoreError::EmptyChain))
    }

    pub fn height(&self) -> u64 {
        self.inner.store.height().map(|h| h + 1).unwrap_or(0)
    }

    pub fn get_balance(&self, address: &str) -> Decimal {
        self.inner.utxo.balance(address)
    }

    pub fn get_bulk_balances(&self, addresses: &[String]) -> HashMap<String, Decimal> {
        addresses.iter().map(|a| (a.clone(), self.get_balance(a))).collect()
    }

    /// This node's own mining key pair, if it's configured to produce
    /// blocks rather than just relay.
    pub fn mining_identity(&self) -> Option<(String, String)> {
        match (&self.inner.config.public_key, &self.inner.config.private_key) {
            (Some(pk), Some(sk)) => Some((pk.clone(), sk.clone())),
            _ => None,
        }
    }

    pub fn submit_transaction(&self, tx: Transaction) -> Result<(), CoreError> {
        tx.verify()?;
        if self.inner.utxo.is_double_spend(&tx) {
            return Err(CoreError::ChainStore(ChainStoreError::BlockNotFound(
                "transaction double-spends a committed input".into(),
            )));
        }
        self.inner.store.persist_mempool_entry(&tx).map_err(|e| CoreError::Storage(e.to_string()))?;
        let mut pool = self.inner.mempool.lock();
        pool.insert(tx).map_err(CoreError::from)?;
        Ok(())
    }

    /// Build a candidate block paying `producer_public_key`, remembering it
    /// so a later `submit_block` from the same key can be matched up.
    pub fn block_template(&self, producer_public_key: &str) -> Result<AssembledBlock, CoreError> {
        let candidates: Vec<ParsedCandidate> = {
            let mut pool = self.inner.mempool.lock();
            pool.drain().into_iter().map(ParsedCandidate::Plain).collect()
        };

        let assembly = Assembly::new(self.inner.store.as_ref() as &dyn BlockStore, &self.inner.utxo, self.inner.config.network);
        let time = now_secs().to_string();
        let assembled = assembly.assemble(candidates, producer_public_key, time, false)?;

        let mut templates = self.inner.templates.lock();
        templates.insert(
            producer_public_key.to_string(),
            PendingTemplate { assembled: assembled.clone(), public_key: producer_public_key.to_string() },
        );
        Ok(assembled)
    }

    /// Complete the template previously issued to `producer_public_key`
    /// with a found `nonce`, sign it with `keypair`, verify, and append.
    pub fn submit_block(&self, producer_public_key: &str, nonce: &str, keypair: &KeyPair) -> Result<String, CoreError> {
        if nonce.len() > karst_core::chain_params::MAX_NONCE_LEN {
            return Err(CoreError::Block(karst_core::error::BlockError::NonceTooLong));
        }

        let pending = {
            let mut templates = self.inner.templates.lock();
            templates.remove(producer_public_key).ok_or_else(|| {
                CoreError::ChainStore(ChainStoreError::BlockNotFound("no outstanding template for this key".into()))
            })?
        };

        let header_with_nonce = hash_engine::substitute_nonce(&pending.assembled.header_template, nonce);
        let hash = hash_engine::header_hash_hex(&header_with_nonce);

        let mut block = karst_core::block::Block {
            version: pending.assembled.version,
            time: pending.assembled.time.clone(),
            index: pending.assembled.index,
            public_key: pending.public_key.clone(),
            prev_hash: pending.assembled.prev_hash.clone(),
            nonce: nonce.to_string(),
            transactions: pending.assembled.transactions.clone(),
            hash,
            merkle_root: pending.assembled.merkle_root.clone(),
            special_min: pending.assembled.special_min,
            target: pending.assembled.target.clone(),
            header: pending.assembled.header_template.clone(),
            signature: String::new(),
        };
        block.sign(keypair)?;

        let verifier = BlockVerifier::new(&self.inner.utxo);
        verifier.verify(&block)?;

        self.inner.store.append(block.clone())?;
        self.inner.utxo.invalidate_all();

        let mut pool = self.inner.mempool.lock();
        for tx in &block.transactions {
            pool.remove(&tx.id);
            let _ = self.inner.store.remove_mempool_entry(&tx.id);
        }

        info!(height = block.index, hash = %block.hash, "block committed");
        Ok(block.hash)
    }

    /// Sign and submit a plain P2PKH transfer from this node's configured
    /// key. Selects unspent outputs until the transfer value plus fee is
    /// covered and returns any excess to the sender as a change output.
    pub fn transfer(&self, to: &str, value: Decimal, fee: Decimal) -> Result<String, CoreError> {
        let public_key = self
            .inner
            .config
            .public_key
            .clone()
            .ok_or_else(|| CoreError::Storage("node has no configured signing key".into()))?;
        let private_key = self
            .inner
            .config
            .private_key
            .clone()
            .ok_or_else(|| CoreError::Storage("node has no configured signing key".into()))?;
        let keypair = KeyPair::from_secret_hex(&private_key)?;

        let sender_address = p2pkh_from_pubkey_hex(&public_key)?;
        let unspent = self.inner.utxo.unspent_outputs(&sender_address);

        let target_total = quantize_eight(value + fee);
        let mut selected = Vec::new();
        let mut total = Decimal::ZERO;
        for entry in unspent {
            if total >= target_total {
                break;
            }
            total += entry.value;
            selected.push(entry);
        }
        if total < target_total {
            return Err(CoreError::Transaction(karst_core::error::TransactionError::InsufficientValue {
                have: total.to_string(),
                need: target_total.to_string(),
            }));
        }

        let mut outputs = vec![TxOutput { to: to.to_string(), value: quantize_eight(value) }];
        let change = quantize_eight(total - target_total);
        if change > Decimal::ZERO {
            outputs.push(TxOutput { to: sender_address, value: change });
        }

        let mut tx = Transaction {
            public_key: public_key.clone(),
            fee: quantize_eight(fee),
            hash: String::new(),
            relationship: None,
            dh_public_key: None,
            rid: None,
            inputs: selected.into_iter().map(|e| TxInput::simple(e.txn_id)).collect(),
            outputs,
            id: String::new(),
            coinbase: false,
        };
        tx.hash = tx.canonical_hash();
        tx.id = keypair.sign_hex_digest(&tx.hash)?;

        self.submit_transaction(tx.clone())?;
        Ok(tx.hash)
    }

    /// Background loop: if this node is configured to mine, repeatedly
    /// assemble a template and search for a nonce, cancellable on a new
    /// tip. Runs until the process exits.
    pub async fn run(&self) {
        let (public_key, private_key) = match (&self.inner.config.public_key, &self.inner.config.private_key) {
            (Some(pk), Some(sk)) => (pk.clone(), sk.clone()),
            _ => {
                info!("no signing key configured, running as a relay-only node");
                std::future::pending::<()>().await;
                return;
            }
        };
        let keypair = match KeyPair::from_secret_hex(&private_key) {
            Ok(kp) => kp,
            Err(e) => {
                warn!("invalid private_key, mining disabled: {e}");
                std::future::pending::<()>().await;
                return;
            }
        };

        loop {
            self.inner.mining_cancel.store(false, Ordering::Relaxed);
            let assembled = match self.block_template(&public_key) {
                Ok(a) => a,
                Err(e) => {
                    warn!("block assembly failed: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
            };

            let node = self.clone();
            let public_key_clone = public_key.clone();
            let result = tokio::task::spawn_blocking(move || {
                mine_cancellable(
                    &assembled.header_template,
                    &assembled.target,
                    0,
                    u64::MAX,
                    assembled.special_min,
                    10_000,
                    &node.inner.mining_cancel,
                )
            })
            .await;

            match result {
                Ok(Some(found)) => match self.submit_block(&public_key_clone, &found.nonce, &keypair) {
                    Ok(hash) => info!("mined block {hash}"),
                    Err(e) => warn!("mined block rejected: {e}"),
                },
                Ok(None) => {
                    // Cancelled or exhausted the nonce space; re-assemble on a fresh tip.
                }
                Err(e) => warn!("mining task panicked: {e}"),
            }
        }
    }

    /// Signal any outstanding PoW search to abandon its current range.
    pub fn cancel_mining(&self) {
        self.inner.mining_cancel.store(true, Ordering::Relaxed);
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// The literal genesis block: height 0, single coinbase paying the
/// historical producer key 50 units at max target.
fn bootstrap_genesis(store: &Arc<RocksStore>) -> Result<(), CoreError> {
    let public_key = "03f44c7c4dca3a9204f1ba284d875331894ea8ab5753093be847d798274c6ce570";
    let address = p2pkh_from_pubkey_hex(public_key)?;

    let mut coinbase = Transaction {
        public_key: public_key.to_string(),
        fee: Decimal::ZERO,
        hash: String::new(),
        relationship: None,
        dh_public_key: None,
        rid: None,
        inputs: vec![],
        outputs: vec![TxOutput { to: address, value: block_reward(0) }],
        id: String::new(),
        coinbase: true,
    };
    coinbase.hash = coinbase.canonical_hash();

    let target = karst_core::target::max_target();
    let merkle_root = hash_engine::merkle_root(&[coinbase.hash.clone()]);

    let fields = HeaderFields {
        version: 1,
        time: "1537127756",
        public_key_hex: public_key,
        index: 0,
        prev_hash: "",
        special_min: false,
        target: &target,
        merkle_root: &merkle_root,
    };
    let header = hash_engine::build_header_template(&fields);

    let mut block = karst_core::block::Block {
        version: 1,
        time: "1537127756".into(),
        index: 0,
        public_key: public_key.to_string(),
        prev_hash: String::new(),
        nonce: "0".into(),
        transactions: vec![coinbase],
        hash: String::new(),
        merkle_root,
        special_min: false,
        target,
        header,
        signature: String::new(),
    };
    block.hash = block.recompute_hash();

    store.append(block)?;
    Ok(())
}
