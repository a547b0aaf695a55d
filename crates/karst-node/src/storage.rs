//! RocksDB-backed block log and supporting tables.
//!
//! Column families mirror the abstract document store in the design: one
//! per logical table, each holding bincode-encoded values behind a single
//! `rocksdb::DB` handle. `RocksStore` implements [`karst_core::BlockStore`]
//! directly; [`karst_core::UtxoIndex`] is built on top of it and doesn't
//! know RocksDB exists.

use std::path::Path;
use std::sync::Arc;

use karst_core::block::Block;
use karst_core::block_store::BlockStore;
use karst_core::error::ChainStoreError;
use karst_core::fastgraph::FastGraph;
use karst_core::transaction::Transaction;
use parking_lot::RwLock;
use rocksdb::{ColumnFamilyDescriptor, Options, DB};

const CF_BLOCKS: &str = "cf_blocks";
const CF_HEIGHT_INDEX: &str = "cf_height_index";
const CF_MEMPOOL: &str = "cf_mempool";
const CF_FASTGRAPH: &str = "cf_fastgraph";
const CF_UNSPENT_CACHE: &str = "cf_unspent_cache";
const CF_METADATA: &str = "cf_metadata";

const ALL_CFS: &[&str] = &[CF_BLOCKS, CF_HEIGHT_INDEX, CF_MEMPOOL, CF_FASTGRAPH, CF_UNSPENT_CACHE, CF_METADATA];

const META_TIP_HASH: &[u8] = b"tip_hash";

fn bincode_cfg() -> bincode::config::Configuration {
    bincode::config::standard()
}

fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("rocksdb: {0}")]
    Rocks(#[from] rocksdb::Error),
    #[error("encode: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("decode: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("chain store: {0}")]
    ChainStore(#[from] ChainStoreError),
}

/// Durable, append-only block log plus the mempool/fastgraph/metadata
/// tables a node needs beyond what the core spec calls out. Caches and
/// unspent-index state live in [`karst_core::UtxoIndex`]; this type only
/// ever appends or reads.
pub struct RocksStore {
    db: DB,
    /// Cached tip height, avoiding a metadata round trip on every append.
    /// Guarded separately from the DB's own internal locking because
    /// `append` needs an atomic check-then-write across two column
    /// families.
    write_lock: RwLock<()>,
}

impl RocksStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        Ok(RocksStore { db, write_lock: RwLock::new(()) })
    }

    fn cf(&self, name: &str) -> &rocksdb::ColumnFamily {
        self.db.cf_handle(name).expect("column family missing")
    }

    fn tip_hash(&self) -> Option<String> {
        self.db
            .get_cf(self.cf(CF_METADATA), META_TIP_HASH)
            .ok()
            .flatten()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    fn get_block_by_hash(&self, hash: &str) -> Option<Block> {
        let bytes = self.db.get_cf(self.cf(CF_BLOCKS), hash.as_bytes()).ok().flatten()?;
        bincode::serde::decode_from_slice(&bytes, bincode_cfg()).ok().map(|(b, _)| b)
    }

    fn get_hash_by_height(&self, height: u64) -> Option<String> {
        let bytes = self.db.get_cf(self.cf(CF_HEIGHT_INDEX), height_key(height)).ok().flatten()?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    // --- mempool persistence, so a restart doesn't silently drop pending work ---

    pub fn persist_mempool_entry(&self, tx: &Transaction) -> Result<(), StorageError> {
        let bytes = bincode::serde::encode_to_vec(tx, bincode_cfg())?;
        self.db.put_cf(self.cf(CF_MEMPOOL), tx.id.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn remove_mempool_entry(&self, signature: &str) -> Result<(), StorageError> {
        self.db.delete_cf(self.cf(CF_MEMPOOL), signature.as_bytes())?;
        Ok(())
    }

    pub fn load_mempool(&self) -> Result<Vec<Transaction>, StorageError> {
        let mut out = Vec::new();
        let iter = self.db.iterator_cf(self.cf(CF_MEMPOOL), rocksdb::IteratorMode::Start);
        for item in iter {
            let (_, value) = item?;
            let (tx, _): (Transaction, usize) = bincode::serde::decode_from_slice(&value, bincode_cfg())?;
            out.push(tx);
        }
        Ok(out)
    }

    pub fn persist_fastgraph_entry(&self, key: &str, fg: &FastGraph) -> Result<(), StorageError> {
        let bytes = bincode::serde::encode_to_vec(fg, bincode_cfg())?;
        self.db.put_cf(self.cf(CF_FASTGRAPH), key.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn remove_fastgraph_entry(&self, key: &str) -> Result<(), StorageError> {
        self.db.delete_cf(self.cf(CF_FASTGRAPH), key.as_bytes())?;
        Ok(())
    }

    pub fn load_fastgraph_pending(&self) -> Result<Vec<FastGraph>, StorageError> {
        let mut out = Vec::new();
        let iter = self.db.iterator_cf(self.cf(CF_FASTGRAPH), rocksdb::IteratorMode::Start);
        for item in iter {
            let (_, value) = item?;
            let (fg, _): (FastGraph, usize) = bincode::serde::decode_from_slice(&value, bincode_cfg())?;
            out.push(fg);
        }
        Ok(out)
    }
}

impl BlockStore for RocksStore {
    fn append(&self, block: Block) -> Result<(), ChainStoreError> {
        let _guard = self.write_lock.write();

        let current_tip_hash = self.tip_hash();
        let expected_index = current_tip_hash
            .as_ref()
            .and_then(|h| self.get_block_by_hash(h))
            .map(|b| b.index + 1)
            .unwrap_or(0);

        if block.index != expected_index {
            return Err(ChainStoreError::HeightMismatch { expected: expected_index, got: block.index });
        }
        if block.index != 0 {
            let expected_prev = current_tip_hash.unwrap_or_default();
            if block.prev_hash != expected_prev {
                return Err(ChainStoreError::OrphanBlock { got: block.prev_hash.clone(), expected: expected_prev });
            }
        }

        let encoded = bincode::serde::encode_to_vec(&block, bincode_cfg())
            .map_err(|e| ChainStoreError::BlockNotFound(e.to_string()))?;

        let mut batch = rocksdb::WriteBatch::default();
        batch.put_cf(self.cf(CF_BLOCKS), block.hash.as_bytes(), &encoded);
        batch.put_cf(self.cf(CF_HEIGHT_INDEX), height_key(block.index), block.hash.as_bytes());
        batch.put_cf(self.cf(CF_METADATA), META_TIP_HASH, block.hash.as_bytes());

        self.db
            .write(batch)
            .map_err(|e| ChainStoreError::BlockNotFound(e.to_string()))?;
        Ok(())
    }

    fn tip(&self) -> Option<Block> {
        let hash = self.tip_hash()?;
        self.get_block_by_hash(&hash)
    }

    fn by_index(&self, index: u64) -> Option<Block> {
        let hash = self.get_hash_by_height(index)?;
        self.get_block_by_hash(&hash)
    }

    fn by_hash(&self, hash: &str) -> Option<Block> {
        self.get_block_by_hash(hash)
    }

    fn range(&self, lo: u64, hi: u64, reverse: bool) -> Vec<Block> {
        let mut out = Vec::new();
        if reverse {
            let mut h = hi;
            while h > lo {
                h -= 1;
                if let Some(b) = self.by_index(h) {
                    out.push(b);
                }
            }
        } else {
            for h in lo..hi {
                if let Some(b) = self.by_index(h) {
                    out.push(b);
                }
            }
        }
        out
    }

    fn tx_by_id(&self, id: &str) -> Option<(Block, Transaction)> {
        let tip = self.tip()?;
        let mut height = tip.index as i64;
        while height >= 0 {
            if let Some(block) = self.by_index(height as u64) {
                if let Some(tx) = block.transactions.iter().find(|t| t.hash == id) {
                    return Some((block.clone(), tx.clone()));
                }
            }
            height -= 1;
        }
        None
    }

    fn contains_input(&self, input_id: &str, public_key: &str) -> bool {
        let tip = match self.tip() {
            Some(b) => b,
            None => return false,
        };
        let mut height = tip.index as i64;
        while height >= 0 {
            if let Some(block) = self.by_index(height as u64) {
                for tx in &block.transactions {
                    for input in &tx.inputs {
                        if input.id == input_id && input.owning_public_key(&tx.public_key) == public_key {
                            return true;
                        }
                    }
                }
            }
            height -= 1;
        }
        false
    }
}

/// Open `path` and wrap it for sharing across the RPC server and the
/// single chain-extension writer.
pub fn open_shared(path: &Path) -> Result<Arc<RocksStore>, StorageError> {
    Ok(Arc::new(RocksStore::open(path)?))
}
