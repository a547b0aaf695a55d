//! Append-only ordered log of blocks, keyed by height and hash (§4.6).

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::block::Block;
use crate::error::ChainStoreError;
use crate::transaction::Transaction;

/// Append-only block log. Implementors own the single-writer discipline
/// described in the concurrency model; `append` itself takes `&self` so a
/// concrete store can guard its own mutable state (e.g. with an internal
/// lock or a RocksDB write batch).
pub trait BlockStore: Send + Sync {
    /// Accepted iff `block.prev_hash` equals the current tip's hash, or the
    /// block has index 0 and the store is empty.
    fn append(&self, block: Block) -> Result<(), ChainStoreError>;

    fn tip(&self) -> Option<Block>;

    /// Height of the tip, or `None` if the store is empty.
    fn height(&self) -> Option<u64> {
        self.tip().map(|b| b.index)
    }

    fn by_index(&self, index: u64) -> Option<Block>;

    fn by_hash(&self, hash: &str) -> Option<Block>;

    /// Blocks with `lo <= index < hi`, in ascending order unless `reverse`.
    fn range(&self, lo: u64, hi: u64, reverse: bool) -> Vec<Block>;

    fn tx_by_id(&self, id: &str) -> Option<(Block, Transaction)>;

    /// `true` iff some committed transaction already spends `input_id` under
    /// `public_key` (including via an external input).
    fn contains_input(&self, input_id: &str, public_key: &str) -> bool;
}

/// Reference implementation used by core-level tests and as a starting
/// point for an embedding crate that hasn't wired up real persistence yet.
#[derive(Default)]
pub struct InMemoryBlockStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    blocks: Vec<Block>,
    index_by_hash: HashMap<String, usize>,
}

impl InMemoryBlockStore {
    pub fn new() -> Self {
        InMemoryBlockStore::default()
    }
}

impl BlockStore for InMemoryBlockStore {
    fn append(&self, block: Block) -> Result<(), ChainStoreError> {
        let mut inner = self.inner.write();
        let expected_index = inner.blocks.len() as u64;
        if block.index != expected_index {
            return Err(ChainStoreError::HeightMismatch { expected: expected_index, got: block.index });
        }
        let expected_prev = inner.blocks.last().map(|b| b.hash.as_str()).unwrap_or("");
        if block.index != 0 && block.prev_hash != expected_prev {
            return Err(ChainStoreError::OrphanBlock {
                got: block.prev_hash.clone(),
                expected: expected_prev.to_string(),
            });
        }
        if inner.index_by_hash.contains_key(&block.hash) {
            return Err(ChainStoreError::DuplicateBlock(block.index));
        }
        inner.index_by_hash.insert(block.hash.clone(), inner.blocks.len());
        inner.blocks.push(block);
        Ok(())
    }

    fn tip(&self) -> Option<Block> {
        self.inner.read().blocks.last().cloned()
    }

    fn by_index(&self, index: u64) -> Option<Block> {
        self.inner.read().blocks.get(index as usize).cloned()
    }

    fn by_hash(&self, hash: &str) -> Option<Block> {
        let inner = self.inner.read();
        inner.index_by_hash.get(hash).and_then(|&i| inner.blocks.get(i).cloned())
    }

    fn range(&self, lo: u64, hi: u64, reverse: bool) -> Vec<Block> {
        let inner = self.inner.read();
        let mut out: Vec<Block> = inner
            .blocks
            .iter()
            .filter(|b| b.index >= lo && b.index < hi)
            .cloned()
            .collect();
        if reverse {
            out.reverse();
        }
        out
    }

    fn tx_by_id(&self, id: &str) -> Option<(Block, Transaction)> {
        let inner = self.inner.read();
        for block in inner.blocks.iter() {
            if let Some(tx) = block.transactions.iter().find(|t| t.hash == id) {
                return Some((block.clone(), tx.clone()));
            }
        }
        None
    }

    fn contains_input(&self, input_id: &str, public_key: &str) -> bool {
        let inner = self.inner.read();
        for block in inner.blocks.iter() {
            for tx in &block.transactions {
                for input in &tx.inputs {
                    if input.id == input_id && input.owning_public_key(&tx.public_key) == public_key {
                        return true;
                    }
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::max_target;

    fn genesis() -> Block {
        Block {
            version: 1,
            time: "100".into(),
            index: 0,
            public_key: "pk".into(),
            prev_hash: String::new(),
            nonce: "0".into(),
            transactions: vec![],
            hash: "hash0".into(),
            merkle_root: String::new(),
            special_min: false,
            target: max_target(),
            header: String::new(),
            signature: String::new(),
        }
    }

    fn child_of(parent: &Block) -> Block {
        let mut b = genesis();
        b.index = parent.index + 1;
        b.prev_hash = parent.hash.clone();
        b.hash = format!("hash{}", b.index);
        b
    }

    #[test]
    fn appends_genesis_then_child() {
        let store = InMemoryBlockStore::new();
        let g = genesis();
        store.append(g.clone()).unwrap();
        let c = child_of(&g);
        store.append(c.clone()).unwrap();
        assert_eq!(store.tip().unwrap().hash, c.hash);
        assert_eq!(store.height(), Some(1));
    }

    #[test]
    fn rejects_block_with_wrong_prev_hash() {
        let store = InMemoryBlockStore::new();
        store.append(genesis()).unwrap();
        let mut bad = child_of(&genesis());
        bad.prev_hash = "wrong".into();
        assert!(store.append(bad).is_err());
    }

    #[test]
    fn rejects_duplicate_genesis() {
        let store = InMemoryBlockStore::new();
        store.append(genesis()).unwrap();
        assert!(store.append(genesis()).is_err());
    }

    #[test]
    fn by_index_and_by_hash_agree() {
        let store = InMemoryBlockStore::new();
        let g = genesis();
        store.append(g.clone()).unwrap();
        assert_eq!(store.by_index(0).unwrap().hash, g.hash);
        assert_eq!(store.by_hash(&g.hash).unwrap().index, 0);
    }

    #[test]
    fn range_respects_reverse_flag() {
        let store = InMemoryBlockStore::new();
        let g = genesis();
        store.append(g.clone()).unwrap();
        let c1 = child_of(&g);
        store.append(c1.clone()).unwrap();
        let c2 = child_of(&c1);
        store.append(c2).unwrap();

        let ascending = store.range(0, 3, false);
        assert_eq!(ascending.iter().map(|b| b.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        let descending = store.range(0, 3, true);
        assert_eq!(descending.iter().map(|b| b.index).collect::<Vec<_>>(), vec![2, 1, 0]);
    }
}
