//! Pending transactions awaiting block inclusion, deduplicated by signature.
//!
//! Unlike a fee-rate-ordered Bitcoin-style pool, admission here is purely
//! first-writer-wins per signature (§4.8 step 3); fee-based ordering, if
//! any, is [`crate::block_factory::Assembly`]'s concern at drain time.

use std::collections::HashMap;

use crate::block::Block;
use crate::error::MempoolError;
use crate::transaction::Transaction;

pub struct Mempool {
    capacity: usize,
    entries: HashMap<String, Transaction>,
}

impl Mempool {
    pub fn new(capacity: usize) -> Self {
        Mempool { capacity, entries: HashMap::new() }
    }

    pub fn insert(&mut self, tx: Transaction) -> Result<(), MempoolError> {
        if self.entries.contains_key(&tx.id) {
            return Err(MempoolError::AlreadyExists);
        }
        if self.entries.len() >= self.capacity {
            return Err(MempoolError::PoolFull);
        }
        self.entries.insert(tx.id.clone(), tx);
        Ok(())
    }

    pub fn get(&self, signature: &str) -> Option<&Transaction> {
        self.entries.get(signature)
    }

    pub fn remove(&mut self, signature: &str) -> Option<Transaction> {
        self.entries.remove(signature)
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.entries.contains_key(signature)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every pending transaction, leaving the pool empty. The caller (block
    /// assembly) owns deciding which survive.
    pub fn drain(&mut self) -> Vec<Transaction> {
        self.entries.drain().map(|(_, tx)| tx).collect()
    }

    /// Drop any entry whose signature now appears in a committed block.
    pub fn remove_confirmed(&mut self, block: &Block) {
        for tx in &block.transactions {
            self.entries.remove(&tx.id);
        }
    }
}
