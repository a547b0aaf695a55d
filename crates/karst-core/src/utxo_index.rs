//! Derives unspent outputs per address from the block log (§4.5).
//!
//! Implemented as the two-phase scan described in the design: a received
//! scan projects outputs paying an address into a per-address cache, then a
//! spent scan marks the ones later consumed. The scan only walks blocks at
//! or above the address's cached watermark, so repeat queries are
//! incremental.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::address::p2pkh_from_pubkey_hex;
use crate::block_store::BlockStore;
use crate::decimal::quantize_eight;
use crate::transaction::Transaction;

/// A derived, re-derivable fact about one output paying one address.
#[derive(Debug, Clone, PartialEq)]
pub struct UnspentEntry {
    pub address: String,
    pub txn_id: String,
    pub height: u64,
    pub block_hash: String,
    pub spent: bool,
    pub value: Decimal,
}

struct AddressCache {
    watermark: u64,
    /// First public key observed (by height, then transaction index) whose
    /// P2PKH address matches this cache's address — the "reverse public
    /// key" used to find the spend side. Resolved by scan order, not a
    /// hash-set, so the result is deterministic even if a key collision is
    /// later observed.
    reverse_public_key: Option<String>,
    entries: HashMap<String, UnspentEntry>,
}

impl AddressCache {
    fn new() -> Self {
        AddressCache { watermark: 0, reverse_public_key: None, entries: HashMap::new() }
    }
}

pub struct UtxoIndex {
    store: Arc<dyn BlockStore>,
    cache: RwLock<HashMap<String, AddressCache>>,
    /// Input ids locked by a pending, not-yet-confirmed fastgraph spend.
    pending_fastgraph: RwLock<HashSet<String>>,
}

impl UtxoIndex {
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        UtxoIndex { store, cache: RwLock::new(HashMap::new()), pending_fastgraph: RwLock::new(HashSet::new()) }
    }

    /// Received-then-spent scan from `address`'s watermark up to the
    /// current tip, folding new facts into the cache.
    fn refresh(&self, address: &str) {
        let tip_height = match self.store.height() {
            Some(h) => h,
            None => return,
        };

        let watermark = {
            let cache = self.cache.read();
            cache.get(address).map(|c| c.watermark).unwrap_or(0)
        };
        if watermark > tip_height {
            return;
        }

        let blocks = self.store.range(watermark, tip_height + 1, false);

        let mut cache = self.cache.write();
        let entry = cache.entry(address.to_string()).or_insert_with(AddressCache::new);

        // Phase 1: received scan.
        for block in &blocks {
            for tx in &block.transactions {
                if entry.reverse_public_key.is_none() {
                    if let Ok(derived) = p2pkh_from_pubkey_hex(&tx.public_key) {
                        if derived == address {
                            entry.reverse_public_key = Some(tx.public_key.clone());
                        }
                    }
                }
                for output in &tx.outputs {
                    if output.to == address {
                        entry.entries.insert(
                            tx.hash.clone(),
                            UnspentEntry {
                                address: address.to_string(),
                                txn_id: tx.hash.clone(),
                                height: block.index,
                                block_hash: block.hash.clone(),
                                spent: false,
                                value: output.value,
                            },
                        );
                    }
                }
            }
        }

        // Phase 2: spent scan, only possible once a reverse public key is known.
        if let Some(reverse_pk) = entry.reverse_public_key.clone() {
            for block in &blocks {
                for tx in &block.transactions {
                    let spends_as_owner = tx.public_key == reverse_pk
                        || tx.inputs.iter().any(|i| i.owning_public_key(&tx.public_key) == reverse_pk);
                    if !spends_as_owner {
                        continue;
                    }
                    for input in &tx.inputs {
                        if let Some(existing) = entry.entries.get_mut(&input.id) {
                            existing.spent = true;
                        }
                    }
                }
            }
        }

        entry.watermark = tip_height + 1;
    }

    /// Unspent outputs paying `address`, per the scan above. If no reverse
    /// public key has ever been observed, everything received is reported
    /// unspent — no owned key has spent anything yet.
    pub fn unspent_outputs(&self, address: &str) -> Vec<UnspentEntry> {
        self.refresh(address);
        let cache = self.cache.read();
        cache
            .get(address)
            .map(|c| c.entries.values().filter(|e| !e.spent).cloned().collect())
            .unwrap_or_default()
    }

    pub fn balance(&self, address: &str) -> Decimal {
        quantize_eight(self.unspent_outputs(address).iter().map(|e| e.value).sum())
    }

    /// `true` iff some prior input already spends one of `candidate`'s
    /// inputs under the same owning public key, per the committed log.
    /// Hash of the current chain tip, or `None` if the store is empty.
    pub fn tip_hash(&self) -> Option<String> {
        self.store.tip().map(|b| b.hash)
    }

    pub fn is_double_spend(&self, candidate: &Transaction) -> bool {
        candidate.inputs.iter().any(|input| {
            let owner = input.owning_public_key(&candidate.public_key);
            self.store.contains_input(&input.id, owner)
        })
    }

    /// Register input ids as locked by an unconfirmed fastgraph spend, so
    /// `is_fastgraph_locked` reports them unavailable until cleared.
    pub fn lock_fastgraph_inputs(&self, input_ids: impl IntoIterator<Item = String>) {
        let mut pending = self.pending_fastgraph.write();
        pending.extend(input_ids);
    }

    pub fn unlock_fastgraph_inputs(&self, input_ids: &[String]) {
        let mut pending = self.pending_fastgraph.write();
        for id in input_ids {
            pending.remove(id);
        }
    }

    pub fn is_fastgraph_locked(&self, input_id: &str) -> bool {
        self.pending_fastgraph.read().contains(input_id)
    }

    /// Drop cached entries for `address`, forcing a full re-derivation on
    /// the next query (e.g. after a reorg, out of core scope but cheap to
    /// support).
    pub fn invalidate(&self, address: &str) {
        self.cache.write().remove(address);
    }

    pub fn invalidate_all(&self) {
        self.cache.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::block_store::InMemoryBlockStore;
    use crate::crypto::KeyPair;
    use crate::target::max_target;
    use crate::transaction::{TxInput, TxOutput};
    use rust_decimal_macros::dec;

    fn block_with_txs(index: u64, prev_hash: &str, transactions: Vec<Transaction>) -> Block {
        let hashes: Vec<String> = transactions.iter().map(|t| t.hash.clone()).collect();
        let merkle_root = crate::hash_engine::merkle_root(&hashes);
        Block {
            version: 1,
            time: "100".into(),
            index,
            public_key: "producer".into(),
            prev_hash: prev_hash.to_string(),
            nonce: "0".into(),
            transactions,
            hash: format!("blockhash{index}"),
            merkle_root,
            special_min: false,
            target: max_target(),
            header: String::new(),
            signature: String::new(),
        }
    }

    fn coinbase(to: &str, value: Decimal) -> Transaction {
        let mut tx = Transaction {
            public_key: "producer".into(),
            fee: Decimal::ZERO,
            hash: String::new(),
            relationship: None,
            dh_public_key: None,
            rid: None,
            inputs: vec![],
            outputs: vec![TxOutput { to: to.to_string(), value }],
            id: String::new(),
            coinbase: true,
        };
        tx.hash = tx.canonical_hash();
        tx
    }

    fn spend(kp: &KeyPair, input_id: &str, to: &str, value: Decimal, fee: Decimal) -> Transaction {
        let mut tx = Transaction {
            public_key: kp.public_key_hex(),
            fee,
            hash: String::new(),
            relationship: None,
            dh_public_key: None,
            rid: None,
            inputs: vec![TxInput::simple(input_id)],
            outputs: vec![TxOutput { to: to.to_string(), value }],
            id: String::new(),
            coinbase: false,
        };
        tx.hash = tx.canonical_hash();
        tx.id = kp.sign_hex_digest(&tx.hash).unwrap();
        tx
    }

    #[test]
    fn unspent_before_any_spend() {
        let kp = KeyPair::generate();
        let address = p2pkh_from_pubkey_hex(&kp.public_key_hex()).unwrap();
        let store = Arc::new(InMemoryBlockStore::new());
        store.append(block_with_txs(0, "", vec![coinbase(&address, dec!(50))])).unwrap();

        let utxo = UtxoIndex::new(store);
        let outputs = utxo.unspent_outputs(&address);
        assert_eq!(outputs.len(), 1);
        assert_eq!(utxo.balance(&address), dec!(50));
    }

    #[test]
    fn spending_marks_entry_spent_and_credits_recipient() {
        let kp = KeyPair::generate();
        let address = p2pkh_from_pubkey_hex(&kp.public_key_hex()).unwrap();
        let store = Arc::new(InMemoryBlockStore::new());
        let cb = coinbase(&address, dec!(50));
        let cb_id = cb.hash.clone();
        store.append(block_with_txs(0, "", vec![cb])).unwrap();

        let utxo = UtxoIndex::new(Arc::clone(&store) as Arc<dyn BlockStore>);
        assert_eq!(utxo.balance(&address), dec!(50));

        let spend_tx = spend(&kp, &cb_id, "1other", dec!(49), dec!(1));
        let b1 = block_with_txs(1, "blockhash0", vec![spend_tx]);
        store.append(b1).unwrap();

        assert_eq!(utxo.balance(&address), Decimal::ZERO);
    }

    #[test]
    fn no_reverse_key_means_everything_reported_unspent() {
        let store = Arc::new(InMemoryBlockStore::new());
        store.append(block_with_txs(0, "", vec![coinbase("1nobody", dec!(50))])).unwrap();
        let utxo = UtxoIndex::new(store);
        assert_eq!(utxo.unspent_outputs("1nobody").len(), 1);
    }

    #[test]
    fn double_spend_detected_against_committed_log() {
        let kp = KeyPair::generate();
        let address = p2pkh_from_pubkey_hex(&kp.public_key_hex()).unwrap();
        let store = Arc::new(InMemoryBlockStore::new());
        let cb = coinbase(&address, dec!(50));
        let cb_id = cb.hash.clone();
        store.append(block_with_txs(0, "", vec![cb])).unwrap();
        let spend_tx = spend(&kp, &cb_id, "1other", dec!(49), dec!(1));
        store.append(block_with_txs(1, "blockhash0", vec![spend_tx.clone()])).unwrap();

        let utxo = UtxoIndex::new(store);
        assert!(utxo.is_double_spend(&spend_tx));
    }

    #[test]
    fn fastgraph_lock_round_trips() {
        let store = Arc::new(InMemoryBlockStore::new());
        let utxo = UtxoIndex::new(store);
        utxo.lock_fastgraph_inputs(["abc".to_string()]);
        assert!(utxo.is_fastgraph_locked("abc"));
        utxo.unlock_fastgraph_inputs(&["abc".to_string()]);
        assert!(!utxo.is_fastgraph_locked("abc"));
    }
}
