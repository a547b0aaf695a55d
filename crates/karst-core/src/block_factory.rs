//! Candidate block assembly and proof-of-work search (§4.8).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use rust_decimal::Decimal;

use crate::address::p2pkh_from_pubkey_hex;
use crate::chain_params::{self, version_for_height, Network, RETARGET_PERIOD};
use crate::decimal::quantize_eight;
use crate::difficulty::DifficultyEngine;
use crate::error::{BlockError, TransactionError};
use crate::fastgraph::FastGraph;
use crate::hash_engine::{self, HeaderFields};
use crate::target::Target;
use crate::transaction::{Transaction, TxOutput};
use crate::utxo_index::UtxoIndex;

use crate::block_store::BlockStore;

/// Result of classifying a mempool entry at ingestion — replaces the
/// exception-driven fallback between a plain transaction and a FastGraph
/// with an explicit tagged variant.
pub enum ParsedCandidate {
    Plain(Transaction),
    Fast(FastGraph),
}

/// An assembled, not-yet-mined candidate block. `header_template` still
/// carries the nonce placeholder; [`crate::block_factory::mine`] fills it
/// in.
#[derive(Clone)]
pub struct AssembledBlock {
    pub version: u32,
    pub time: String,
    pub index: u64,
    pub prev_hash: String,
    pub transactions: Vec<Transaction>,
    pub merkle_root: String,
    pub target: Target,
    pub special_min: bool,
    pub header_template: String,
}

pub struct Assembly<'a> {
    pub store: &'a dyn BlockStore,
    pub utxo: &'a UtxoIndex,
    pub network: Network,
}

impl<'a> Assembly<'a> {
    pub fn new(store: &'a dyn BlockStore, utxo: &'a UtxoIndex, network: Network) -> Self {
        Assembly { store, utxo, network }
    }

    /// Steps 1-8 of §4.8. `candidates` has already been drained from the
    /// mempool by the caller; FastGraph entries are unwrapped to their base
    /// transaction once they re-verify.
    pub fn assemble(
        &self,
        candidates: Vec<ParsedCandidate>,
        producer_public_key: &str,
        time: String,
        special_min: bool,
    ) -> Result<AssembledBlock, BlockError> {
        let tip = self.store.tip();
        let index = tip.as_ref().map(|b| b.index + 1).unwrap_or(0);
        let prev_hash = tip.as_ref().map(|b| b.hash.clone()).unwrap_or_default();
        let version = version_for_height(index);

        let mut seen_signatures: HashSet<String> = HashSet::new();
        let mut unspent_memo: HashMap<String, Vec<crate::utxo_index::UnspentEntry>> = HashMap::new();
        let mut reserved: HashMap<String, HashSet<String>> = HashMap::new();
        let mut accepted: Vec<Transaction> = Vec::new();
        let mut fees = Decimal::ZERO;

        for candidate in candidates {
            let tx = match self.admit(candidate, index) {
                Ok(tx) => tx,
                Err(reason) => {
                    tracing::debug!(%reason, "dropping mempool candidate from assembly");
                    continue;
                }
            };

            if !seen_signatures.insert(tx.id.clone()) {
                continue;
            }

            if !self.inputs_sufficient(&tx, &mut unspent_memo, &mut reserved) {
                continue;
            }

            fees += tx.fee;
            accepted.push(tx);
        }

        let fees = quantize_eight(fees);
        let reward = chain_params::block_reward(index);
        let coinbase_value = quantize_eight(reward + fees);
        let producer_address =
            p2pkh_from_pubkey_hex(producer_public_key).map_err(|_| BlockError::InvalidSignature)?;

        let mut coinbase = Transaction {
            public_key: producer_public_key.to_string(),
            fee: Decimal::ZERO,
            hash: String::new(),
            relationship: None,
            dh_public_key: None,
            rid: None,
            inputs: Vec::new(),
            outputs: vec![TxOutput { to: producer_address, value: coinbase_value }],
            id: String::new(),
            coinbase: true,
        };
        coinbase.hash = coinbase.canonical_hash();

        let mut transactions = accepted;
        transactions.push(coinbase);

        let hashes: Vec<String> = transactions.iter().map(|t| t.hash.clone()).collect();
        let merkle_root = hash_engine::merkle_root(&hashes);

        let difficulty = DifficultyEngine::new(self.store, self.network);
        let candidate_time: i64 = time.parse().unwrap_or(0);
        let target = difficulty.target_for_height(index, candidate_time)?;

        let fields = HeaderFields {
            version,
            time: &time,
            public_key_hex: producer_public_key,
            index,
            prev_hash: &prev_hash,
            special_min,
            target: &target,
            merkle_root: &merkle_root,
        };
        let header_template = hash_engine::build_header_template(&fields);

        Ok(AssembledBlock {
            version,
            time,
            index,
            prev_hash,
            transactions,
            merkle_root,
            target,
            special_min,
            header_template,
        })
    }

    /// Step 2: verify signature; if it's a relationship transaction, bound
    /// its referenced inputs to [`RETARGET_PERIOD`] blocks behind the tip.
    /// On exception (the source's try/except fallback, made explicit),
    /// callers are expected to have already classified fastgraph entries
    /// via [`ParsedCandidate`], so this only validates plain transactions
    /// and unwraps verified fastgraph ones.
    fn admit(&self, candidate: ParsedCandidate, height: u64) -> Result<Transaction, TransactionError> {
        match candidate {
            ParsedCandidate::Plain(tx) => {
                tx.verify()?;
                if tx.relationship.is_some() {
                    if let Some((index, oldest)) = self.oldest_referenced_height(&tx) {
                        if height.saturating_sub(oldest) > RETARGET_PERIOD {
                            return Err(TransactionError::StaleInput { index });
                        }
                    }
                }
                Ok(tx)
            }
            ParsedCandidate::Fast(fg) => {
                fg.verify().map_err(|_| TransactionError::BadSignature)?;
                Ok(fg.into_transaction())
            }
        }
    }

    /// The input whose referenced transaction is deepest in the chain, with
    /// its height, if any input resolves to a committed block.
    fn oldest_referenced_height(&self, tx: &Transaction) -> Option<(usize, u64)> {
        tx.inputs
            .iter()
            .enumerate()
            .filter_map(|(index, i)| self.store.tx_by_id(&i.id).map(|(b, _)| (index, b.index)))
            .min_by_key(|&(_, height)| height)
    }

    /// Step 4: resolve each input's owning address and unspent set
    /// (memoized per address within this assembly), reject on unknown or
    /// intra-block-reused inputs, and reject if the referenced inputs don't
    /// cover the transaction's outputs plus fee (data-model invariant: Σ
    /// outputs + fee ≤ Σ referenced input values).
    fn inputs_sufficient(
        &self,
        tx: &Transaction,
        unspent_memo: &mut HashMap<String, Vec<crate::utxo_index::UnspentEntry>>,
        reserved: &mut HashMap<String, HashSet<String>>,
    ) -> bool {
        let mut input_value = Decimal::ZERO;

        for input in &tx.inputs {
            let owner_pk = input.owning_public_key(&tx.public_key);
            let owner_address = match p2pkh_from_pubkey_hex(owner_pk) {
                Ok(a) => a,
                Err(_) => return false,
            };

            if reserved.entry(owner_address.clone()).or_default().contains(&input.id) {
                return false;
            }

            let unspent = unspent_memo
                .entry(owner_address.clone())
                .or_insert_with(|| self.utxo.unspent_outputs(&owner_address));
            match unspent.iter().find(|e| e.txn_id == input.id) {
                Some(entry) => input_value += entry.value,
                None => return false,
            }
        }

        if quantize_eight(tx.total_output_value() + tx.fee) > quantize_eight(input_value) {
            return false;
        }

        for input in &tx.inputs {
            let owner_pk = input.owning_public_key(&tx.public_key);
            if let Ok(owner_address) = p2pkh_from_pubkey_hex(owner_pk) {
                reserved.entry(owner_address).or_default().insert(input.id.clone());
            }
        }
        true
    }
}

pub struct MineResult {
    pub nonce: String,
    pub hash: String,
}

/// Walk nonce in `[lo, hi)`, substituting into `header_template` and
/// double-hashing; returns the first nonce that meets `target` (or the
/// first nonce at all, if `special_min`), or the lowest hash seen if the
/// range is exhausted without success.
pub fn mine(header_template: &str, target: &Target, lo: u64, hi: u64, special_min: bool) -> MineResult {
    let mut best: Option<(u64, String)> = None;

    for nonce in lo..hi {
        let nonce_str = nonce.to_string();
        let header = hash_engine::substitute_nonce(header_template, &nonce_str);
        let hash = hash_engine::header_hash_hex(&header);

        if special_min || hash_engine::meets_target(&hash, target) {
            return MineResult { nonce: nonce_str, hash };
        }

        let is_better = match (&best, Target::from_hash_hex(&hash)) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some((_, best_hash)), Some(candidate)) => {
                Target::from_hash_hex(best_hash).map(|b| candidate < b).unwrap_or(false)
            }
        };
        if is_better {
            best = Some((nonce, hash));
        }
    }

    match best {
        Some((nonce, hash)) => MineResult { nonce: nonce.to_string(), hash },
        None => MineResult { nonce: lo.to_string(), hash: String::new() },
    }
}

/// As [`mine`], but checked against `cancel` every `chunk` nonces so a
/// dedicated mining thread can be abandoned on a new tip. Returns `None`
/// if cancelled before any nonce succeeded.
pub fn mine_cancellable(
    header_template: &str,
    target: &Target,
    lo: u64,
    hi: u64,
    special_min: bool,
    chunk: u64,
    cancel: &AtomicBool,
) -> Option<MineResult> {
    let mut start = lo;
    while start < hi {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        let end = (start + chunk).min(hi);
        for nonce in start..end {
            let nonce_str = nonce.to_string();
            let header = hash_engine::substitute_nonce(header_template, &nonce_str);
            let hash = hash_engine::header_hash_hex(&header);
            if special_min || hash_engine::meets_target(&hash, target) {
                return Some(MineResult { nonce: nonce_str, hash });
            }
        }
        start = end;
    }
    None
}
