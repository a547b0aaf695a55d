//! Full validation of a block against the prior tip (§4.9).

use rust_decimal::Decimal;

use crate::block::Block;
use crate::chain_params::{block_reward, version_for_height};
use crate::crypto::verify_dual;
use crate::decimal::quantize_eight;
use crate::error::BlockError;
use crate::hash_engine;
use crate::utxo_index::UtxoIndex;

pub struct BlockVerifier<'a> {
    utxo: &'a UtxoIndex,
}

impl<'a> BlockVerifier<'a> {
    pub fn new(utxo: &'a UtxoIndex) -> Self {
        BlockVerifier { utxo }
    }

    /// Steps 1-7 of §4.9. Fails with the first violated invariant; never
    /// mutates the store.
    pub fn verify(&self, block: &Block) -> Result<(), BlockError> {
        self.check_version(block)?;
        self.check_prev_hash(block)?;
        self.check_merkle_root(block)?;
        self.check_hash_and_pow(block)?;
        self.check_signature(block)?;
        self.check_reward(block)?;
        self.check_inputs(block)?;
        Ok(())
    }

    /// `index = 0` iff `prev_hash = ""`; otherwise `prev_hash` must match
    /// the current tip's hash.
    fn check_prev_hash(&self, block: &Block) -> Result<(), BlockError> {
        let expected = self.utxo.tip_hash().unwrap_or_default();
        if block.prev_hash != expected {
            return Err(BlockError::OrphanBlock { got: block.prev_hash.clone(), expected });
        }
        Ok(())
    }

    fn check_version(&self, block: &Block) -> Result<(), BlockError> {
        let expected = version_for_height(block.index);
        if block.version != expected {
            return Err(BlockError::InvalidVersion { got: block.version, expected });
        }
        Ok(())
    }

    fn check_merkle_root(&self, block: &Block) -> Result<(), BlockError> {
        if block.recompute_merkle_root() != block.merkle_root {
            return Err(BlockError::InvalidMerkleRoot);
        }
        Ok(())
    }

    fn check_hash_and_pow(&self, block: &Block) -> Result<(), BlockError> {
        if block.recompute_hash() != block.hash {
            return Err(BlockError::InvalidBlockHash);
        }
        let bypass_pow = block.version < 3 && block.special_min;
        if !bypass_pow && !hash_engine::meets_target(&block.hash, &block.target) {
            return Err(BlockError::InvalidBlockHash);
        }
        Ok(())
    }

    fn check_signature(&self, block: &Block) -> Result<(), BlockError> {
        let ok = verify_dual(&block.hash, &block.signature, &block.public_key)
            .map_err(|_| BlockError::InvalidSignature)?;
        if !ok {
            return Err(BlockError::InvalidSignature);
        }
        Ok(())
    }

    fn check_reward(&self, block: &Block) -> Result<(), BlockError> {
        let mut coinbase_count = 0usize;
        let mut coinbase_sum = Decimal::ZERO;
        let mut fee_sum = Decimal::ZERO;

        for tx in &block.transactions {
            if tx.coinbase {
                coinbase_count += 1;
                coinbase_sum += tx.total_output_value();
            } else {
                fee_sum += tx.fee;
            }
        }

        if coinbase_count == 0 {
            return Err(BlockError::NoCoinbase);
        }
        if coinbase_count > 1 {
            return Err(BlockError::MultipleCoinbase);
        }

        let reward = block_reward(block.index);
        let expected_coinbase = quantize_eight(reward + fee_sum);
        if quantize_eight(coinbase_sum) != expected_coinbase {
            return Err(BlockError::InvalidReward {
                coinbase: coinbase_sum.to_string(),
                reward: reward.to_string(),
                fees: fee_sum.to_string(),
            });
        }
        Ok(())
    }

    fn check_inputs(&self, block: &Block) -> Result<(), BlockError> {
        for (index, tx) in block.transactions.iter().enumerate() {
            if tx.coinbase {
                continue;
            }
            tx.verify().map_err(|source| BlockError::TransactionError { index, source })?;
            if self.utxo.is_double_spend(tx) {
                return Err(BlockError::DoubleSpend(tx.hash.clone()));
            }
            self.check_input_values(index, tx)?;
        }
        Ok(())
    }

    /// Each input must resolve to an unspent output owned by its declared
    /// key, and the referenced inputs must cover outputs + fee (data-model
    /// invariant: Σ outputs + fee ≤ Σ referenced input values).
    fn check_input_values(&self, index: usize, tx: &crate::transaction::Transaction) -> Result<(), BlockError> {
        let mut input_value = Decimal::ZERO;
        for input in &tx.inputs {
            let owner_pk = input.owning_public_key(&tx.public_key);
            let owner_address = crate::address::p2pkh_from_pubkey_hex(owner_pk)
                .map_err(|_| BlockError::TransactionError {
                    index,
                    source: crate::error::TransactionError::UnknownInput(input.id.clone()),
                })?;
            let unspent = self.utxo.unspent_outputs(&owner_address);
            let entry = unspent.iter().find(|e| e.txn_id == input.id).ok_or_else(|| {
                BlockError::TransactionError {
                    index,
                    source: crate::error::TransactionError::UnknownInput(input.id.clone()),
                }
            })?;
            input_value += entry.value;
        }

        let needed = quantize_eight(tx.total_output_value() + tx.fee);
        let have = quantize_eight(input_value);
        if needed > have {
            return Err(BlockError::TransactionError {
                index,
                source: crate::error::TransactionError::InsufficientValue {
                    have: have.to_string(),
                    need: needed.to_string(),
                },
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::p2pkh_from_pubkey_hex;
    use crate::block_store::{BlockStore, InMemoryBlockStore};
    use crate::crypto::KeyPair;
    use crate::hash_engine::HeaderFields;
    use crate::target::max_target;
    use crate::transaction::{Transaction, TxOutput};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn coinbase(to: &str, value: rust_decimal::Decimal) -> Transaction {
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

    fn genesis(kp: &KeyPair) -> Block {
        let producer_address = p2pkh_from_pubkey_hex(&kp.public_key_hex()).unwrap();
        let tx = coinbase(&producer_address, crate::chain_params::block_reward(0));
        let target = max_target();
        let merkle_root = hash_engine::merkle_root(&[tx.hash.clone()]);
        let fields = HeaderFields {
            version: 1,
            time: "100",
            public_key_hex: &kp.public_key_hex(),
            index: 0,
            prev_hash: "",
            special_min: false,
            target: &target,
            merkle_root: &merkle_root,
        };
        let header = hash_engine::build_header_template(&fields);
        let mut block = Block {
            version: 1,
            time: "100".into(),
            index: 0,
            public_key: kp.public_key_hex(),
            prev_hash: String::new(),
            nonce: "0".into(),
            transactions: vec![tx],
            hash: String::new(),
            merkle_root,
            special_min: false,
            target,
            header,
            signature: String::new(),
        };
        block.hash = block.recompute_hash();
        block.sign(kp).unwrap();
        block
    }

    #[test]
    fn accepts_well_formed_genesis() {
        let kp = KeyPair::generate();
        let store = Arc::new(InMemoryBlockStore::new());
        let utxo = UtxoIndex::new(store as Arc<dyn BlockStore>);
        let verifier = BlockVerifier::new(&utxo);
        assert!(verifier.verify(&genesis(&kp)).is_ok());
    }

    #[test]
    fn rejects_tampered_merkle_root() {
        let kp = KeyPair::generate();
        let store = Arc::new(InMemoryBlockStore::new());
        let utxo = UtxoIndex::new(store as Arc<dyn BlockStore>);
        let verifier = BlockVerifier::new(&utxo);
        let mut block = genesis(&kp);
        block.merkle_root = "0".repeat(64);
        assert!(matches!(verifier.verify(&block), Err(BlockError::InvalidMerkleRoot)));
    }

    #[test]
    fn rejects_block_with_mismatched_prev_hash() {
        let kp = KeyPair::generate();
        let store = Arc::new(InMemoryBlockStore::new());
        let utxo = UtxoIndex::new(store as Arc<dyn BlockStore>);
        let verifier = BlockVerifier::new(&utxo);
        let mut block = genesis(&kp);
        block.prev_hash = "not-empty".into();
        assert!(matches!(verifier.verify(&block), Err(BlockError::OrphanBlock { .. })));
    }

    #[test]
    fn rejects_wrong_version_for_height() {
        let kp = KeyPair::generate();
        let store = Arc::new(InMemoryBlockStore::new());
        let utxo = UtxoIndex::new(store as Arc<dyn BlockStore>);
        let verifier = BlockVerifier::new(&utxo);
        let mut block = genesis(&kp);
        block.version = 3;
        assert!(matches!(verifier.verify(&block), Err(BlockError::InvalidVersion { .. })));
    }

    #[test]
    fn rejects_perturbed_coinbase_value() {
        let kp = KeyPair::generate();
        let store = Arc::new(InMemoryBlockStore::new());
        let utxo = UtxoIndex::new(store as Arc<dyn BlockStore>);
        let verifier = BlockVerifier::new(&utxo);
        let mut block = genesis(&kp);
        block.transactions[0].outputs[0].value += dec!(0.00000001);
        assert!(matches!(verifier.verify(&block), Err(BlockError::InvalidReward { .. })));
    }

    #[test]
    fn rejects_transaction_spending_more_than_its_inputs_cover() {
        use crate::transaction::TxInput;

        let kp = KeyPair::generate();
        let store = Arc::new(InMemoryBlockStore::new());
        let g = genesis(&kp);
        let coinbase_id = g.transactions[0].hash.clone();
        store.append(g.clone()).unwrap();

        let producer_address = p2pkh_from_pubkey_hex(&kp.public_key_hex()).unwrap();

        let mut overspend = Transaction {
            public_key: kp.public_key_hex(),
            fee: Decimal::ZERO,
            hash: String::new(),
            relationship: None,
            dh_public_key: None,
            rid: None,
            inputs: vec![TxInput::simple(coinbase_id)],
            outputs: vec![TxOutput { to: "1other".into(), value: dec!(51) }],
            id: String::new(),
            coinbase: false,
        };
        overspend.hash = overspend.canonical_hash();
        overspend.id = kp.sign_hex_digest(&overspend.hash).unwrap();

        let mut cb2 = coinbase(&producer_address, crate::chain_params::block_reward(1));
        cb2.hash = cb2.canonical_hash();

        let hashes = vec![overspend.hash.clone(), cb2.hash.clone()];
        let merkle_root = hash_engine::merkle_root(&hashes);
        let target = max_target();
        let fields = HeaderFields {
            version: 1,
            time: "100",
            public_key_hex: &kp.public_key_hex(),
            index: 1,
            prev_hash: &g.hash,
            special_min: false,
            target: &target,
            merkle_root: &merkle_root,
        };
        let header = hash_engine::build_header_template(&fields);
        let mut block = Block {
            version: 1,
            time: "100".into(),
            index: 1,
            public_key: kp.public_key_hex(),
            prev_hash: g.hash.clone(),
            nonce: "0".into(),
            transactions: vec![overspend, cb2],
            hash: String::new(),
            merkle_root,
            special_min: false,
            target,
            header,
            signature: String::new(),
        };
        block.hash = block.recompute_hash();
        block.sign(&kp).unwrap();

        let utxo = UtxoIndex::new(store as Arc<dyn BlockStore>);
        let verifier = BlockVerifier::new(&utxo);
        let err = verifier.verify(&block).unwrap_err();
        assert!(matches!(
            err,
            BlockError::TransactionError {
                source: crate::error::TransactionError::InsufficientValue { .. },
                ..
            }
        ));
    }

    #[test]
    fn rejects_missing_coinbase() {
        let kp = KeyPair::generate();
        let store = Arc::new(InMemoryBlockStore::new());
        let utxo = UtxoIndex::new(store as Arc<dyn BlockStore>);
        let verifier = BlockVerifier::new(&utxo);
        let mut block = genesis(&kp);
        block.transactions.clear();
        // merkle root / hash will now also mismatch; this still hits an
        // error, just not necessarily NoCoinbase first, since merkle root
        // is checked earlier.
        assert!(verifier.verify(&block).is_err());
    }
}
