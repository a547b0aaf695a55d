//! Block data, header assembly, and hash/signature helpers (§3, §4.2).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::address::p2pkh_from_pubkey_hex;
use crate::crypto::KeyPair;
use crate::error::{AddressError, CryptoError};
use crate::hash_engine::{self, HeaderFields};
use crate::target::Target;
use crate::transaction::Transaction;

/// A committed or candidate block.
///
/// `header` stores the header *template*, with [`hash_engine::NONCE_PLACEHOLDER`]
/// still in place — not the substituted preimage. This matches the stable
/// wire form: the placeholder is part of what gets persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub version: u32,
    pub time: String,
    pub index: u64,
    pub public_key: String,
    #[serde(rename = "prevHash")]
    pub prev_hash: String,
    pub nonce: String,
    pub transactions: Vec<Transaction>,
    pub hash: String,
    #[serde(rename = "merkleRoot")]
    pub merkle_root: String,
    pub special_min: bool,
    pub target: Target,
    pub header: String,
    /// Base64 signature over `hash` under `public_key`. Named `id` on the
    /// wire to match the transaction-level convention.
    #[serde(rename = "id")]
    pub signature: String,
}

impl Block {
    /// Build the header template (with the nonce placeholder still in it)
    /// from this block's fields, independent of whatever is currently
    /// stored in `self.header`.
    pub fn build_header_template(&self) -> String {
        let fields = HeaderFields {
            version: self.version,
            time: &self.time,
            public_key_hex: &self.public_key,
            index: self.index,
            prev_hash: &self.prev_hash,
            special_min: self.special_min,
            target: &self.target,
            merkle_root: &self.merkle_root,
        };
        hash_engine::build_header_template(&fields)
    }

    /// The header with `self.nonce` substituted in, i.e. the proof-of-work
    /// preimage.
    pub fn header_with_nonce(&self) -> String {
        hash_engine::substitute_nonce(&self.header, &self.nonce)
    }

    /// `doubleSHA256(header_with_nonce).bytes_reversed.hex()`.
    pub fn recompute_hash(&self) -> String {
        hash_engine::header_hash_hex(&self.header_with_nonce())
    }

    pub fn recompute_merkle_root(&self) -> String {
        let hashes: Vec<String> = self.transactions.iter().map(|t| t.hash.clone()).collect();
        hash_engine::merkle_root(&hashes)
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.coinbase)
    }

    pub fn producer_address(&self) -> Result<String, AddressError> {
        p2pkh_from_pubkey_hex(&self.public_key)
    }

    pub fn non_coinbase_fee_sum(&self) -> Decimal {
        self.transactions
            .iter()
            .filter(|t| !t.coinbase)
            .map(|t| t.fee)
            .sum()
    }

    /// Sign `hash` with `keypair`, filling in `signature`. Called once the
    /// nonce has been found and `hash` is final.
    pub fn sign(&mut self, keypair: &KeyPair) -> Result<(), CryptoError> {
        self.signature = keypair.sign_hex_digest(&self.hash)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::target::max_target;
    use rust_decimal_macros::dec;

    fn coinbase_tx(address: &str, value: Decimal) -> Transaction {
        let mut tx = Transaction {
            public_key: "producer".into(),
            fee: Decimal::ZERO,
            hash: String::new(),
            relationship: None,
            dh_public_key: None,
            rid: None,
            inputs: vec![],
            outputs: vec![crate::transaction::TxOutput { to: address.to_string(), value }],
            id: String::new(),
            coinbase: true,
        };
        tx.hash = tx.canonical_hash();
        tx
    }

    fn mined_block(kp: &KeyPair, index: u64, prev_hash: &str) -> Block {
        let producer_address = kp.public_key_hex();
        let address = p2pkh_from_pubkey_hex(&producer_address).unwrap();
        let tx = coinbase_tx(&address, dec!(50));
        let target = max_target();
        let merkle_root = hash_engine::merkle_root(&[tx.hash.clone()]);

        let fields = HeaderFields {
            version: 1,
            time: "100",
            public_key_hex: &producer_address,
            index,
            prev_hash,
            special_min: false,
            target: &target,
            merkle_root: &merkle_root,
        };
        let header = hash_engine::build_header_template(&fields);

        let mut block = Block {
            version: 1,
            time: "100".into(),
            index,
            public_key: producer_address,
            prev_hash: prev_hash.to_string(),
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
    fn header_with_nonce_substitutes_placeholder() {
        let kp = KeyPair::generate();
        let block = mined_block(&kp, 0, "");
        assert!(!block.header_with_nonce().contains(hash_engine::NONCE_PLACEHOLDER));
    }

    #[test]
    fn recompute_hash_matches_stored_hash_after_assembly() {
        let kp = KeyPair::generate();
        let block = mined_block(&kp, 0, "");
        assert_eq!(block.recompute_hash(), block.hash);
    }

    #[test]
    fn recompute_merkle_root_matches_single_coinbase() {
        let kp = KeyPair::generate();
        let block = mined_block(&kp, 0, "");
        assert_eq!(block.recompute_merkle_root(), block.merkle_root);
    }

    #[test]
    fn signature_verifies_under_producer_key() {
        let kp = KeyPair::generate();
        let block = mined_block(&kp, 0, "");
        assert!(crate::crypto::verify_dual(&block.hash, &block.signature, &block.public_key).unwrap());
    }
}
