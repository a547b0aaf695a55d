//! Transaction data, canonical hashing, and coinbase classification.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::address::p2pkh_from_pubkey_hex;
use crate::crypto::verify_dual;
use crate::decimal::quantize_eight;
use crate::error::TransactionError;
use crate::hash_engine::sha256;

/// An input carried by an "external" party — one not sharing the
/// transaction's own `public_key` — supplying its own key and signature so
/// its ownership of the referenced output can be checked independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalInput {
    pub public_key: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Hash (`id`) of the transaction whose output this spends.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalInput>,
}

impl TxInput {
    pub fn simple(id: impl Into<String>) -> Self {
        TxInput { id: id.into(), external: None }
    }

    /// The public key whose unspent set this input is checked against:
    /// the external key if present, otherwise the transaction's own key
    /// (supplied by the caller, since `TxInput` alone doesn't carry it).
    pub fn owning_public_key<'a>(&'a self, tx_public_key: &'a str) -> &'a str {
        self.external.as_ref().map(|e| e.public_key.as_str()).unwrap_or(tx_public_key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub to: String,
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub public_key: String,
    pub fee: Decimal,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dh_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// Base64 secp256k1 signature over `hash`.
    pub id: String,
    pub coinbase: bool,
}

impl Transaction {
    /// Deterministic serialization of the content fields in a fixed order,
    /// hex-SHA-256'd. Does not include `hash` or `id` themselves.
    pub fn canonical_hash(&self) -> String {
        let mut buf = String::new();
        buf.push_str(&self.public_key);
        buf.push_str(&quantize_eight(self.fee).to_string());
        buf.push_str(self.relationship.as_deref().unwrap_or(""));
        buf.push_str(self.dh_public_key.as_deref().unwrap_or(""));
        buf.push_str(self.rid.as_deref().unwrap_or(""));
        for input in &self.inputs {
            buf.push_str(&input.id);
            if let Some(ext) = &input.external {
                buf.push_str(&ext.public_key);
            }
        }
        for output in &self.outputs {
            buf.push_str(&output.to);
            buf.push_str(&quantize_eight(output.value).to_string());
        }
        hex::encode(sha256(buf.as_bytes()))
    }

    pub fn sender_address(&self) -> Result<String, crate::error::AddressError> {
        p2pkh_from_pubkey_hex(&self.public_key)
    }

    pub fn total_output_value(&self) -> Decimal {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Re-derives the canonical hash and checks `id` against it, per the
    /// non-coinbase invariants in the data model.
    pub fn verify(&self) -> Result<(), TransactionError> {
        if self.canonical_hash() != self.hash {
            return Err(TransactionError::Malformed("hash does not match content".into()));
        }
        let ok = verify_dual(&self.hash, &self.id, &self.public_key)
            .map_err(|_| TransactionError::BadSignature)?;
        if !ok {
            return Err(TransactionError::BadSignature);
        }
        let seen: std::collections::HashSet<&str> =
            self.inputs.iter().map(|i| i.id.as_str()).collect();
        if seen.len() != self.inputs.len() {
            return Err(TransactionError::DuplicateInput(
                self.inputs.first().map(|i| i.id.clone()).unwrap_or_default(),
            ));
        }
        Ok(())
    }

    /// Classification per §4.3: exactly one output paying the block
    /// producer's P2PKH address, no inputs, no relationship payload.
    pub fn looks_like_coinbase(&self, block_producer_address: &str) -> bool {
        self.inputs.is_empty()
            && self.relationship.is_none()
            && self.outputs.len() == 1
            && self.outputs[0].to == block_producer_address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use rust_decimal_macros::dec;

    fn signed_transfer(kp: &KeyPair, to: &str, value: Decimal, fee: Decimal) -> Transaction {
        let mut tx = Transaction {
            public_key: kp.public_key_hex(),
            fee,
            hash: String::new(),
            relationship: None,
            dh_public_key: None,
            rid: None,
            inputs: vec![TxInput::simple("deadbeef")],
            outputs: vec![TxOutput { to: to.to_string(), value }],
            id: String::new(),
            coinbase: false,
        };
        tx.hash = tx.canonical_hash();
        tx.id = kp.sign_hex_digest(&tx.hash).unwrap();
        tx
    }

    #[test]
    fn canonical_hash_is_deterministic() {
        let kp = KeyPair::generate();
        let tx = signed_transfer(&kp, "1abc", dec!(1.0), dec!(0.01));
        assert_eq!(tx.canonical_hash(), tx.canonical_hash());
    }

    #[test]
    fn verify_accepts_well_formed_transaction() {
        let kp = KeyPair::generate();
        let tx = signed_transfer(&kp, "1abc", dec!(1.0), dec!(0.01));
        assert!(tx.verify().is_ok());
    }

    #[test]
    fn verify_rejects_tampered_output_value() {
        let kp = KeyPair::generate();
        let mut tx = signed_transfer(&kp, "1abc", dec!(1.0), dec!(0.01));
        tx.outputs[0].value = dec!(2.0);
        assert!(tx.verify().is_err());
    }

    #[test]
    fn duplicate_inputs_are_rejected() {
        let kp = KeyPair::generate();
        let mut tx = signed_transfer(&kp, "1abc", dec!(1.0), dec!(0.01));
        tx.inputs.push(TxInput::simple("deadbeef"));
        tx.hash = tx.canonical_hash();
        tx.id = kp.sign_hex_digest(&tx.hash).unwrap();
        assert!(matches!(tx.verify(), Err(TransactionError::DuplicateInput(_))));
    }

    #[test]
    fn coinbase_shape_requires_no_inputs_and_single_matching_output() {
        let tx = Transaction {
            public_key: "pk".into(),
            fee: Decimal::ZERO,
            hash: "h".into(),
            relationship: None,
            dh_public_key: None,
            rid: None,
            inputs: vec![],
            outputs: vec![TxOutput { to: "1abc".into(), value: dec!(50) }],
            id: "sig".into(),
            coinbase: true,
        };
        assert!(tx.looks_like_coinbase("1abc"));
        assert!(!tx.looks_like_coinbase("1other"));
    }
}
