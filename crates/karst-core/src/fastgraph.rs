//! Off-chain multi-signature wrapper over a base transaction (§4.4).

use serde::{Deserialize, Serialize};

use crate::crypto::verify_dual;
use crate::error::FastGraphError;
use crate::hash_engine::sha256;
use crate::transaction::Transaction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperSignature {
    pub public_key: String,
    /// Base64 signature over a digest of the base transaction's own `id`.
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastGraph {
    pub base: Transaction,
    pub wrapper_signatures: Vec<WrapperSignature>,
}

/// Digest signed by each wrapper: `sha256(base.id)`, hex-encoded — secp256k1
/// needs a fixed-size digest, and the base transaction's signature is itself
/// a variable-length base64 string.
fn wrapper_digest(base_id: &str) -> String {
    hex::encode(sha256(base_id.as_bytes()))
}

impl FastGraph {
    /// Valid iff the base transaction verifies and every wrapper signature
    /// verifies under its declared public key.
    pub fn verify(&self) -> Result<(), FastGraphError> {
        self.base
            .verify()
            .map_err(|e| FastGraphError::BaseInvalid(e.to_string()))?;

        let digest = wrapper_digest(&self.base.id);
        for (index, wrapper) in self.wrapper_signatures.iter().enumerate() {
            let ok = verify_dual(&digest, &wrapper.signature, &wrapper.public_key)
                .map_err(|_| FastGraphError::BadWrapperSignature { index })?;
            if !ok {
                return Err(FastGraphError::BadWrapperSignature { index });
            }
        }
        Ok(())
    }

    /// Once integrated into a committed block, a FastGraph is represented
    /// by its wrapped transaction alone.
    pub fn into_transaction(self) -> Transaction {
        self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::transaction::TxInput;
    use rust_decimal_macros::dec;

    fn signed_base(kp: &KeyPair) -> Transaction {
        let mut tx = Transaction {
            public_key: kp.public_key_hex(),
            fee: dec!(0.01),
            hash: String::new(),
            relationship: None,
            dh_public_key: None,
            rid: None,
            inputs: vec![TxInput::simple("prevtx")],
            outputs: vec![crate::transaction::TxOutput { to: "1abc".into(), value: dec!(1) }],
            id: String::new(),
            coinbase: false,
        };
        tx.hash = tx.canonical_hash();
        tx.id = kp.sign_hex_digest(&tx.hash).unwrap();
        tx
    }

    #[test]
    fn verifies_with_no_wrapper_signatures() {
        let kp = KeyPair::generate();
        let fg = FastGraph { base: signed_base(&kp), wrapper_signatures: vec![] };
        assert!(fg.verify().is_ok());
    }

    #[test]
    fn verifies_with_valid_wrapper_signature() {
        let base_kp = KeyPair::generate();
        let wrapper_kp = KeyPair::generate();
        let base = signed_base(&base_kp);
        let digest = wrapper_digest(&base.id);
        let wrapper_sig = wrapper_kp.sign_hex_digest(&digest).unwrap();
        let fg = FastGraph {
            base,
            wrapper_signatures: vec![WrapperSignature {
                public_key: wrapper_kp.public_key_hex(),
                signature: wrapper_sig,
            }],
        };
        assert!(fg.verify().is_ok());
    }

    #[test]
    fn rejects_bad_wrapper_signature() {
        let base_kp = KeyPair::generate();
        let wrapper_kp = KeyPair::generate();
        let other_kp = KeyPair::generate();
        let base = signed_base(&base_kp);
        let digest = wrapper_digest(&base.id);
        let bad_sig = other_kp.sign_hex_digest(&digest).unwrap();
        let fg = FastGraph {
            base,
            wrapper_signatures: vec![WrapperSignature {
                public_key: wrapper_kp.public_key_hex(),
                signature: bad_sig,
            }],
        };
        assert!(matches!(fg.verify(), Err(FastGraphError::BadWrapperSignature { index: 0 })));
    }

    #[test]
    fn rejects_invalid_base_transaction() {
        let kp = KeyPair::generate();
        let mut base = signed_base(&kp);
        base.outputs[0].value = dec!(999);
        let fg = FastGraph { base, wrapper_signatures: vec![] };
        assert!(matches!(fg.verify(), Err(FastGraphError::BaseInvalid(_))));
    }
}
