//! secp256k1 signing and the dual signature-verification path.
//!
//! Blocks and transactions carry a base64 signature over a hex digest.
//! Historically two signing conventions were accepted: a plain ECDSA
//! signature verified directly against the declared public key, and a
//! Bitcoin "message signing" recoverable signature, which instead recovers
//! a public key from the signature and the digest and compares that to the
//! declared one. `verify_dual` tries both so old and new signatures both
//! validate.

use base64::Engine;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId, Signature};
use secp256k1::{Message, PublicKey as Secp256k1PublicKey, SecretKey};

use crate::error::CryptoError;

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

#[derive(Clone)]
pub struct KeyPair {
    secret: SecretKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").finish_non_exhaustive()
    }
}

impl KeyPair {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let secret = SecretKey::new(&mut rng);
        KeyPair { secret }
    }

    pub fn from_secret_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_str).map_err(|_| CryptoError::InvalidPublicKey)?;
        let secret = SecretKey::from_slice(&bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(KeyPair { secret })
    }

    pub fn public_key(&self) -> Secp256k1PublicKey {
        Secp256k1PublicKey::from_secret_key(secp256k1::SECP256K1, &self.secret)
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key().serialize())
    }

    /// Hex encoding of the secret scalar, the inverse of
    /// [`KeyPair::from_secret_hex`].
    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret.secret_bytes())
    }

    /// Sign a 32-byte hex digest, returning a base64-encoded compact
    /// ECDSA signature.
    pub fn sign_hex_digest(&self, digest_hex: &str) -> Result<String, CryptoError> {
        let digest = decode_digest(digest_hex)?;
        let msg = Message::from_digest(digest);
        let sig = secp256k1::SECP256K1.sign_ecdsa(&msg, &self.secret);
        Ok(b64().encode(sig.serialize_compact()))
    }
}

fn decode_digest(digest_hex: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = hex::decode(digest_hex).map_err(|_| CryptoError::InvalidSignature)?;
    bytes.try_into().map_err(|_| CryptoError::InvalidSignature)
}

/// Verify `signature_b64` over `digest_hex` under `public_key_hex`, trying
/// a recoverable (message-signing) interpretation first and falling back to
/// a plain ECDSA signature.
pub fn verify_dual(
    digest_hex: &str,
    signature_b64: &str,
    public_key_hex: &str,
) -> Result<bool, CryptoError> {
    let digest = decode_digest(digest_hex)?;
    let msg = Message::from_digest(digest);
    let pk_bytes = hex::decode(public_key_hex).map_err(|_| CryptoError::InvalidPublicKey)?;
    let public_key =
        Secp256k1PublicKey::from_slice(&pk_bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig_bytes = b64()
        .decode(signature_b64)
        .map_err(|_| CryptoError::InvalidSignature)?;

    if sig_bytes.len() == 65 {
        let header = sig_bytes[0] as i32;
        if let Ok(recid) = RecoveryId::from_i32((header - 27) & 3) {
            if let Ok(recsig) = RecoverableSignature::from_compact(&sig_bytes[1..65], recid) {
                if let Ok(recovered) = secp256k1::SECP256K1.recover_ecdsa(&msg, &recsig) {
                    if recovered == public_key {
                        return Ok(true);
                    }
                }
            }
        }
    }

    if sig_bytes.len() == 64 {
        if let Ok(sig) = Signature::from_compact(&sig_bytes) {
            if secp256k1::SECP256K1
                .verify_ecdsa(&msg, &sig, &public_key)
                .is_ok()
            {
                return Ok(true);
            }
        }
    }

    if let Ok(sig) = Signature::from_der(&sig_bytes) {
        if secp256k1::SECP256K1
            .verify_ecdsa(&msg, &sig, &public_key)
            .is_ok()
        {
            return Ok(true);
        }
    }

    Ok(false)
}
