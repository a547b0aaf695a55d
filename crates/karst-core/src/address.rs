//! Pay-to-Public-Key-Hash addresses: `base58check(version_byte || RIPEMD160(SHA256(pubkey)))`.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::error::AddressError;
use crate::hash_engine::double_sha256;

/// Mainnet P2PKH version byte, matching legacy `1...` addresses.
pub const VERSION_BYTE: u8 = 0x00;

/// `RIPEMD160(SHA256(pubkey_bytes))`.
pub fn pubkey_hash(pubkey_bytes: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(pubkey_bytes);
    let ripemd = Ripemd160::digest(sha);
    ripemd.into()
}

/// Derive the base58check P2PKH address for a hex-encoded public key.
pub fn p2pkh_from_pubkey_hex(pubkey_hex: &str) -> Result<String, AddressError> {
    let bytes = hex::decode(pubkey_hex).map_err(|_| AddressError::InvalidEncoding)?;
    Ok(encode(&pubkey_hash(&bytes)))
}

fn encode(hash160: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(VERSION_BYTE);
    payload.extend_from_slice(hash160);
    let checksum = double_sha256(&payload);
    payload.extend_from_slice(&checksum[..4]);
    bs58::encode(payload).into_string()
}

/// Decode a base58check address back to its 20-byte hash, validating the
/// checksum and version byte.
pub fn decode(address: &str) -> Result<[u8; 20], AddressError> {
    let payload = bs58::decode(address)
        .into_vec()
        .map_err(|_| AddressError::InvalidEncoding)?;
    if payload.len() != 25 {
        return Err(AddressError::InvalidEncoding);
    }
    let (body, checksum) = payload.split_at(21);
    let expected = double_sha256(body);
    if &expected[..4] != checksum {
        return Err(AddressError::InvalidChecksum);
    }
    if body[0] != VERSION_BYTE {
        return Err(AddressError::UnexpectedVersion(body[0]));
    }
    let mut hash160 = [0u8; 20];
    hash160.copy_from_slice(&body[1..]);
    Ok(hash160)
}
