//! Header formatting, double-SHA-256 hashing, and Merkle root construction.
//!
//! This is the one place in the crate that knows the exact byte layout of a
//! block header string; every other module treats hashes as opaque hex.

use sha2::{Digest, Sha256};

use crate::chain_params::{self};
use crate::target::Target;

/// Placeholder substituted with the trial nonce during mining. Part of the
/// stored `header` field verbatim — do not change the literal text, it
/// would invalidate every header already committed to a block log.
pub const NONCE_PLACEHOLDER: &str = "{nonce}";

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// Inputs needed to build a header string; mirrors the Block fields that
/// participate in hashing.
pub struct HeaderFields<'a> {
    pub version: u32,
    pub time: &'a str,
    pub public_key_hex: &'a str,
    pub index: u64,
    pub prev_hash: &'a str,
    pub special_min: bool,
    pub target: &'a Target,
    pub merkle_root: &'a str,
}

/// Build the header template with [`NONCE_PLACEHOLDER`] still in place.
///
/// v1/v2 render the target as a decimal integer string; v3 renders it as a
/// zero-padded 64-hex-digit string and omits `special_min` entirely.
pub fn build_header_template(fields: &HeaderFields<'_>) -> String {
    let version_part = fields.version.to_string();
    let time_part = fields.time.to_string();
    let index_part = fields.index.to_string();

    if fields.version < 3 {
        let special_min_part = if fields.special_min { "1" } else { "0" };
        let target_part = fields.target.as_biguint().to_str_radix(10);
        format!(
            "{version}{time}{pk}{index}{prev}{nonce}{special_min}{target}{merkle}",
            version = version_part,
            time = time_part,
            pk = fields.public_key_hex,
            index = index_part,
            prev = fields.prev_hash,
            nonce = NONCE_PLACEHOLDER,
            special_min = special_min_part,
            target = target_part,
            merkle = fields.merkle_root,
        )
    } else {
        format!(
            "{version}{time}{pk}{index}{prev}{nonce}{target}{merkle}",
            version = version_part,
            time = time_part,
            pk = fields.public_key_hex,
            index = index_part,
            prev = fields.prev_hash,
            nonce = NONCE_PLACEHOLDER,
            target = fields.target.to_hex_padded(),
            merkle = fields.merkle_root,
        )
    }
}

/// Substitute the nonce into a header template produced by
/// [`build_header_template`].
pub fn substitute_nonce(template: &str, nonce: &str) -> String {
    template.replacen(NONCE_PLACEHOLDER, nonce, 1)
}

/// `doubleSHA256(header).bytes_reversed.hex()`, i.e. the header hash
/// rendered little-endian, matching the original implementation's display
/// convention.
pub fn header_hash_hex(header_with_nonce: &str) -> String {
    let mut digest = double_sha256(header_with_nonce.as_bytes());
    digest.reverse();
    hex::encode(digest)
}

fn sha256_hex_concat(a: &str, b: &str) -> String {
    let mut buf = String::with_capacity(a.len() + b.len());
    buf.push_str(a);
    buf.push_str(b);
    hex::encode(sha256(buf.as_bytes()))
}

/// Merkle root over transaction hashes, per the original algorithm: sort
/// ascending case-insensitive by hex, then reduce levels by pairing
/// `(i, i+1)`. An odd leftover element at the end of a level is paired with
/// the *empty string*, not duplicated.
pub fn merkle_root(tx_hashes: &[String]) -> String {
    if tx_hashes.is_empty() {
        return String::new();
    }
    let mut level: Vec<String> = tx_hashes.to_vec();
    level.sort_by_key(|h| h.to_lowercase());

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut i = 0;
        while i < level.len() {
            let left = &level[i];
            let right = if i + 1 < level.len() { level[i + 1].as_str() } else { "" };
            next.push(sha256_hex_concat(left, right));
            i += 2;
        }
        level = next;
    }
    level.into_iter().next().unwrap_or_default()
}

/// `true` iff the big-endian integer value of `hash_hex` is strictly less
/// than `target` — the proof-of-work acceptance condition.
pub fn meets_target(hash_hex: &str, target: &Target) -> bool {
    match Target::from_hash_hex(hash_hex) {
        Some(h) => &h < target,
        None => false,
    }
}

/// Header-derived target-block-time bound unaffected by network selection;
/// re-exported here so callers that only import `hash_engine` can reach it.
pub use chain_params::RETARGET_PERIOD;
