//! 256-bit proof-of-work target.
//!
//! Represented as an arbitrary-precision unsigned integer rather than a
//! fixed-width type because the v3 header serializes it as a 64-hex-digit
//! string and downstream comparisons must be exact integer comparisons, not
//! string comparisons (see the header-serialization open question in the
//! design notes).

use std::cmp::Ordering;
use std::fmt;

use num_bigint::BigUint;
use num_traits::Zero;

/// `2^240 - 1`. A 60-hex-digit value, left-padded to 64 on serialization.
pub fn max_target() -> Target {
    Target((BigUint::from(1u8) << 240u32) - BigUint::from(1u8))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target(BigUint);

impl Target {
    pub fn from_biguint(value: BigUint) -> Self {
        Target(value)
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    /// Parse a hex string of any length (as produced by `hex::encode` on a
    /// big-endian byte buffer, or a v1/v2 decimal-then-hex round trip).
    pub fn from_hex(s: &str) -> Option<Target> {
        let s = s.trim_start_matches("0x");
        let s = if s.is_empty() { "0" } else { s };
        BigUint::parse_bytes(s.as_bytes(), 16).map(Target)
    }

    /// Interpret a hash's raw bytes as a big-endian unsigned integer, as
    /// required for the proof-of-work comparison `hash < target`.
    pub fn from_hash_hex(hash_hex: &str) -> Option<Target> {
        Self::from_hex(hash_hex)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// 64-hex-digit lowercase, left-padded with zeros. Always computed from
    /// the integer value, never from a string-sliced hex representation.
    pub fn to_hex_padded(&self) -> String {
        let digits = self.0.to_str_radix(16);
        format!("{digits:0>64}")
    }

    /// `self * numerator / denominator`, capped at [`max_target`]. Used by
    /// the retarget formula; multiplication happens before division to
    /// match the reference algorithm's evaluation order.
    pub fn scaled(&self, numerator: u64, denominator: u64) -> Target {
        let scaled = (&self.0 * BigUint::from(numerator)) / BigUint::from(denominator.max(1));
        let max = max_target().0;
        Target(scaled.min(max))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex_padded())
    }
}

impl PartialOrd for Target {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Target {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl serde::Serialize for Target {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex_padded())
    }
}

impl<'de> serde::Deserialize<'de> for Target {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Target::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid target hex"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_target_is_sixty_hex_digits_wide() {
        let hex = max_target().as_biguint().to_str_radix(16);
        assert_eq!(hex.len(), 60);
    }

    #[test]
    fn padded_form_is_always_64_chars() {
        assert_eq!(max_target().to_hex_padded().len(), 64);
        assert_eq!(Target::from_hex("ff").unwrap().to_hex_padded().len(), 64);
    }

    #[test]
    fn padded_form_round_trips_through_integer_value() {
        let t = Target::from_hex("abc").unwrap();
        let back = Target::from_hex(&t.to_hex_padded()).unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn scaled_halves_at_half_ratio() {
        let t = Target::from_hex("100").unwrap();
        assert_eq!(t.scaled(1, 2), Target::from_hex("80").unwrap());
    }

    #[test]
    fn scaled_caps_at_max_target() {
        let t = max_target();
        assert_eq!(t.scaled(10, 1), max_target());
    }

    #[test]
    fn ordering_is_numeric_not_lexicographic() {
        let small = Target::from_hex("9").unwrap();
        let big = Target::from_hex("10").unwrap();
        assert!(small < big);
    }
}
