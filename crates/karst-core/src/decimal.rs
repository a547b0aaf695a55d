//! Decimal quantization shared by fee, value, and reward comparisons.
//!
//! All monetary arithmetic in the core goes through [`rust_decimal::Decimal`]
//! rather than floating point; every equality check that crosses a wire
//! boundary is quantized to 8 fractional digits first.

use rust_decimal::Decimal;

/// Round `value` to 8 fractional digits, matching the original
/// `quantize_eight` helper's rounding mode (half-even banker's rounding,
/// `rust_decimal`'s default).
pub fn quantize_eight(value: Decimal) -> Decimal {
    value.round_dp(8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quantizes_down_to_eight_places() {
        assert_eq!(quantize_eight(dec!(1.123456789)), dec!(1.12345679));
    }

    #[test]
    fn already_quantized_is_unchanged() {
        assert_eq!(quantize_eight(dec!(0.03)), dec!(0.03));
    }
}
