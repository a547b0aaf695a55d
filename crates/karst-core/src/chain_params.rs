//! Version schedule, block reward schedule, and network-wide constants.
//!
//! These are pure functions of height (or network); none of them touch the
//! block log or any other component.

use rust_decimal::Decimal;

/// Height at which version 2 becomes mandatory (heights ≤ this stay on v1).
pub const VERSION_1_CEILING: u64 = 14_484;

/// Height at which version 3 becomes mandatory. Named after the historical
/// proof-of-work fork that introduced it.
pub const POW_FORK_V2: u64 = 114_436;

/// Height at which the difficulty engine's "stuck chain" relaxation (§4.7)
/// starts applying.
pub const STUCK_CHAIN_HEIGHT: u64 = 38_600;

/// Height at which the halving schedule bottoms out at zero reward.
pub const REWARD_ZERO_HEIGHT: u64 = 6_930_000;

pub const HALVING_INTERVAL: u64 = 210_000;
pub const INITIAL_REWARD_SATS: u64 = 5_000_000_000; // 50, scaled by 1e8.
pub const COIN_SATS: u64 = 100_000_000;

pub const RETARGET_PERIOD: u64 = 2016;
pub const TWO_WEEKS: i64 = 1_209_600;
pub const HALF_WEEK: i64 = 302_400;
pub const MAX_NONCE_LEN: usize = 40;

/// Network a node is configured for. Only affects `target_block_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regnet,
}

impl Network {
    pub fn target_block_time(self) -> i64 {
        match self {
            Network::Mainnet => 600,
            Network::Testnet => 600,
            Network::Regnet => 1,
        }
    }
}

/// Protocol version in effect at a given height.
///
/// Three eras: v1 up to [`VERSION_1_CEILING`], v2 up to [`POW_FORK_V2`], v3
/// after that. `special_min` is only meaningful in v1/v2.
pub fn version_for_height(height: u64) -> u32 {
    if height <= VERSION_1_CEILING {
        1
    } else if height <= POW_FORK_V2 {
        2
    } else {
        3
    }
}

/// Block subsidy at `height`, in whole coins, as a decimal quantized to 8
/// places.
///
/// Follows the standard Bitcoin halving series: the reward halves every
/// [`HALVING_INTERVAL`] blocks via integer (satoshi) right-shift, so it
/// truncates toward zero at each step rather than halving a single
/// high-precision value once. This reaches exactly zero at
/// [`REWARD_ZERO_HEIGHT`] (`210_000 * 33`).
pub fn block_reward(height: u64) -> Decimal {
    let halvings = height / HALVING_INTERVAL;
    let sats = if halvings >= 64 {
        0
    } else {
        INITIAL_REWARD_SATS >> halvings
    };
    Decimal::new(sats as i64, 8)
}
