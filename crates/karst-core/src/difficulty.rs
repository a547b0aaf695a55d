//! Difficulty retargeting over the past retarget window (§4.7).

use crate::block::Block;
use crate::block_store::BlockStore;
use crate::chain_params::{Network, HALF_WEEK, RETARGET_PERIOD, STUCK_CHAIN_HEIGHT, TWO_WEEKS};
use crate::error::DifficultyError;
use crate::target::{max_target, Target};

pub struct DifficultyEngine<'a> {
    store: &'a dyn BlockStore,
    network: Network,
}

impl<'a> DifficultyEngine<'a> {
    pub fn new(store: &'a dyn BlockStore, network: Network) -> Self {
        DifficultyEngine { store, network }
    }

    /// Target for the block being assembled at `height`. `candidate_time`
    /// is the new block's own timestamp, used only by the stuck-chain
    /// relaxation at non-retarget heights.
    pub fn target_for_height(&self, height: u64, candidate_time: i64) -> Result<Target, DifficultyError> {
        if height == 0 {
            return Ok(max_target());
        }

        let tip = self.store.tip().ok_or(DifficultyError::RetargetDataMissing(height))?;
        let tip_time = parse_time(&tip, height)?;

        if height % RETARGET_PERIOD == 0 {
            let start_index = height - RETARGET_PERIOD;
            // The original implementation indexes the 2016-blocks-ago
            // reference at `start_index` rather than `start_index + 1` in
            // this arm; preserved as observed rather than corrected.
            let old = self
                .store
                .by_index(start_index)
                .ok_or(DifficultyError::RetargetDataMissing(start_index))?;
            let old_time = parse_time(&old, start_index)?;

            let elapsed = (tip_time - old_time).clamp(HALF_WEEK, TWO_WEEKS) as u64;
            let reference = self.reference_block(tip)?;
            Ok(reference.target.scaled(elapsed, TWO_WEEKS as u64))
        } else {
            let reference = self.reference_block(tip)?;
            let mut target = reference.target;

            if height >= STUCK_CHAIN_HEIGHT {
                let target_block_time = self.network.target_block_time();
                let delta = candidate_time - tip_time;
                if delta > target_block_time {
                    let factor = (delta / target_block_time).max(1) as u64;
                    target = target.scaled(4 * factor, 1);
                }
            }

            Ok(target)
        }
    }

    /// Walk backward from `tip` (inclusive) to the first block whose target
    /// is not [`max_target`] and whose `special_min` is false — runaway
    /// easy blocks must not feed the retarget formula.
    fn reference_block(&self, tip: Block) -> Result<Block, DifficultyError> {
        let max = max_target();
        let mut current = tip;
        loop {
            if current.target != max && !current.special_min {
                return Ok(current);
            }
            if current.index == 0 {
                return Ok(current);
            }
            let prev_index = current.index - 1;
            current = self
                .store
                .by_index(prev_index)
                .ok_or(DifficultyError::RetargetDataMissing(prev_index))?;
        }
    }
}

fn parse_time(block: &Block, height_for_error: u64) -> Result<i64, DifficultyError> {
    block
        .time
        .parse()
        .map_err(|_| DifficultyError::RetargetDataMissing(height_for_error))
}
