use crate::core::Block;
use crate::error::{BlockchainError, Result};
use log::info;

/// Difficulty never drops below this through automatic retargeting
pub const MIN_DIFFICULTY: u32 = 1;
/// Highest difficulty accepted from configuration or an administrator
pub const MAX_DIFFICULTY: u32 = 12;
/// Starting difficulty when none is configured
pub const INITIAL_DIFFICULTY: u32 = 2;
/// Default target block interval (10 seconds)
pub const TARGET_BLOCK_INTERVAL_MS: u64 = 10_000;
/// Blocks inspected when measuring the observed interval
pub const RETARGET_WINDOW: usize = 10;

/// Step-wise difficulty retargeting against a target block interval
pub struct DifficultyAdjustment;

impl DifficultyAdjustment {
    /// +1 when blocks arrive in half the target time or less, -1 (floor
    /// [`MIN_DIFFICULTY`]) when they take twice as long or more
    pub fn adjust(current: u32, observed_ms: u64, target_ms: u64) -> u32 {
        if observed_ms.saturating_mul(2) <= target_ms {
            (current + 1).min(MAX_DIFFICULTY.max(current))
        } else if observed_ms >= target_ms.saturating_mul(2) {
            current.saturating_sub(1).max(MIN_DIFFICULTY)
        } else {
            current
        }
    }

    /// Mean gap between consecutive block timestamps, oldest first.
    /// `None` with fewer than two blocks.
    pub fn average_block_time(blocks: &[Block]) -> Option<u64> {
        if blocks.len() < 2 {
            return None;
        }
        let total: u64 = blocks
            .windows(2)
            .map(|pair| (pair[1].get_timestamp() - pair[0].get_timestamp()).max(0) as u64)
            .sum();
        Some(total / (blocks.len() as u64 - 1))
    }

    /// Retarget from the most recent blocks; unchanged when there is not
    /// enough history
    pub fn next_difficulty(current: u32, recent_blocks: &[Block], target_ms: u64) -> u32 {
        match Self::average_block_time(recent_blocks) {
            Some(observed) => {
                let next = Self::adjust(current, observed, target_ms);
                if next != current {
                    info!(
                        "Difficulty retarget: {current} -> {next} (observed: {observed}ms, target: {target_ms}ms)"
                    );
                }
                next
            }
            None => current,
        }
    }

    /// Validate that a difficulty value is within acceptable bounds
    pub fn validate_difficulty(difficulty: u32) -> Result<()> {
        if difficulty > MAX_DIFFICULTY {
            return Err(BlockchainError::InvalidArgument(format!(
                "Difficulty {difficulty} is outside valid range [0, {MAX_DIFFICULTY}]"
            )));
        }
        Ok(())
    }
}
