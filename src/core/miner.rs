// Block production: build a candidate on the current tip, search for a
// nonce, check it against the active consensus rules and append it. A block
// only reaches the ledger once its proof is complete and validated.

use crate::core::consensus::ConsensusEngine;
use crate::core::difficulty::{DifficultyAdjustment, RETARGET_WINDOW, TARGET_BLOCK_INTERVAL_MS};
use crate::core::ledger::Ledger;
use crate::core::monetary::{block_reward, Amount, HALVING_INTERVAL, INITIAL_BLOCK_REWARD};
use crate::core::proof_of_work::{ProofOfWork, SearchOutcome};
use crate::core::{Block, Transaction};
use crate::error::Result;
use crate::utils::{current_timestamp, validate_address};
use log::{info, warn};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Transactions carried by one block
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiningConfig {
    pub initial_reward: Amount,
    pub halving_interval: u64,
    pub max_transactions_per_block: usize,
    pub target_block_interval_ms: u64,
    pub retarget_window: usize,
}

impl Default for MiningConfig {
    fn default() -> Self {
        MiningConfig {
            initial_reward: INITIAL_BLOCK_REWARD,
            halving_interval: HALVING_INTERVAL,
            max_transactions_per_block: MAX_TRANSACTIONS_PER_BLOCK,
            target_block_interval_ms: TARGET_BLOCK_INTERVAL_MS,
            retarget_window: RETARGET_WINDOW,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiningResult {
    Success {
        block: Block,
        reward: Amount,
        attempts: u64,
        elapsed_ms: u128,
    },
    /// The search stopped on request or ran out of attempts; nothing appended
    Cancelled { attempts: u64 },
    Failure { message: String },
}

impl MiningResult {
    pub fn is_success(&self) -> bool {
        matches!(self, MiningResult::Success { .. })
    }

    pub fn block(&self) -> Option<&Block> {
        match self {
            MiningResult::Success { block, .. } => Some(block),
            _ => None,
        }
    }
}

pub struct Miner {
    ledger: Arc<Ledger>,
    consensus: Arc<ConsensusEngine>,
    config: MiningConfig,
}

impl Miner {
    pub fn new(ledger: Arc<Ledger>, consensus: Arc<ConsensusEngine>, config: MiningConfig) -> Miner {
        Miner {
            ledger,
            consensus,
            config,
        }
    }

    pub fn get_config(&self) -> &MiningConfig {
        &self.config
    }

    /// Mine the next block from up to the configured cap of `pending`
    /// transactions. Runs until a nonce is found.
    pub fn mine(&self, pending: &[Transaction], miner_address: &str, difficulty: u32) -> MiningResult {
        self.produce(pending, miner_address, difficulty, None, None)
    }

    /// As [`Miner::mine`], stopping early once `cancel` is raised
    pub fn mine_with_cancel(
        &self,
        pending: &[Transaction],
        miner_address: &str,
        difficulty: u32,
        cancel: &AtomicBool,
    ) -> MiningResult {
        self.produce(pending, miner_address, difficulty, Some(cancel), None)
    }

    /// As [`Miner::mine`], giving up after `max_attempts` hashes
    pub fn mine_bounded(
        &self,
        pending: &[Transaction],
        miner_address: &str,
        difficulty: u32,
        max_attempts: u64,
    ) -> MiningResult {
        self.produce(pending, miner_address, difficulty, None, Some(max_attempts))
    }

    fn produce(
        &self,
        pending: &[Transaction],
        miner_address: &str,
        difficulty: u32,
        cancel: Option<&AtomicBool>,
        max_attempts: Option<u64>,
    ) -> MiningResult {
        if !validate_address(miner_address) {
            return MiningResult::Failure {
                message: format!("Invalid miner address: {miner_address}"),
            };
        }
        let candidate = match self.build_candidate(pending, miner_address, difficulty) {
            Ok(candidate) => candidate,
            Err(e) => {
                return MiningResult::Failure {
                    message: format!("Failed to build candidate block: {e}"),
                }
            }
        };

        let crypto = self.ledger.crypto().clone();
        let (nonce, hash, attempts, elapsed_ms) =
            match ProofOfWork::search(&candidate, crypto.as_ref(), cancel, max_attempts) {
                SearchOutcome::Found {
                    nonce,
                    hash,
                    attempts,
                    elapsed_ms,
                } => (nonce, hash, attempts, elapsed_ms),
                SearchOutcome::Cancelled { attempts } | SearchOutcome::Exhausted { attempts } => {
                    warn!(
                        "Mining block {} stopped after {attempts} attempts",
                        candidate.get_index()
                    );
                    return MiningResult::Cancelled { attempts };
                }
            };

        let mut block = candidate;
        block.seal(nonce, hash);

        let report = self.consensus.validate_detailed(&block);
        if !report.is_valid() {
            return MiningResult::Failure {
                message: format!(
                    "Block {} rejected by consensus: {}",
                    block.get_index(),
                    report.reasons.join("; ")
                ),
            };
        }
        if let Err(e) = self.ledger.append(&block) {
            return MiningResult::Failure {
                message: format!("Failed to append block {}: {e}", block.get_index()),
            };
        }
        block.confirm_transactions();

        let reward = self.calculate_mining_reward(block.get_index());
        info!(
            "Mined block {} ({} transactions) hash {} after {attempts} attempts in {elapsed_ms}ms, reward {reward}",
            block.get_index(),
            block.get_transactions().len(),
            block.get_hash()
        );
        MiningResult::Success {
            block,
            reward,
            attempts,
            elapsed_ms,
        }
    }

    /// Unmined block on the current tip. Transactions already on chain are
    /// skipped and the rest are capped in the order given.
    pub fn build_candidate(
        &self,
        pending: &[Transaction],
        producer: &str,
        difficulty: u32,
    ) -> Result<Block> {
        let index = (self.ledger.height() + 1) as u64;
        let previous_hash = self.ledger.next_previous_hash()?;
        let transactions: Vec<Transaction> = pending
            .iter()
            .filter(|tx| !self.ledger.is_confirmed(tx.get_hash()))
            .take(self.config.max_transactions_per_block)
            .cloned()
            .collect();
        Ok(Block::new_candidate(
            index,
            &previous_hash,
            current_timestamp()?,
            difficulty,
            producer,
            transactions,
            self.ledger.crypto().as_ref(),
        ))
    }

    /// `initial_reward / 2^(index / halving_interval)`
    pub fn calculate_mining_reward(&self, block_index: u64) -> Amount {
        block_reward(
            self.config.initial_reward,
            self.config.halving_interval,
            block_index,
        )
    }

    /// Retarget the ledger's difficulty from the recent block interval
    pub fn retarget(&self) -> Result<u32> {
        let current = self.ledger.difficulty()?;
        let recent = self.ledger.recent_blocks(self.config.retarget_window)?;
        let next = DifficultyAdjustment::next_difficulty(
            current,
            &recent,
            self.config.target_block_interval_ms,
        );
        if next != current {
            self.ledger.set_difficulty(next)?;
        }
        Ok(next)
    }
}
