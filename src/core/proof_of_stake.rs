use crate::core::monetary::{staking_reward, Amount, Decimal8};
use crate::core::stake::{Stake, StakeRegistry};
use crate::core::Block;
use crate::error::{BlockchainError, Result};
use log::debug;
use rand::Rng;
use std::sync::Arc;

/// Stake-weighted validator eligibility, selection and rewards
#[derive(Clone)]
pub struct ProofOfStake {
    stakes: Arc<StakeRegistry>,
    min_stake: Amount,
    annual_rate: Decimal8,
}

impl ProofOfStake {
    pub fn new(stakes: Arc<StakeRegistry>, min_stake: Amount, annual_rate: Decimal8) -> ProofOfStake {
        ProofOfStake {
            stakes,
            min_stake,
            annual_rate,
        }
    }

    pub fn get_min_stake(&self) -> Amount {
        self.min_stake
    }

    pub fn get_annual_rate(&self) -> Decimal8 {
        self.annual_rate
    }

    pub fn stakes(&self) -> &Arc<StakeRegistry> {
        &self.stakes
    }

    pub fn eligible_validators(&self) -> Result<Vec<(String, Amount)>> {
        self.stakes.eligible_validators(self.min_stake)
    }

    /// The address holds bonded stake summing to at least the minimum
    pub fn is_eligible(&self, address: &str) -> Result<bool> {
        Ok(self
            .eligible_validators()?
            .iter()
            .any(|(validator, _)| validator.eq_ignore_ascii_case(address)))
    }

    /// The block's declared producer must currently be an eligible validator
    pub fn validate(&self, block: &Block) -> bool {
        match self.is_eligible(block.get_miner()) {
            Ok(eligible) => eligible,
            Err(e) => {
                log::error!("Stake lookup failed while validating block: {e}");
                false
            }
        }
    }

    pub fn select_validator<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<String> {
        select_weighted(&self.stakes.bonded_by_address()?, self.min_stake, rng)
    }

    /// One period of rewards for `stake` at the configured annual rate
    pub fn calculate_reward(&self, stake: &Stake) -> Amount {
        staking_reward(stake.get_amount(), self.annual_rate, stake.get_weight())
    }
}

/// Roulette-wheel selection over `stakes` (address, amount) entries that
/// reach `min_stake`. Draws uniformly in `[0, total)` and returns the first
/// address whose running sum is at least the draw; falls back to the first
/// eligible address.
pub fn select_weighted<R: Rng + ?Sized>(
    stakes: &[(String, Amount)],
    min_stake: Amount,
    rng: &mut R,
) -> Result<String> {
    let eligible: Vec<&(String, Amount)> = stakes
        .iter()
        .filter(|(_, amount)| *amount >= min_stake)
        .collect();
    let first = match eligible.first() {
        Some((address, _)) => address.clone(),
        None => return Err(BlockchainError::NoEligibleValidators),
    };

    let total: u64 = eligible
        .iter()
        .fold(0u64, |sum, (_, amount)| sum.saturating_add(amount.units()));
    if total == 0 {
        return Err(BlockchainError::ZeroTotalStake);
    }

    let draw = rng.gen_range(0..total);
    let mut cumulative = 0u64;
    for (address, amount) in &eligible {
        cumulative = cumulative.saturating_add(amount.units());
        if cumulative >= draw {
            debug!("Selected validator {address} (draw {draw} of {total})");
            return Ok(address.clone());
        }
    }
    Ok(first)
}
