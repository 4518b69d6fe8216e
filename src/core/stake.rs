// Staked balances and their lifecycle. Stakes are keyed by a generated id so
// one address can hold several; eligibility and selection work on the
// per-address sum of bonded (ACTIVE or LOCKED) stakes.

use crate::core::monetary::{staking_reward, Amount, Decimal8};
use crate::error::{BlockchainError, Result};
use crate::utils::validate_address;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum StakeStatus {
    Active,
    Locked,
    Unlocked,
    Withdrawn,
}

impl StakeStatus {
    /// Bonded stakes count towards validator eligibility and earn rewards
    pub fn is_bonded(self) -> bool {
        matches!(self, StakeStatus::Active | StakeStatus::Locked)
    }
}

impl fmt::Display for StakeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StakeStatus::Active => "ACTIVE",
            StakeStatus::Locked => "LOCKED",
            StakeStatus::Unlocked => "UNLOCKED",
            StakeStatus::Withdrawn => "WITHDRAWN",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Stake {
    id: String,
    address: String,
    amount: Amount,
    locked_until: Option<i64>,
    status: StakeStatus,
    accrued_rewards: Amount,
    weight: Option<Decimal8>,
}

impl Stake {
    pub fn get_id(&self) -> &str {
        self.id.as_str()
    }

    pub fn get_address(&self) -> &str {
        self.address.as_str()
    }

    pub fn get_amount(&self) -> Amount {
        self.amount
    }

    pub fn get_locked_until(&self) -> Option<i64> {
        self.locked_until
    }

    pub fn get_status(&self) -> StakeStatus {
        self.status
    }

    pub fn get_accrued_rewards(&self) -> Amount {
        self.accrued_rewards
    }

    /// Reward multiplier, 1 when unset
    pub fn get_weight(&self) -> Decimal8 {
        self.weight.unwrap_or(Decimal8::ONE)
    }

    fn lock_expired(&self, now: i64) -> bool {
        self.locked_until.map_or(true, |until| now >= until)
    }
}

/// Thread-safe collection of stakes, keyed by stake id
#[derive(Default)]
pub struct StakeRegistry {
    inner: RwLock<HashMap<String, Stake>>,
}

impl StakeRegistry {
    pub fn new() -> StakeRegistry {
        StakeRegistry::default()
    }

    /// Open a new ACTIVE stake; returns its id
    pub fn stake(&self, address: &str, amount: Amount, weight: Option<Decimal8>) -> Result<String> {
        if !validate_address(address) {
            return Err(BlockchainError::InvalidArgument(format!(
                "Invalid staking address: {address}"
            )));
        }
        if amount.is_zero() {
            return Err(BlockchainError::InvalidArgument(
                "Stake amount must be positive".to_string(),
            ));
        }
        if weight.is_some_and(Decimal8::is_zero) {
            return Err(BlockchainError::InvalidArgument(
                "Stake weight must be positive".to_string(),
            ));
        }

        let stake = Stake {
            id: Uuid::new_v4().to_string(),
            address: address.to_ascii_lowercase(),
            amount,
            locked_until: None,
            status: StakeStatus::Active,
            accrued_rewards: Amount::ZERO,
            weight,
        };
        let id = stake.id.clone();
        self.inner.write()?.insert(id.clone(), stake);
        info!("Staked {amount} for {address} (stake {id})");
        Ok(id)
    }

    /// ACTIVE -> LOCKED until `until`
    pub fn lock(&self, stake_id: &str, until: i64, now: i64) -> Result<()> {
        if until <= now {
            return Err(BlockchainError::InvalidArgument(format!(
                "Lock deadline {until} is not in the future"
            )));
        }
        self.update(stake_id, |stake| match stake.status {
            StakeStatus::Active => {
                stake.status = StakeStatus::Locked;
                stake.locked_until = Some(until);
                Ok(())
            }
            other => Err(BlockchainError::InvalidState(format!(
                "Cannot lock stake {} in state {other}",
                stake.id
            ))),
        })
    }

    /// ACTIVE or expired LOCKED -> UNLOCKED
    pub fn unlock(&self, stake_id: &str, now: i64) -> Result<()> {
        self.update(stake_id, |stake| match stake.status {
            StakeStatus::Active => {
                stake.status = StakeStatus::Unlocked;
                Ok(())
            }
            StakeStatus::Locked if stake.lock_expired(now) => {
                stake.status = StakeStatus::Unlocked;
                Ok(())
            }
            StakeStatus::Locked => Err(BlockchainError::InvalidState(format!(
                "Stake {} is locked until {}",
                stake.id,
                stake.locked_until.unwrap_or_default()
            ))),
            other => Err(BlockchainError::InvalidState(format!(
                "Cannot unlock stake {} in state {other}",
                stake.id
            ))),
        })
    }

    /// Withdraw principal plus accrued rewards. WITHDRAWN is terminal and a
    /// LOCKED stake is refused until its deadline passes. The withdrawn
    /// record keeps the rewards it paid out.
    pub fn withdraw(&self, stake_id: &str, now: i64) -> Result<Amount> {
        let mut payout = Amount::ZERO;
        self.update(stake_id, |stake| {
            match stake.status {
                StakeStatus::Withdrawn => {
                    return Err(BlockchainError::InvalidState(format!(
                        "Stake {} is already withdrawn",
                        stake.id
                    )))
                }
                StakeStatus::Locked if !stake.lock_expired(now) => {
                    return Err(BlockchainError::InvalidState(format!(
                        "Stake {} is locked until {}",
                        stake.id,
                        stake.locked_until.unwrap_or_default()
                    )))
                }
                _ => {}
            }
            payout = stake.amount.saturating_add(stake.accrued_rewards);
            stake.status = StakeStatus::Withdrawn;
            Ok(())
        })?;
        info!("Withdrew {payout} from stake {stake_id}");
        Ok(payout)
    }

    fn update<F>(&self, stake_id: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut Stake) -> Result<()>,
    {
        let mut inner = self.inner.write()?;
        let stake = inner
            .get_mut(stake_id)
            .ok_or_else(|| BlockchainError::NotFound(format!("stake {stake_id}")))?;
        change(stake)
    }

    pub fn get(&self, stake_id: &str) -> Result<Option<Stake>> {
        Ok(self.inner.read()?.get(stake_id).cloned())
    }

    /// Put back a stake loaded from storage, replacing any record with the
    /// same id
    pub fn restore(&self, stake: Stake) -> Result<()> {
        if !validate_address(&stake.address) {
            return Err(BlockchainError::InvalidArgument(format!(
                "Invalid staking address: {}",
                stake.address
            )));
        }
        self.inner.write()?.insert(stake.id.clone(), stake);
        Ok(())
    }

    /// Every stake in any state, ordered by id
    pub fn all(&self) -> Result<Vec<Stake>> {
        let mut stakes: Vec<Stake> = self.inner.read()?.values().cloned().collect();
        stakes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(stakes)
    }

    pub fn stakes_for(&self, address: &str) -> Result<Vec<Stake>> {
        let mut stakes: Vec<Stake> = self
            .inner
            .read()?
            .values()
            .filter(|s| s.address.eq_ignore_ascii_case(address))
            .cloned()
            .collect();
        stakes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(stakes)
    }

    /// Sum of the address's bonded stakes
    pub fn bonded_stake(&self, address: &str) -> Result<Amount> {
        Ok(self
            .inner
            .read()?
            .values()
            .filter(|s| s.status.is_bonded() && s.address.eq_ignore_ascii_case(address))
            .fold(Amount::ZERO, |total, s| total.saturating_add(s.amount)))
    }

    /// Bonded stake per address, ordered by address
    pub fn bonded_by_address(&self) -> Result<Vec<(String, Amount)>> {
        let inner = self.inner.read()?;
        let mut totals: BTreeMap<String, Amount> = BTreeMap::new();
        for stake in inner.values().filter(|s| s.status.is_bonded()) {
            let entry = totals.entry(stake.address.clone()).or_default();
            *entry = entry.saturating_add(stake.amount);
        }
        Ok(totals.into_iter().collect())
    }

    /// Addresses whose bonded stake reaches `min_stake`, ordered by address
    pub fn eligible_validators(&self, min_stake: Amount) -> Result<Vec<(String, Amount)>> {
        Ok(self
            .bonded_by_address()?
            .into_iter()
            .filter(|(_, amount)| *amount >= min_stake)
            .collect())
    }

    /// Credit one period of rewards to every bonded stake; returns the total
    pub fn accrue_rewards(&self, annual_rate: Decimal8) -> Result<Amount> {
        let mut inner = self.inner.write()?;
        let mut total = Amount::ZERO;
        for stake in inner.values_mut().filter(|s| s.status.is_bonded()) {
            let reward = staking_reward(stake.amount, annual_rate, stake.get_weight());
            stake.accrued_rewards = stake.accrued_rewards.saturating_add(reward);
            total = total.saturating_add(reward);
        }
        debug!("Accrued {total} in staking rewards");
        Ok(total)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::tests::{ALICE, BOB};
    use crate::error::ErrorKind;

    fn coins(n: u64) -> Amount {
        Amount::from_coins(n)
    }

    #[test]
    fn test_stake_rejects_bad_input() {
        let registry = StakeRegistry::new();
        assert_eq!(
            registry.stake("alice", coins(1), None).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert!(registry.stake(ALICE, Amount::ZERO, None).is_err());
        assert!(registry.stake(ALICE, coins(1), Some(Decimal8::ZERO)).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_bonded_stake_sums_per_address() {
        let registry = StakeRegistry::new();
        registry.stake(ALICE, coins(10), None).unwrap();
        let second = registry.stake(ALICE, coins(5), None).unwrap();
        registry.stake(BOB, coins(3), None).unwrap();
        assert_eq!(registry.bonded_stake(ALICE).unwrap(), coins(15));

        registry.unlock(&second, 0).unwrap();
        assert_eq!(registry.bonded_stake(ALICE).unwrap(), coins(10));

        let eligible = registry.eligible_validators(coins(5)).unwrap();
        assert_eq!(eligible, vec![(ALICE.to_string(), coins(10))]);
        assert_eq!(registry.bonded_by_address().unwrap().len(), 2);
    }

    #[test]
    fn test_locked_stake_refuses_early_withdrawal() {
        let registry = StakeRegistry::new();
        let id = registry.stake(ALICE, coins(10), None).unwrap();
        registry.lock(&id, 1_000, 0).unwrap();
        assert_eq!(registry.bonded_stake(ALICE).unwrap(), coins(10));

        let err = registry.withdraw(&id, 999).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(registry.unlock(&id, 500).is_err());

        assert_eq!(registry.withdraw(&id, 1_000).unwrap(), coins(10));
        assert_eq!(
            registry.get(&id).unwrap().unwrap().get_status(),
            StakeStatus::Withdrawn
        );
    }

    #[test]
    fn test_withdrawn_is_terminal() {
        let registry = StakeRegistry::new();
        let id = registry.stake(ALICE, coins(2), None).unwrap();
        registry.withdraw(&id, 0).unwrap();
        assert!(registry.withdraw(&id, 0).is_err());
        assert!(registry.lock(&id, 10, 0).is_err());
        assert!(registry.unlock(&id, 0).is_err());
        assert_eq!(registry.bonded_stake(ALICE).unwrap(), Amount::ZERO);
    }

    #[test]
    fn test_unknown_stake_is_not_found() {
        let registry = StakeRegistry::new();
        assert_eq!(
            registry.unlock("missing", 0).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert!(registry.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_rewards_accrue_on_bonded_stakes_only() {
        let registry = StakeRegistry::new();
        let weighted = registry
            .stake(ALICE, coins(365), Some(Decimal8::parse("2").unwrap()))
            .unwrap();
        let unbonded = registry.stake(BOB, coins(365), None).unwrap();
        registry.unlock(&unbonded, 0).unwrap();

        let total = registry
            .accrue_rewards(Decimal8::parse("0.1").unwrap())
            .unwrap();
        // 365 × 0.1 / 365 × 2
        assert_eq!(total, Decimal8::parse("0.2").unwrap());
        let stake = registry.get(&weighted).unwrap().unwrap();
        assert_eq!(stake.get_accrued_rewards(), total);
        assert_eq!(registry.withdraw(&weighted, 0).unwrap(), coins(365).saturating_add(total));
        // the withdrawn record still shows what it paid and stops accruing
        registry.accrue_rewards(Decimal8::parse("0.1").unwrap()).unwrap();
        assert_eq!(registry.get(&weighted).unwrap().unwrap().get_accrued_rewards(), total);
    }

    #[test]
    fn test_restore_puts_stake_back() {
        let source = StakeRegistry::new();
        let id = source.stake(ALICE, coins(12), None).unwrap();
        source.lock(&id, 50, 0).unwrap();
        let saved = source.get(&id).unwrap().unwrap();

        let registry = StakeRegistry::new();
        registry.restore(saved.clone()).unwrap();
        assert_eq!(registry.all().unwrap(), vec![saved]);
        assert_eq!(registry.bonded_stake(ALICE).unwrap(), coins(12));
        assert!(registry.withdraw(&id, 10).is_err());
    }
}
