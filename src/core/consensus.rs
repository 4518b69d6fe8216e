// Consensus mode is a value held by each engine, not a process-wide switch,
// so independent chains can run different modes side by side.

use crate::core::block::BlockValidation;
use crate::core::proof_of_stake::ProofOfStake;
use crate::core::proof_of_work::ProofOfWork;
use crate::core::Block;
use crate::error::{BlockchainError, Result};
use crate::utils::CryptoProvider;
use log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusType {
    #[default]
    ProofOfWork,
    ProofOfStake,
    Hybrid,
}

impl ConsensusType {
    pub fn uses_work(self) -> bool {
        matches!(self, ConsensusType::ProofOfWork | ConsensusType::Hybrid)
    }

    pub fn uses_stake(self) -> bool {
        matches!(self, ConsensusType::ProofOfStake | ConsensusType::Hybrid)
    }
}

impl fmt::Display for ConsensusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsensusType::ProofOfWork => "PROOF_OF_WORK",
            ConsensusType::ProofOfStake => "PROOF_OF_STAKE",
            ConsensusType::Hybrid => "HYBRID",
        };
        f.write_str(name)
    }
}

impl FromStr for ConsensusType {
    type Err = BlockchainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "pow" | "proof_of_work" => Ok(ConsensusType::ProofOfWork),
            "pos" | "proof_of_stake" => Ok(ConsensusType::ProofOfStake),
            "hybrid" => Ok(ConsensusType::Hybrid),
            _ => Err(BlockchainError::InvalidArgument(format!(
                "Invalid consensus type: {s}. Valid options: pow, pos, hybrid"
            ))),
        }
    }
}

/// The active validation rules, carrying the concrete validators they need
#[derive(Clone)]
pub enum ConsensusStrategy {
    ProofOfWork(ProofOfWork),
    ProofOfStake(ProofOfStake),
    Hybrid(ProofOfWork, ProofOfStake),
}

impl ConsensusStrategy {
    pub fn build(mode: ConsensusType, stake: &ProofOfStake) -> ConsensusStrategy {
        match mode {
            ConsensusType::ProofOfWork => ConsensusStrategy::ProofOfWork(ProofOfWork),
            ConsensusType::ProofOfStake => ConsensusStrategy::ProofOfStake(stake.clone()),
            ConsensusType::Hybrid => ConsensusStrategy::Hybrid(ProofOfWork, stake.clone()),
        }
    }

    pub fn mode(&self) -> ConsensusType {
        match self {
            ConsensusStrategy::ProofOfWork(_) => ConsensusType::ProofOfWork,
            ConsensusStrategy::ProofOfStake(_) => ConsensusType::ProofOfStake,
            ConsensusStrategy::Hybrid(..) => ConsensusType::Hybrid,
        }
    }

    fn work(&self) -> Option<&ProofOfWork> {
        match self {
            ConsensusStrategy::ProofOfWork(pow) | ConsensusStrategy::Hybrid(pow, _) => Some(pow),
            ConsensusStrategy::ProofOfStake(_) => None,
        }
    }

    fn stake(&self) -> Option<&ProofOfStake> {
        match self {
            ConsensusStrategy::ProofOfStake(pos) | ConsensusStrategy::Hybrid(_, pos) => Some(pos),
            ConsensusStrategy::ProofOfWork(_) => None,
        }
    }
}

pub struct ConsensusEngine {
    strategy: RwLock<ConsensusStrategy>,
    stake: ProofOfStake,
    crypto: Arc<dyn CryptoProvider>,
}

impl ConsensusEngine {
    pub fn new(
        mode: ConsensusType,
        stake: ProofOfStake,
        crypto: Arc<dyn CryptoProvider>,
    ) -> ConsensusEngine {
        ConsensusEngine {
            strategy: RwLock::new(ConsensusStrategy::build(mode, &stake)),
            stake,
            crypto,
        }
    }

    pub fn mode(&self) -> Result<ConsensusType> {
        Ok(self.strategy.read()?.mode())
    }

    pub fn set_mode(&self, mode: ConsensusType) -> Result<()> {
        let mut strategy = self.strategy.write()?;
        let previous = strategy.mode();
        *strategy = ConsensusStrategy::build(mode, &self.stake);
        if previous != mode {
            info!("Consensus mode switched: {previous} -> {mode}");
        }
        Ok(())
    }

    pub fn proof_of_stake(&self) -> &ProofOfStake {
        &self.stake
    }

    pub fn validate(&self, block: &Block) -> bool {
        self.validate_detailed(block).is_valid()
    }

    /// Structural block checks plus the active mode's proof rules. Genesis
    /// carries no validator, so the stake rule is skipped for index 0.
    pub fn validate_detailed(&self, block: &Block) -> BlockValidation {
        let mut report = block.validate(self.crypto.as_ref());
        let strategy = match self.strategy.read() {
            Ok(strategy) => strategy.clone(),
            Err(e) => {
                report.fail(format!("consensus state unavailable: {e}"));
                return report;
            }
        };

        if strategy.work().is_some() && !ProofOfWork::validate(block, self.crypto.as_ref()) {
            report.fail(format!(
                "block {} does not carry a valid proof of work at difficulty {}",
                block.get_index(),
                block.get_difficulty()
            ));
        }
        if let Some(pos) = strategy.stake() {
            if !block.is_genesis() && !pos.validate(block) {
                report.fail(format!(
                    "block {} producer {} is not an eligible validator",
                    block.get_index(),
                    block.get_miner()
                ));
            }
        }
        report
    }

    /// Stake-weighted pick for the next block; `None` under proof of work,
    /// which has no validator concept
    pub fn select_next_validator<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Option<String>> {
        let strategy = self.strategy.read()?.clone();
        match strategy.stake() {
            Some(pos) => pos.select_validator(rng).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::GENESIS_PREVIOUS_HASH;
    use crate::core::monetary::{Amount, Decimal8};
    use crate::core::stake::StakeRegistry;
    use crate::core::transaction::tests::{ALICE, BOB};
    use crate::utils::Sha256Crypto;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn engine(mode: ConsensusType) -> ConsensusEngine {
        let registry = Arc::new(StakeRegistry::new());
        registry.stake(ALICE, Amount::from_coins(20), None).unwrap();
        registry.stake(BOB, Amount::from_coins(2), None).unwrap();
        let pos = ProofOfStake::new(
            registry,
            Amount::from_coins(10),
            Decimal8::parse("0.05").unwrap(),
        );
        ConsensusEngine::new(mode, pos, Arc::new(Sha256Crypto))
    }

    fn block(index: u64, difficulty: u32, producer: &str, mined: bool) -> Block {
        let mut block = Block::new_candidate(
            index,
            GENESIS_PREVIOUS_HASH,
            1_000,
            difficulty,
            producer,
            vec![],
            &Sha256Crypto,
        );
        if mined {
            assert!(ProofOfWork::run(&mut block, &Sha256Crypto));
        }
        block
    }

    #[test]
    fn test_parse_consensus_type() {
        assert_eq!("pow".parse::<ConsensusType>().unwrap(), ConsensusType::ProofOfWork);
        assert_eq!(
            "PROOF_OF_STAKE".parse::<ConsensusType>().unwrap(),
            ConsensusType::ProofOfStake
        );
        assert_eq!("hybrid".parse::<ConsensusType>().unwrap(), ConsensusType::Hybrid);
        assert!("raft".parse::<ConsensusType>().is_err());
        assert_eq!(ConsensusType::Hybrid.to_string(), "HYBRID");
    }

    #[test]
    fn test_pow_mode_checks_the_proof() {
        let engine = engine(ConsensusType::ProofOfWork);
        assert!(engine.validate(&block(1, 2, BOB, true)));
        // unmined candidate at difficulty 8 will not start with eight zeros
        assert!(!engine.validate(&block(1, 8, BOB, false)));
    }

    #[test]
    fn test_pos_mode_checks_the_validator() {
        let engine = engine(ConsensusType::ProofOfStake);
        assert!(engine.validate(&block(1, 0, ALICE, false)));
        let report = engine.validate_detailed(&block(1, 0, BOB, false));
        assert_eq!(report.reasons.len(), 1);
        // genesis has no validator to check
        assert!(engine.validate(&block(0, 0, BOB, false)));
    }

    #[test]
    fn test_hybrid_requires_both() {
        let engine = engine(ConsensusType::Hybrid);
        assert!(engine.validate(&block(1, 1, ALICE, true)));
        assert!(!engine.validate(&block(1, 1, BOB, true)));
        assert!(!engine.validate(&block(1, 8, ALICE, false)));
    }

    #[test]
    fn test_validator_selection_depends_on_mode() {
        let engine = engine(ConsensusType::ProofOfWork);
        let mut rng = StdRng::seed_from_u64(9);
        assert_eq!(engine.select_next_validator(&mut rng).unwrap(), None);

        engine.set_mode(ConsensusType::ProofOfStake).unwrap();
        assert_eq!(engine.mode().unwrap(), ConsensusType::ProofOfStake);
        assert_eq!(
            engine.select_next_validator(&mut rng).unwrap(),
            Some(ALICE.to_string())
        );
    }
}
