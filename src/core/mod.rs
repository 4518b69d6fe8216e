//! Core ledger functionality
//!
//! Blocks, transactions, Merkle aggregation, the ledger itself, and the
//! consensus machinery (proof-of-work, proof-of-stake, hybrid) together
//! with block production and difficulty retargeting.

pub mod block;
pub mod consensus;
pub mod difficulty;
pub mod ledger;
pub mod merkle;
pub mod miner;
pub mod monetary;
pub mod proof_of_stake;
pub mod proof_of_work;
pub mod stake;
pub mod transaction;

pub use block::{Block, BlockValidation, GENESIS_PREVIOUS_HASH};
pub use consensus::{ConsensusEngine, ConsensusStrategy, ConsensusType};
pub use difficulty::DifficultyAdjustment;
pub use ledger::{validate_range, ChainInfo, Ledger};
pub use merkle::{merkle_root, MerkleProof, MerkleTree, ProofElement};
pub use miner::{Miner, MiningConfig, MiningResult, MAX_TRANSACTIONS_PER_BLOCK};
pub use monetary::{Amount, Decimal8, HALVING_INTERVAL, INITIAL_BLOCK_REWARD};
pub use proof_of_stake::{select_weighted, ProofOfStake};
pub use proof_of_work::{ProofOfWork, SearchOutcome};
pub use stake::{Stake, StakeRegistry, StakeStatus};
pub use transaction::{Transaction, TransactionStatus};
