//! # Keystone Chain
//!
//! A single-node blockchain ledger with pluggable consensus: proof of work,
//! stake-weighted proof of stake, or a hybrid requiring both. Blocks are
//! hash-linked and Merkle-summarized, pending transactions wait in
//! fee-ordered pools, and a sync manager catches the local chain up with
//! the tallest peer through an injectable transport.
//!
//! ## Layout
//! - `core/`: blocks, transactions, the ledger, consensus, staking, mining
//! - `storage/`: block and stake stores (memory, sled), transaction pools,
//!   balances
//! - `network/`: peer registry, peer transport contract, synchronization
//! - `node/`: `ChainNode`, the administrative surface tying it all together
//! - `config/`: TOML configuration with environment overrides
//! - `utils/`: crypto provider, keys and addresses, bincode helpers
//! - `cli/`: command-line interface

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod node;
pub mod storage;
pub mod utils;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::Config;
pub use core::{
    merkle_root, select_weighted, validate_range, Amount, Block, BlockValidation, ChainInfo,
    ConsensusEngine, ConsensusStrategy, ConsensusType, Decimal8, DifficultyAdjustment, Ledger,
    Miner, MiningConfig, MiningResult, ProofOfStake, ProofOfWork, SearchOutcome, Stake,
    StakeRegistry, StakeStatus, Transaction, TransactionStatus, GENESIS_PREVIOUS_HASH,
};
pub use error::{BlockchainError, ChainError, ErrorKind, Result};
pub use network::{
    InMemoryTransport, Node, NodeStatus, PeerRegistry, PeerTransport, SyncConfig, SyncManager,
    SyncOutcome, SyncReport,
};
pub use node::ChainNode;
pub use storage::{
    AccountBook, BlockStore, MemoryBlockStore, MemoryStakeStore, PoolManager, SledBlockStore,
    SledStakeStore, StakeStore, TransactionPool,
};
pub use utils::{
    address_from_public_key, current_timestamp, validate_address, CryptoProvider, KeyPair,
    Sha256Crypto,
};
