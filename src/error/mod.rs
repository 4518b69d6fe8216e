//! Error handling for the ledger core
//!
//! Every failure maps onto one of four caller-facing categories (see
//! [`ErrorKind`]). Ledger appends have their own [`ChainError`] so the
//! exact integrity violation is visible to callers that care.

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

/// Caller-facing error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown chain, block, pool, peer or stake
    NotFound,
    /// Malformed input, rejected before any mutation
    InvalidArgument,
    /// Operation not allowed in the current state, nothing was mutated
    InvalidState,
    /// Proof invalid or no validator available
    ConsensusFailure,
    /// Storage, serialization, crypto or transport failure
    Internal,
}

/// Integrity violations reported by `Ledger::append`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Block index is not `height + 1`
    InvalidSequence { expected: u64, got: u64 },
    /// Stored hash does not match the recomputed hash
    InvalidHash {
        index: u64,
        stored: String,
        computed: String,
    },
    /// `previous_hash` does not point at the predecessor
    InvalidLink {
        index: u64,
        expected: String,
        got: String,
    },
    /// Block carries a transaction that is already confirmed
    DuplicateTransaction(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::InvalidSequence { expected, got } => {
                write!(f, "invalid sequence: expected index {expected}, got {got}")
            }
            ChainError::InvalidHash {
                index,
                stored,
                computed,
            } => write!(
                f,
                "invalid hash at index {index}: stored {stored}, computed {computed}"
            ),
            ChainError::InvalidLink {
                index,
                expected,
                got,
            } => write!(
                f,
                "invalid link at index {index}: expected previous hash {expected}, got {got}"
            ),
            ChainError::DuplicateTransaction(hash) => {
                write!(f, "transaction {hash} is already confirmed")
            }
        }
    }
}

impl std::error::Error for ChainError {}

/// Error types for all ledger, consensus, pool and sync operations
#[derive(Debug, Clone)]
pub enum BlockchainError {
    /// Unknown entity
    NotFound(String),
    /// Malformed address, non-positive amount, out-of-range difficulty
    InvalidArgument(String),
    /// Generic state conflict (stake locked, pool name taken, ...)
    InvalidState(String),
    /// Pool is deactivated
    PoolInactive(String),
    /// Pool reached its capacity
    PoolFull {
        pool: String,
        current: usize,
        max: usize,
    },
    /// Transaction hash already accepted
    DoubleSpend(String),
    /// Proof invalid or validator rejected
    ConsensusFailure(String),
    /// No address satisfies the minimum stake
    NoEligibleValidators,
    /// Eligible validators exist but their stake sums to zero
    ZeroTotalStake,
    /// Ledger append rejected
    Chain(ChainError),
    /// Database-related errors
    Database(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Cryptographic operation errors
    Crypto(String),
    /// Peer transport errors
    Network(String),
    /// Configuration errors
    Config(String),
    /// File I/O errors
    Io(String),
}

impl BlockchainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BlockchainError::NotFound(_) => ErrorKind::NotFound,
            BlockchainError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            BlockchainError::InvalidState(_)
            | BlockchainError::PoolInactive(_)
            | BlockchainError::PoolFull { .. }
            | BlockchainError::DoubleSpend(_)
            | BlockchainError::Chain(_) => ErrorKind::InvalidState,
            BlockchainError::ConsensusFailure(_)
            | BlockchainError::NoEligibleValidators
            | BlockchainError::ZeroTotalStake => ErrorKind::ConsensusFailure,
            BlockchainError::Database(_)
            | BlockchainError::Serialization(_)
            | BlockchainError::Crypto(_)
            | BlockchainError::Network(_)
            | BlockchainError::Config(_)
            | BlockchainError::Io(_) => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::NotFound(what) => write!(f, "Not found: {what}"),
            BlockchainError::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            BlockchainError::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
            BlockchainError::PoolInactive(pool) => write!(f, "Pool {pool} is inactive"),
            BlockchainError::PoolFull { pool, current, max } => {
                write!(f, "Pool {pool} is full ({current}/{max})")
            }
            BlockchainError::DoubleSpend(hash) => {
                write!(f, "Double spend detected: transaction {hash} already accepted")
            }
            BlockchainError::ConsensusFailure(msg) => write!(f, "Consensus failure: {msg}"),
            BlockchainError::NoEligibleValidators => {
                write!(f, "No validator available: no eligible validators")
            }
            BlockchainError::ZeroTotalStake => {
                write!(f, "No validator available: total eligible stake is zero")
            }
            BlockchainError::Chain(err) => write!(f, "Chain error: {err}"),
            BlockchainError::Database(msg) => write!(f, "Database error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::Network(msg) => write!(f, "Network error: {msg}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<ChainError> for BlockchainError {
    fn from(err: ChainError) -> Self {
        BlockchainError::Chain(err)
    }
}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for BlockchainError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        BlockchainError::InvalidState(format!("lock poisoned: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            BlockchainError::NotFound("pool x".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            BlockchainError::PoolFull {
                pool: "main".into(),
                current: 2,
                max: 2
            }
            .kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            BlockchainError::Chain(ChainError::InvalidSequence {
                expected: 3,
                got: 5
            })
            .kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            BlockchainError::NoEligibleValidators.kind(),
            ErrorKind::ConsensusFailure
        );
        assert_eq!(
            BlockchainError::ZeroTotalStake.kind(),
            ErrorKind::ConsensusFailure
        );
    }

    #[test]
    fn test_pool_full_message_reports_sizes() {
        let err = BlockchainError::PoolFull {
            pool: "main".into(),
            current: 10,
            max: 10,
        };
        assert_eq!(err.to_string(), "Pool main is full (10/10)");
    }
}
