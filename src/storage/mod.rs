//! Data storage and persistence
//!
//! Block storage behind the `BlockStore` contract (in memory or sled),
//! stake records, the pending-transaction pools, and the minimal account
//! book.

pub mod accounts;
pub mod block_store;
pub mod stake_store;
pub mod transaction_pool;

pub use accounts::AccountBook;
pub use block_store::{BlockStore, MemoryBlockStore, SledBlockStore};
pub use stake_store::{MemoryStakeStore, SledStakeStore, StakeStore};
pub use transaction_pool::{PoolManager, TransactionPool};
