// Durable stake records. Stakes are not on chain, so the node writes each
// record here after every lifecycle change and reloads them on open.

use crate::core::Stake;
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use sled::Tree;
use std::collections::BTreeMap;
use std::sync::RwLock;

pub(crate) const STAKES_TREE: &str = "stakes";

pub trait StakeStore: Send + Sync {
    /// Every saved stake, ordered by id
    fn load(&self) -> Result<Vec<Stake>>;

    /// Insert or overwrite the record for `stake.get_id()`
    fn put(&self, stake: &Stake) -> Result<()>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStakeStore {
    stakes: RwLock<BTreeMap<String, Stake>>,
}

impl MemoryStakeStore {
    pub fn new() -> MemoryStakeStore {
        MemoryStakeStore::default()
    }
}

impl StakeStore for MemoryStakeStore {
    fn load(&self) -> Result<Vec<Stake>> {
        Ok(self.stakes.read()?.values().cloned().collect())
    }

    fn put(&self, stake: &Stake) -> Result<()> {
        self.stakes
            .write()?
            .insert(stake.get_id().to_string(), stake.clone());
        Ok(())
    }
}

/// Stake records keyed by id in their own tree of the chain database
pub struct SledStakeStore {
    stakes: Tree,
}

impl SledStakeStore {
    pub fn new(stakes: Tree) -> SledStakeStore {
        SledStakeStore { stakes }
    }
}

impl StakeStore for SledStakeStore {
    fn load(&self) -> Result<Vec<Stake>> {
        let mut stakes = Vec::new();
        for entry in self.stakes.iter() {
            let (_, bytes) = entry
                .map_err(|e| BlockchainError::Database(format!("Failed to read stakes: {e}")))?;
            stakes.push(deserialize::<Stake>(bytes.as_ref())?);
        }
        Ok(stakes)
    }

    fn put(&self, stake: &Stake) -> Result<()> {
        self.stakes
            .insert(stake.get_id().as_bytes(), serialize(stake)?)
            .map_err(|e| BlockchainError::Database(format!("Failed to save stake: {e}")))?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.stakes.flush()?;
        Ok(())
    }
}
