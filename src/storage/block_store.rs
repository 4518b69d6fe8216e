// Key-addressable block storage. The ledger only talks to the `BlockStore`
// contract; `append_with_expected_index` is the compare-and-append that keeps
// concurrent producers from overwriting each other.

use crate::core::Block;
use crate::error::{BlockchainError, Result};
use crate::storage::stake_store::{SledStakeStore, STAKES_TREE};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Tree};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

const BLOCKS_TREE: &str = "blocks";
const TIP_INDEX_KEY: &[u8] = b"tip_index";
const HASH_PREFIX: &[u8] = b"h:";
const INDEX_PREFIX: &[u8] = b"i:";

pub trait BlockStore: Send + Sync {
    fn get_by_hash(&self, hash: &str) -> Result<Option<Block>>;

    fn get_by_index(&self, index: u64) -> Result<Option<Block>>;

    /// Blocks with `from <= index <= to`, ascending; stops at the first gap
    fn get_range(&self, from: u64, to: u64) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        if from > to {
            return Ok(blocks);
        }
        for index in from..=to {
            match self.get_by_index(index)? {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        Ok(blocks)
    }

    /// Index of the highest stored block, `None` when empty
    fn tip_index(&self) -> Result<Option<u64>>;

    /// Store `block` only if `expected_index` is the next free index
    fn append_with_expected_index(&self, block: &Block, expected_index: u64) -> Result<()>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

fn next_index(tip: Option<u64>) -> u64 {
    tip.map_or(0, |t| t + 1)
}

fn sequence_conflict(expected: u64, actual_next: u64) -> BlockchainError {
    BlockchainError::InvalidState(format!(
        "append expected index {expected} but store is at {actual_next}"
    ))
}

#[derive(Default)]
struct MemoryInner {
    blocks: Vec<Block>,
    by_hash: HashMap<String, u64>,
}

/// Volatile store used by simulations and tests
#[derive(Default)]
pub struct MemoryBlockStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryBlockStore {
    pub fn new() -> MemoryBlockStore {
        MemoryBlockStore::default()
    }
}

impl BlockStore for MemoryBlockStore {
    fn get_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        let inner = self.inner.read()?;
        Ok(inner
            .by_hash
            .get(hash)
            .and_then(|&index| inner.blocks.get(index as usize))
            .cloned())
    }

    fn get_by_index(&self, index: u64) -> Result<Option<Block>> {
        Ok(self.inner.read()?.blocks.get(index as usize).cloned())
    }

    fn get_range(&self, from: u64, to: u64) -> Result<Vec<Block>> {
        let inner = self.inner.read()?;
        if from > to || from as usize >= inner.blocks.len() {
            return Ok(vec![]);
        }
        let end = (to as usize).min(inner.blocks.len() - 1);
        Ok(inner.blocks[from as usize..=end].to_vec())
    }

    fn tip_index(&self) -> Result<Option<u64>> {
        let len = self.inner.read()?.blocks.len() as u64;
        Ok(len.checked_sub(1))
    }

    fn append_with_expected_index(&self, block: &Block, expected_index: u64) -> Result<()> {
        let mut inner = self.inner.write()?;
        let next = inner.blocks.len() as u64;
        if next != expected_index || block.get_index() != expected_index {
            return Err(sequence_conflict(expected_index, next));
        }
        inner
            .by_hash
            .insert(block.get_hash().to_string(), expected_index);
        inner.blocks.push(block.clone());
        Ok(())
    }
}

/// Sled-backed store: block bytes keyed by hash, hash keyed by big-endian
/// index, and the tip index, all in one tree so appends are a single
/// sled transaction
pub struct SledBlockStore {
    db: Db,
    blocks: Tree,
}

impl SledBlockStore {
    pub fn open(path: impl AsRef<Path>) -> Result<SledBlockStore> {
        let db = sled::open(path.as_ref())
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))?;
        let blocks = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))?;
        Ok(SledBlockStore { db, blocks })
    }

    /// Stake records kept in the same database as the blocks
    pub fn stake_store(&self) -> Result<SledStakeStore> {
        let stakes = self
            .db
            .open_tree(STAKES_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open stakes tree: {e}")))?;
        Ok(SledStakeStore::new(stakes))
    }

    fn hash_key(hash: &str) -> Vec<u8> {
        [HASH_PREFIX, hash.as_bytes()].concat()
    }

    fn index_key(index: u64) -> Vec<u8> {
        [INDEX_PREFIX, &index.to_be_bytes()[..]].concat()
    }

    fn decode_index(bytes: &[u8]) -> Result<u64> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| BlockchainError::Database("Corrupt tip index".to_string()))?;
        Ok(u64::from_be_bytes(raw))
    }
}

impl BlockStore for SledBlockStore {
    fn get_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        match self
            .blocks
            .get(Self::hash_key(hash))
            .map_err(|e| BlockchainError::Database(format!("Failed to get block: {e}")))?
        {
            Some(bytes) => Ok(Some(Block::deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    fn get_by_index(&self, index: u64) -> Result<Option<Block>> {
        let hash = self
            .blocks
            .get(Self::index_key(index))
            .map_err(|e| BlockchainError::Database(format!("Failed to get block index: {e}")))?;
        match hash {
            Some(hash) => {
                let hash = String::from_utf8(hash.to_vec()).map_err(|e| {
                    BlockchainError::Database(format!("Invalid block hash format: {e}"))
                })?;
                self.get_by_hash(&hash)
            }
            None => Ok(None),
        }
    }

    fn tip_index(&self) -> Result<Option<u64>> {
        match self
            .blocks
            .get(TIP_INDEX_KEY)
            .map_err(|e| BlockchainError::Database(format!("Failed to get tip index: {e}")))?
        {
            Some(bytes) => Ok(Some(Self::decode_index(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    fn append_with_expected_index(&self, block: &Block, expected_index: u64) -> Result<()> {
        if block.get_index() != expected_index {
            return Err(sequence_conflict(expected_index, block.get_index()));
        }
        let block_data = block.serialize()?;
        let hash_key = Self::hash_key(block.get_hash());
        let index_key = Self::index_key(expected_index);

        self.blocks
            .transaction(|tx_db| {
                let tip = match tx_db.get(TIP_INDEX_KEY)? {
                    Some(bytes) => Some(
                        Self::decode_index(bytes.as_ref())
                            .map_err(ConflictableTransactionError::Abort)?,
                    ),
                    None => None,
                };
                let next = next_index(tip);
                if next != expected_index {
                    return Err(ConflictableTransactionError::Abort(sequence_conflict(
                        expected_index,
                        next,
                    )));
                }
                tx_db.insert(hash_key.as_slice(), block_data.as_slice())?;
                tx_db.insert(index_key.as_slice(), block.get_hash().as_bytes())?;
                tx_db.insert(TIP_INDEX_KEY, &expected_index.to_be_bytes()[..])?;
                Ok(())
            })
            .map_err(|e: TransactionError<BlockchainError>| match e {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => {
                    BlockchainError::Database(format!("Failed to append block: {err}"))
                }
            })
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::GENESIS_PREVIOUS_HASH;
    use crate::utils::Sha256Crypto;

    const MINER: &str = "0xcccccccccccccccccccccccccccccccccccccccc";

    fn chain_of(len: u64) -> Vec<Block> {
        let mut blocks: Vec<Block> = Vec::new();
        for index in 0..len {
            let previous = blocks
                .last()
                .map_or(GENESIS_PREVIOUS_HASH.to_string(), |b| b.get_hash().to_string());
            blocks.push(Block::new_candidate(
                index,
                &previous,
                index as i64,
                0,
                MINER,
                vec![],
                &Sha256Crypto,
            ));
        }
        blocks
    }

    fn exercise(store: &dyn BlockStore) {
        assert_eq!(store.tip_index().unwrap(), None);
        let blocks = chain_of(4);
        for block in &blocks {
            store
                .append_with_expected_index(block, block.get_index())
                .unwrap();
        }
        assert_eq!(store.tip_index().unwrap(), Some(3));

        let by_hash = store.get_by_hash(blocks[2].get_hash()).unwrap().unwrap();
        assert_eq!(by_hash.get_index(), 2);
        assert_eq!(store.get_by_index(1).unwrap().unwrap(), blocks[1]);
        assert!(store.get_by_index(9).unwrap().is_none());
        assert!(store.get_by_hash("missing").unwrap().is_none());

        let range = store.get_range(1, 10).unwrap();
        assert_eq!(range.len(), 3);
        assert_eq!(range[0].get_index(), 1);
        assert!(store.get_range(3, 1).unwrap().is_empty());

        // stale expectation is rejected and nothing changes
        let err = store
            .append_with_expected_index(&blocks[3], 3)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidState);
        assert_eq!(store.tip_index().unwrap(), Some(3));
    }

    #[test]
    fn test_memory_store_contract() {
        exercise(&MemoryBlockStore::new());
    }

    #[test]
    fn test_sled_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&SledBlockStore::open(dir.path().join("blocks")).unwrap());
    }

    #[test]
    fn test_sled_store_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks");
        let blocks = chain_of(2);
        {
            let store = SledBlockStore::open(&path).unwrap();
            for block in &blocks {
                store
                    .append_with_expected_index(block, block.get_index())
                    .unwrap();
            }
            store.flush().unwrap();
        }
        let store = SledBlockStore::open(&path).unwrap();
        assert_eq!(store.tip_index().unwrap(), Some(1));
        assert_eq!(store.get_by_index(1).unwrap().unwrap(), blocks[1]);
    }
}
