// The ordered block sequence of one chain. Appends are serialized through a
// single lock and finish with the store's compare-and-append, so concurrent
// producers can race to build blocks but only one wins each height.

use crate::core::block::GENESIS_PREVIOUS_HASH;
use crate::core::consensus::ConsensusType;
use crate::core::difficulty::{DifficultyAdjustment, INITIAL_DIFFICULTY, TARGET_BLOCK_INTERVAL_MS};
use crate::core::monetary::{Amount, INITIAL_BLOCK_REWARD};
use crate::core::{Block, Transaction};
use crate::error::{BlockchainError, ChainError, Result};
use crate::storage::{BlockStore, MemoryBlockStore};
use crate::utils::CryptoProvider;
use log::{info, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

/// Chain-level metadata. `height` is the index of the highest block, -1
/// while the chain is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainInfo {
    pub id: String,
    pub name: String,
    pub genesis_hash: Option<String>,
    pub height: i64,
    pub difficulty: u32,
    pub block_reward: Amount,
    pub target_block_interval_ms: u64,
    pub consensus_type: ConsensusType,
    pub valid: bool,
}

impl ChainInfo {
    pub fn new(name: &str) -> ChainInfo {
        ChainInfo {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            genesis_hash: None,
            height: -1,
            difficulty: INITIAL_DIFFICULTY,
            block_reward: INITIAL_BLOCK_REWARD,
            target_block_interval_ms: TARGET_BLOCK_INTERVAL_MS,
            consensus_type: ConsensusType::default(),
            valid: true,
        }
    }
}

pub struct Ledger {
    info: RwLock<ChainInfo>,
    store: Box<dyn BlockStore>,
    crypto: Arc<dyn CryptoProvider>,
    append_lock: Mutex<()>,
    confirmed: RwLock<HashMap<String, u64>>, // tx hash -> block index
}

impl Ledger {
    /// Open a ledger over `store`, rebuilding height, genesis hash and the
    /// confirmed-transaction index from whatever the store already holds
    pub fn open(
        info: ChainInfo,
        store: Box<dyn BlockStore>,
        crypto: Arc<dyn CryptoProvider>,
    ) -> Result<Ledger> {
        let mut info = info;
        let mut confirmed = HashMap::new();
        if let Some(tip) = store.tip_index()? {
            for block in store.get_range(0, tip)? {
                for tx in block.get_transactions() {
                    confirmed.insert(tx.get_hash().to_string(), block.get_index());
                }
                if block.is_genesis() {
                    info.genesis_hash = Some(block.get_hash().to_string());
                }
            }
            info.height = tip as i64;
            info!("Opened chain {} at height {tip}", info.name);
        }

        Ok(Ledger {
            info: RwLock::new(info),
            store,
            crypto,
            append_lock: Mutex::new(()),
            confirmed: RwLock::new(confirmed),
        })
    }

    /// Empty volatile ledger with default parameters
    pub fn in_memory(name: &str, crypto: Arc<dyn CryptoProvider>) -> Result<Ledger> {
        Self::open(
            ChainInfo::new(name),
            Box::new(MemoryBlockStore::new()),
            crypto,
        )
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    pub fn crypto(&self) -> &Arc<dyn CryptoProvider> {
        &self.crypto
    }

    pub fn info(&self) -> Result<ChainInfo> {
        Ok(self.info.read()?.clone())
    }

    /// Index of the highest block, -1 when empty
    pub fn height(&self) -> i64 {
        match self.info.read() {
            Ok(info) => info.height,
            Err(_) => {
                log::error!("Failed to acquire read lock on chain info");
                -1
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.height() < 0
    }

    pub fn difficulty(&self) -> Result<u32> {
        Ok(self.info.read()?.difficulty)
    }

    pub fn set_difficulty(&self, difficulty: u32) -> Result<()> {
        DifficultyAdjustment::validate_difficulty(difficulty)?;
        let mut info = self.info.write()?;
        if info.difficulty != difficulty {
            info!(
                "Chain {} difficulty set: {} -> {difficulty}",
                info.name, info.difficulty
            );
        }
        info.difficulty = difficulty;
        Ok(())
    }

    pub fn set_consensus_type(&self, consensus_type: ConsensusType) -> Result<()> {
        self.info.write()?.consensus_type = consensus_type;
        Ok(())
    }

    /// Hash the next block must link to: the tip's hash, or the genesis
    /// sentinel on an empty chain
    pub fn next_previous_hash(&self) -> Result<String> {
        match self.tip()? {
            Some(tip) => Ok(tip.get_hash().to_string()),
            None => Ok(GENESIS_PREVIOUS_HASH.to_string()),
        }
    }

    pub fn tip(&self) -> Result<Option<Block>> {
        match self.store.tip_index()? {
            Some(index) => self.store.get_by_index(index),
            None => Ok(None),
        }
    }

    /// Append the next block. Rejects a wrong index, a stale hash, a broken
    /// link or an already confirmed transaction without changing anything.
    pub fn append(&self, block: &Block) -> Result<()> {
        self.append_batch(std::slice::from_ref(block))
    }

    /// Append consecutive blocks as one unit: every block is checked before
    /// the first one is stored
    pub fn append_batch(&self, blocks: &[Block]) -> Result<()> {
        if blocks.is_empty() {
            return Ok(());
        }
        let _guard = self.append_lock.lock()?;

        let mut expected = (self.height() + 1) as u64;
        let mut previous_hash = self.next_previous_hash()?;
        let mut batch_hashes: HashSet<&str> = HashSet::new();
        {
            let confirmed = self.confirmed.read()?;
            for block in blocks {
                self.check_next(block, expected, &previous_hash)?;
                for tx in block.get_transactions() {
                    if confirmed.contains_key(tx.get_hash()) || !batch_hashes.insert(tx.get_hash()) {
                        return Err(ChainError::DuplicateTransaction(tx.get_hash().to_string()).into());
                    }
                }
                expected += 1;
                previous_hash = block.get_hash().to_string();
            }
        }

        for block in blocks {
            let mut stored = block.clone();
            stored.confirm_transactions();
            self.store
                .append_with_expected_index(&stored, stored.get_index())?;

            let mut confirmed = self.confirmed.write()?;
            for tx in stored.get_transactions() {
                confirmed.insert(tx.get_hash().to_string(), stored.get_index());
            }
            drop(confirmed);

            let mut info = self.info.write()?;
            info.height = stored.get_index() as i64;
            if stored.is_genesis() {
                info.genesis_hash = Some(stored.get_hash().to_string());
            }
        }
        Ok(())
    }

    fn check_next(&self, block: &Block, expected: u64, previous_hash: &str) -> Result<()> {
        if block.get_index() != expected {
            return Err(ChainError::InvalidSequence {
                expected,
                got: block.get_index(),
            }
            .into());
        }
        let computed = block.calculate_hash(self.crypto.as_ref());
        if computed != block.get_hash() {
            return Err(ChainError::InvalidHash {
                index: block.get_index(),
                stored: block.get_hash().to_string(),
                computed,
            }
            .into());
        }
        if block.get_previous_hash() != previous_hash {
            return Err(ChainError::InvalidLink {
                index: block.get_index(),
                expected: previous_hash.to_string(),
                got: block.get_previous_hash().to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub fn get_block_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        self.store.get_by_hash(hash)
    }

    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>> {
        self.store.get_by_index(height)
    }

    /// Blocks `from..=to`, clipped to the chain
    pub fn get_blocks_range(&self, from: u64, to: u64) -> Result<Vec<Block>> {
        self.store.get_range(from, to)
    }

    pub fn blocks(&self) -> Result<Vec<Block>> {
        match self.store.tip_index()? {
            Some(tip) => self.store.get_range(0, tip),
            None => Ok(vec![]),
        }
    }

    /// The last `count` blocks, oldest first
    pub fn recent_blocks(&self, count: usize) -> Result<Vec<Block>> {
        match self.store.tip_index()? {
            Some(tip) => {
                let from = tip.saturating_sub(count.saturating_sub(1) as u64);
                self.store.get_range(from, tip)
            }
            None => Ok(vec![]),
        }
    }

    /// Every hash recomputes and every block links to the one before it.
    /// An empty range is trivially valid.
    pub fn validate_range(&self, blocks: &[Block]) -> bool {
        validate_range(blocks, self.crypto.as_ref())
    }

    /// Full walk from genesis; records the result in the chain's validity flag
    pub fn validate_chain(&self) -> Result<bool> {
        let blocks = self.blocks()?;
        let mut valid = self.validate_range(&blocks);
        if let Some(first) = blocks.first() {
            valid &= first.is_genesis() && first.get_previous_hash() == GENESIS_PREVIOUS_HASH;
        }
        valid &= blocks
            .iter()
            .enumerate()
            .all(|(position, block)| block.get_index() == position as u64);

        let mut info = self.info.write()?;
        if !valid {
            warn!("Chain {} failed validation", info.name);
        }
        info.valid = valid;
        Ok(valid)
    }

    pub fn is_confirmed(&self, tx_hash: &str) -> bool {
        match self.confirmed.read() {
            Ok(confirmed) => confirmed.contains_key(tx_hash),
            Err(_) => {
                log::error!("Failed to acquire read lock on confirmed transactions");
                false
            }
        }
    }

    pub fn find_transaction(&self, tx_hash: &str) -> Result<Option<Transaction>> {
        let index = match self.confirmed.read()?.get(tx_hash) {
            Some(&index) => index,
            None => return Ok(None),
        };
        let block = self
            .store
            .get_by_index(index)?
            .ok_or_else(|| BlockchainError::NotFound(format!("block {index}")))?;
        Ok(block
            .get_transactions()
            .iter()
            .find(|tx| tx.get_hash() == tx_hash)
            .cloned())
    }

    /// Confirmed transactions sent or received by `address`, in chain order
    pub fn transactions_for_address(&self, address: &str) -> Result<Vec<Transaction>> {
        Ok(self
            .blocks()?
            .iter()
            .flat_map(|block| block.get_transactions())
            .filter(|tx| tx.involves(address))
            .cloned()
            .collect())
    }
}

/// Pairwise walk over `blocks`: each stored hash must recompute and each
/// `previous_hash` must equal its predecessor's hash
pub fn validate_range(blocks: &[Block], crypto: &dyn CryptoProvider) -> bool {
    let hashes_ok = blocks
        .iter()
        .all(|block| block.calculate_hash(crypto) == block.get_hash());
    let links_ok = blocks
        .windows(2)
        .all(|pair| pair[1].get_previous_hash() == pair[0].get_hash());
    hashes_ok && links_ok
}
