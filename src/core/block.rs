use crate::core::merkle::merkle_root;
use crate::core::Transaction;
use crate::error::Result;
use crate::utils::{deserialize, serialize, CryptoProvider};
use serde::{Deserialize, Serialize};
use sled::IVec;
use std::collections::HashSet;

/// `previous_hash` of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    index: u64,
    previous_hash: String,
    timestamp: i64,
    nonce: u64,
    difficulty: u32, // leading zero hex digits required under proof-of-work
    merkle_root: String,
    hash: String,
    miner: String, // miner or validator address
    transactions: Vec<Transaction>,
}

/// Outcome of checking a block on its own; every failing check is listed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockValidation {
    pub reasons: Vec<String>,
}

impl BlockValidation {
    pub fn is_valid(&self) -> bool {
        self.reasons.is_empty()
    }

    pub(crate) fn fail(&mut self, reason: String) {
        self.reasons.push(reason);
    }
}

impl Block {
    /// Assemble an unmined block at nonce 0 with its Merkle root and hash filled in
    pub fn new_candidate(
        index: u64,
        previous_hash: &str,
        timestamp: i64,
        difficulty: u32,
        miner: &str,
        transactions: Vec<Transaction>,
        crypto: &dyn CryptoProvider,
    ) -> Block {
        let mut block = Block {
            index,
            previous_hash: previous_hash.to_string(),
            timestamp,
            nonce: 0,
            difficulty,
            merkle_root: merkle_root(&transactions, crypto),
            hash: String::new(),
            miner: miner.to_string(),
            transactions,
        };
        block.hash = block.calculate_hash(crypto);
        block
    }

    /// Reassemble a block exactly as received, without recomputing anything
    #[allow(clippy::too_many_arguments)]
    pub fn from_raw(
        index: u64,
        previous_hash: String,
        timestamp: i64,
        nonce: u64,
        difficulty: u32,
        merkle_root: String,
        hash: String,
        miner: String,
        transactions: Vec<Transaction>,
    ) -> Block {
        Block {
            index,
            previous_hash,
            timestamp,
            nonce,
            difficulty,
            merkle_root,
            hash,
            miner,
            transactions,
        }
    }

    /// Flat concatenation `index ‖ previousHash ‖ timestamp ‖ nonce ‖ merkleRoot`.
    /// Changing this format breaks hash compatibility with existing chains.
    pub fn hash_preimage_with_nonce(&self, nonce: u64) -> String {
        format!(
            "{}{}{}{}{}",
            self.index, self.previous_hash, self.timestamp, nonce, self.merkle_root
        )
    }

    pub fn hash_preimage(&self) -> String {
        self.hash_preimage_with_nonce(self.nonce)
    }

    pub fn calculate_hash(&self, crypto: &dyn CryptoProvider) -> String {
        crypto.hash(&self.hash_preimage())
    }

    pub fn calculate_hash_with_nonce(&self, nonce: u64, crypto: &dyn CryptoProvider) -> String {
        crypto.hash(&self.hash_preimage_with_nonce(nonce))
    }

    /// Structural checks that need no chain context: stored hash, Merkle
    /// root, transaction hashes, duplicate transactions, genesis sentinel
    pub fn validate(&self, crypto: &dyn CryptoProvider) -> BlockValidation {
        let mut report = BlockValidation::default();

        let computed = self.calculate_hash(crypto);
        if computed != self.hash {
            report.fail(format!(
                "block {} hash mismatch: stored {}, computed {computed}",
                self.index, self.hash
            ));
        }

        let root = merkle_root(&self.transactions, crypto);
        if root != self.merkle_root {
            report.fail(format!(
                "block {} merkle root mismatch: stored {}, computed {root}",
                self.index, self.merkle_root
            ));
        }

        let mut seen = HashSet::new();
        for tx in &self.transactions {
            if tx.calculate_hash(crypto) != tx.get_hash() {
                report.fail(format!(
                    "block {} carries transaction with stale hash {}",
                    self.index,
                    tx.get_hash()
                ));
            }
            if !seen.insert(tx.get_hash()) {
                report.fail(format!(
                    "block {} repeats transaction {}",
                    self.index,
                    tx.get_hash()
                ));
            }
        }

        if self.index == 0 && self.previous_hash != GENESIS_PREVIOUS_HASH {
            report.fail(format!(
                "genesis block must reference {GENESIS_PREVIOUS_HASH:?}, found {}",
                self.previous_hash
            ));
        }

        report
    }

    pub(crate) fn seal(&mut self, nonce: u64, hash: String) {
        self.nonce = nonce;
        self.hash = hash;
    }

    /// Mark every carried transaction as confirmed in this block
    pub(crate) fn confirm_transactions(&mut self) {
        let hash = self.hash.clone();
        for tx in &mut self.transactions {
            tx.confirm(&hash);
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_index(&self) -> u64 {
        self.index
    }

    pub fn get_previous_hash(&self) -> &str {
        self.previous_hash.as_str()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_merkle_root(&self) -> &str {
        self.merkle_root.as_str()
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn get_miner(&self) -> &str {
        self.miner.as_str()
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}

impl TryFrom<&Block> for IVec {
    type Error = crate::error::BlockchainError;

    fn try_from(block: &Block) -> Result<Self> {
        Ok(IVec::from(block.serialize()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::tests::sample_tx;
    use crate::utils::Sha256Crypto;

    const MINER: &str = "0xcccccccccccccccccccccccccccccccccccccccc";

    #[test]
    fn test_hash_preimage_is_flat_concatenation() {
        let crypto = Sha256Crypto;
        let block = Block::new_candidate(3, "abc", 1_000, 2, MINER, vec![], &crypto);
        let expected = format!("3abc10000{}", crypto.hash("empty"));
        assert_eq!(block.hash_preimage(), expected);
        assert_eq!(block.get_hash(), crypto.hash(&expected));
    }

    #[test]
    fn test_candidate_validates() {
        let crypto = Sha256Crypto;
        let block = Block::new_candidate(
            0,
            GENESIS_PREVIOUS_HASH,
            1_000,
            0,
            MINER,
            vec![sample_tx(1, 1), sample_tx(2, 2)],
            &crypto,
        );
        assert!(block.validate(&crypto).is_valid());
    }

    #[test]
    fn test_validation_accumulates_every_failure() {
        let crypto = Sha256Crypto;
        let tx = sample_tx(1, 1);
        let block = Block::from_raw(
            0,
            "not-zero".to_string(),
            1_000,
            0,
            0,
            "bogus-root".to_string(),
            "bogus-hash".to_string(),
            MINER.to_string(),
            vec![tx.clone(), tx],
        );
        let report = block.validate(&crypto);
        assert!(!report.is_valid());
        // hash, merkle root, duplicate transaction, genesis sentinel
        assert_eq!(report.reasons.len(), 4);
    }

    #[test]
    fn test_storage_encoding() {
        let crypto = Sha256Crypto;
        let block = Block::new_candidate(1, "prev", 5, 1, MINER, vec![sample_tx(3, 4)], &crypto);
        let decoded = Block::deserialize(&block.serialize().unwrap()).unwrap();
        assert_eq!(decoded, block);
    }
}
