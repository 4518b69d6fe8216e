use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::utils::CryptoProvider;
use serde::{Deserialize, Serialize};

/// Preimage hashed to produce the root of an empty transaction list
pub const EMPTY_MERKLE_PREIMAGE: &str = "empty";

/// Binary Merkle reduction over transaction hashes.
///
/// Each level pairs adjacent hex digests and hashes their string
/// concatenation; an odd trailing digest is paired with itself. A single
/// transaction's root is its own hash. Every level is kept so inclusion
/// proofs can be produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleTree {
    levels: Vec<Vec<String>>,
    root: String,
}

/// Merkle proof for transaction inclusion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub transaction_hash: String,
    pub merkle_root: String,
    pub proof_path: Vec<ProofElement>,
    pub transaction_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofElement {
    pub hash: String,
    /// true if the sibling sits on the right
    pub is_right: bool,
}

impl MerkleTree {
    pub fn new(transactions: &[Transaction], crypto: &dyn CryptoProvider) -> MerkleTree {
        let leaves: Vec<String> = transactions
            .iter()
            .map(|tx| tx.get_hash().to_string())
            .collect();
        Self::from_hashes(&leaves, crypto)
    }

    pub fn from_hashes(hashes: &[String], crypto: &dyn CryptoProvider) -> MerkleTree {
        if hashes.is_empty() {
            return MerkleTree {
                levels: vec![],
                root: crypto.hash(EMPTY_MERKLE_PREIMAGE),
            };
        }

        let mut levels = vec![hashes.to_vec()];
        while let Some(current) = levels.last().filter(|level| level.len() > 1) {
            let next: Vec<String> = current
                .chunks(2)
                .map(|pair| {
                    let left = &pair[0];
                    let right = pair.get(1).unwrap_or(left);
                    Self::hash_pair(left, right, crypto)
                })
                .collect();
            levels.push(next);
        }

        let root = levels
            .last()
            .and_then(|level| level.first())
            .cloned()
            .unwrap_or_default();
        MerkleTree { levels, root }
    }

    pub fn root(&self) -> &str {
        self.root.as_str()
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn generate_proof(&self, transaction_index: usize) -> Result<MerkleProof> {
        let leaf_count = self.leaf_count();
        if transaction_index >= leaf_count {
            return Err(BlockchainError::InvalidArgument(format!(
                "Transaction index {transaction_index} out of bounds (leaves: {leaf_count})"
            )));
        }

        let mut proof_path = Vec::new();
        let mut index = transaction_index;
        for level in &self.levels[..self.levels.len() - 1] {
            let is_right = index % 2 == 0;
            let sibling_index = if is_right { index + 1 } else { index - 1 };
            let sibling = level.get(sibling_index).unwrap_or(&level[index]);
            proof_path.push(ProofElement {
                hash: sibling.clone(),
                is_right,
            });
            index /= 2;
        }

        Ok(MerkleProof {
            transaction_hash: self.levels[0][transaction_index].clone(),
            merkle_root: self.root.clone(),
            proof_path,
            transaction_index,
        })
    }

    pub fn verify_proof(proof: &MerkleProof, crypto: &dyn CryptoProvider) -> bool {
        let computed = proof
            .proof_path
            .iter()
            .fold(proof.transaction_hash.clone(), |current, element| {
                if element.is_right {
                    Self::hash_pair(&current, &element.hash, crypto)
                } else {
                    Self::hash_pair(&element.hash, &current, crypto)
                }
            });
        computed == proof.merkle_root
    }

    fn hash_pair(left: &str, right: &str, crypto: &dyn CryptoProvider) -> String {
        crypto.hash(&format!("{left}{right}"))
    }
}

/// Root digest summarising `transactions`
pub fn merkle_root(transactions: &[Transaction], crypto: &dyn CryptoProvider) -> String {
    MerkleTree::new(transactions, crypto).root
}
