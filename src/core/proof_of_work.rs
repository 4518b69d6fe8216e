use crate::core::Block;
use crate::utils::CryptoProvider;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// How often the nonce loop checks the cancellation flag
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Literal-prefix proof-of-work: a hash meets difficulty `d` when its first
/// `d` characters are all `'0'`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProofOfWork;

/// Result of a nonce search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Found {
        nonce: u64,
        hash: String,
        attempts: u64,
        elapsed_ms: u128,
    },
    Cancelled {
        attempts: u64,
    },
    Exhausted {
        attempts: u64,
    },
}

impl ProofOfWork {
    /// The required prefix: `difficulty` zero characters
    pub fn target(difficulty: u32) -> String {
        "0".repeat(difficulty as usize)
    }

    /// Prefix check. A difficulty longer than the hash can never be met.
    pub fn meets_target(hash: &str, difficulty: u32) -> bool {
        let required = difficulty as usize;
        if required > hash.len() {
            return false;
        }
        hash.as_bytes()[..required].iter().all(|&b| b == b'0')
    }

    /// Recompute the hash at the claimed nonce; it must both equal the stored
    /// hash and meet the block's own difficulty
    pub fn validate(block: &Block, crypto: &dyn CryptoProvider) -> bool {
        let recomputed = block.calculate_hash_with_nonce(block.get_nonce(), crypto);
        recomputed == block.get_hash() && Self::meets_target(&recomputed, block.get_difficulty())
    }

    /// Sequential search from nonce 0 until the first hash meeting the
    /// block's difficulty. Runs until found unless `cancel` is raised or
    /// `max_attempts` is reached.
    pub fn search(
        block: &Block,
        crypto: &dyn CryptoProvider,
        cancel: Option<&AtomicBool>,
        max_attempts: Option<u64>,
    ) -> SearchOutcome {
        let difficulty = block.get_difficulty();
        let started = Instant::now();
        let mut nonce: u64 = 0;
        let mut attempts: u64 = 0;

        debug!(
            "Searching nonce for block {} at difficulty {difficulty}",
            block.get_index()
        );
        loop {
            if max_attempts.is_some_and(|max| attempts >= max) {
                return SearchOutcome::Exhausted { attempts };
            }
            if attempts % CANCEL_CHECK_INTERVAL == 0
                && cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
            {
                info!(
                    "Nonce search for block {} cancelled after {attempts} attempts",
                    block.get_index()
                );
                return SearchOutcome::Cancelled { attempts };
            }

            let hash = block.calculate_hash_with_nonce(nonce, crypto);
            attempts += 1;
            if Self::meets_target(&hash, difficulty) {
                return SearchOutcome::Found {
                    nonce,
                    hash,
                    attempts,
                    elapsed_ms: started.elapsed().as_millis(),
                };
            }

            nonce = match nonce.checked_add(1) {
                Some(next) => next,
                None => return SearchOutcome::Exhausted { attempts },
            };
        }
    }

    /// Search and seal `block` in place; returns false if no nonce was found
    pub fn run(block: &mut Block, crypto: &dyn CryptoProvider) -> bool {
        match Self::search(block, crypto, None, None) {
            SearchOutcome::Found { nonce, hash, .. } => {
                block.seal(nonce, hash);
                true
            }
            _ => false,
        }
    }
}
