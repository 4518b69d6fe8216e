// Bounded holding areas for pending transactions. Each pool is its own
// mutual-exclusion domain; the manager keeps the hash -> pool membership so
// a transaction is held by at most one pool at a time.

use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug)]
struct PoolState {
    transactions: HashMap<String, Transaction>,
    size: usize, // maintained on every add/remove
    active: bool,
}

#[derive(Debug)]
pub struct TransactionPool {
    name: String,
    max_size: usize,
    state: Mutex<PoolState>,
}

impl TransactionPool {
    pub fn new(name: &str, max_size: usize) -> TransactionPool {
        TransactionPool {
            name: name.to_string(),
            max_size,
            state: Mutex::new(PoolState {
                transactions: HashMap::new(),
                size: 0,
                active: true,
            }),
        }
    }

    pub fn get_name(&self) -> &str {
        self.name.as_str()
    }

    pub fn get_max_size(&self) -> usize {
        self.max_size
    }

    /// Returns `Ok(false)` when the transaction is already held
    pub fn add(&self, tx: Transaction) -> Result<bool> {
        let mut state = self.state.lock()?;
        if !state.active {
            return Err(BlockchainError::PoolInactive(self.name.clone()));
        }
        if state.transactions.contains_key(tx.get_hash()) {
            info!(
                "Transaction {} already in pool {}, ignoring",
                tx.get_hash(),
                self.name
            );
            return Ok(false);
        }
        if state.size >= self.max_size {
            return Err(BlockchainError::PoolFull {
                pool: self.name.clone(),
                current: state.size,
                max: self.max_size,
            });
        }

        let mut tx = tx;
        tx.set_pool(Some(self.name.clone()));
        state.transactions.insert(tx.get_hash().to_string(), tx);
        state.size += 1;
        Ok(true)
    }

    pub fn remove(&self, tx_hash: &str) -> Result<Option<Transaction>> {
        let mut state = self.state.lock()?;
        match state.transactions.remove(tx_hash) {
            Some(mut tx) => {
                state.size -= 1;
                tx.set_pool(None);
                Ok(Some(tx))
            }
            None => {
                info!("Transaction {tx_hash} is not in pool {}, nothing to remove", self.name);
                Ok(None)
            }
        }
    }

    /// Highest fee first; equal fees go to the earlier timestamp, then to
    /// the smaller hash so the order is total
    pub fn top_by_fee(&self, limit: usize) -> Result<Vec<Transaction>> {
        let state = self.state.lock()?;
        let mut transactions: Vec<Transaction> = state.transactions.values().cloned().collect();
        transactions.sort_by(|a, b| {
            b.get_fee()
                .cmp(&a.get_fee())
                .then_with(|| a.get_timestamp().cmp(&b.get_timestamp()))
                .then_with(|| a.get_hash().cmp(b.get_hash()))
        });
        transactions.truncate(limit);
        Ok(transactions)
    }

    pub fn get(&self, tx_hash: &str) -> Option<Transaction> {
        match self.state.lock() {
            Ok(state) => state.transactions.get(tx_hash).cloned(),
            Err(_) => {
                log::error!("Failed to acquire lock on pool {}", self.name);
                None
            }
        }
    }

    pub fn contains(&self, tx_hash: &str) -> bool {
        match self.state.lock() {
            Ok(state) => state.transactions.contains_key(tx_hash),
            Err(_) => {
                log::error!("Failed to acquire lock on pool {}", self.name);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.state.lock() {
            Ok(state) => state.size,
            Err(_) => {
                log::error!("Failed to acquire lock on pool {}", self.name);
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_active(&self) -> bool {
        match self.state.lock() {
            Ok(state) => state.active,
            Err(_) => {
                log::error!("Failed to acquire lock on pool {}", self.name);
                false
            }
        }
    }

    pub fn set_active(&self, active: bool) -> Result<()> {
        self.state.lock()?.active = active;
        info!(
            "Pool {} {}",
            self.name,
            if active { "activated" } else { "deactivated" }
        );
        Ok(())
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        match self.state.lock() {
            Ok(state) => state.transactions.values().cloned().collect(),
            Err(_) => {
                log::error!("Failed to acquire lock on pool {}", self.name);
                Vec::new()
            }
        }
    }
}

/// Named pools plus the record of which pool holds each pending transaction
#[derive(Default)]
pub struct PoolManager {
    pools: RwLock<BTreeMap<String, Arc<TransactionPool>>>,
    membership: Mutex<HashMap<String, String>>, // tx hash -> pool name
}

impl PoolManager {
    pub fn new() -> PoolManager {
        PoolManager::default()
    }

    pub fn create_pool(&self, name: &str, max_size: usize) -> Result<Arc<TransactionPool>> {
        if name.trim().is_empty() {
            return Err(BlockchainError::InvalidArgument(
                "Pool name must not be empty".to_string(),
            ));
        }
        if max_size == 0 {
            return Err(BlockchainError::InvalidArgument(format!(
                "Pool {name} needs a positive capacity"
            )));
        }
        let mut pools = self.pools.write()?;
        if pools.contains_key(name) {
            return Err(BlockchainError::InvalidState(format!(
                "Pool {name} already exists"
            )));
        }
        let pool = Arc::new(TransactionPool::new(name, max_size));
        pools.insert(name.to_string(), pool.clone());
        info!("Created pool {name} (capacity {max_size})");
        Ok(pool)
    }

    pub fn get_pool(&self, name: &str) -> Result<Arc<TransactionPool>> {
        self.pools
            .read()?
            .get(name)
            .cloned()
            .ok_or_else(|| BlockchainError::NotFound(format!("pool {name}")))
    }

    pub fn pool_names(&self) -> Result<Vec<String>> {
        Ok(self.pools.read()?.keys().cloned().collect())
    }

    /// Name of the pool currently holding `tx_hash`
    pub fn pool_of(&self, tx_hash: &str) -> Result<Option<String>> {
        Ok(self.membership.lock()?.get(tx_hash).cloned())
    }

    /// Add to the named pool; refused while another pool holds the same hash
    pub fn add(&self, pool_name: &str, tx: Transaction) -> Result<bool> {
        let pool = self.get_pool(pool_name)?;
        let mut membership = self.membership.lock()?;

        if let Some(holder) = membership.get(tx.get_hash()).cloned() {
            if holder != pool_name {
                let still_held = self
                    .get_pool(&holder)
                    .map(|p| p.contains(tx.get_hash()))
                    .unwrap_or(false);
                if still_held {
                    return Err(BlockchainError::InvalidState(format!(
                        "Transaction {} is already held by pool {holder}",
                        tx.get_hash()
                    )));
                }
                membership.remove(tx.get_hash());
            }
        }

        let hash = tx.get_hash().to_string();
        let added = pool.add(tx)?;
        if added {
            membership.insert(hash, pool_name.to_string());
        }
        Ok(added)
    }

    /// Remove from whichever pool holds the transaction
    pub fn remove(&self, tx_hash: &str) -> Result<Option<Transaction>> {
        let mut membership = self.membership.lock()?;
        match membership.remove(tx_hash) {
            Some(holder) => self.get_pool(&holder)?.remove(tx_hash),
            None => {
                debug!("Transaction {tx_hash} is not held by any pool");
                Ok(None)
            }
        }
    }

    /// Drop confirmed transactions from every pool; returns how many left
    pub fn evict_confirmed(&self, confirmed: &[Transaction]) -> Result<usize> {
        let mut evicted = 0;
        for tx in confirmed {
            if self.remove(tx.get_hash())?.is_some() {
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!("Evicted {evicted} confirmed transactions from pools");
        }
        Ok(evicted)
    }

    /// Every pending transaction, pool by pool in name order
    pub fn pending(&self) -> Result<Vec<Transaction>> {
        let pools: Vec<Arc<TransactionPool>> = self.pools.read()?.values().cloned().collect();
        Ok(pools.iter().flat_map(|pool| pool.transactions()).collect())
    }

    /// Pending transactions sent by `address`, in any pool
    pub fn pending_from(&self, address: &str) -> Result<Vec<Transaction>> {
        let mut pending = self.pending()?;
        pending.retain(|tx| tx.get_sender().eq_ignore_ascii_case(address));
        Ok(pending)
    }

    /// Pending transactions across all active pools, best fee first
    pub fn top_by_fee(&self, limit: usize) -> Result<Vec<Transaction>> {
        let pools: Vec<Arc<TransactionPool>> = self.pools.read()?.values().cloned().collect();
        let mut transactions = Vec::new();
        for pool in pools.iter().filter(|p| p.is_active()) {
            transactions.extend(pool.top_by_fee(limit)?);
        }
        transactions.sort_by(|a, b| {
            b.get_fee()
                .cmp(&a.get_fee())
                .then_with(|| a.get_timestamp().cmp(&b.get_timestamp()))
                .then_with(|| a.get_hash().cmp(b.get_hash()))
        });
        transactions.truncate(limit);
        Ok(transactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::tests::{sample_tx, ALICE, BOB};
    use crate::error::ErrorKind;

    #[test]
    fn test_pool_never_exceeds_capacity() {
        let pool = TransactionPool::new("main", 2);
        assert!(pool.add(sample_tx(1, 1)).unwrap());
        assert!(pool.add(sample_tx(2, 2)).unwrap());

        let err = pool.add(sample_tx(3, 3)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(err.to_string(), "Pool main is full (2/2)");
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.transactions().len(), pool.len());
    }

    #[test]
    fn test_duplicate_add_is_a_no_op() {
        let pool = TransactionPool::new("main", 2);
        let tx = sample_tx(1, 1);
        assert!(pool.add(tx.clone()).unwrap());
        assert!(!pool.add(tx.clone()).unwrap());
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(tx.get_hash()).unwrap().get_pool(), Some("main"));
    }

    #[test]
    fn test_inactive_pool_rejects() {
        let pool = TransactionPool::new("main", 2);
        pool.set_active(false).unwrap();
        assert!(matches!(
            pool.add(sample_tx(1, 1)),
            Err(BlockchainError::PoolInactive(_))
        ));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_remove_keeps_size_consistent() {
        let pool = TransactionPool::new("main", 5);
        let tx = sample_tx(1, 1);
        pool.add(tx.clone()).unwrap();
        pool.add(sample_tx(2, 2)).unwrap();

        let removed = pool.remove(tx.get_hash()).unwrap().unwrap();
        assert_eq!(removed.get_pool(), None);
        assert!(pool.remove(tx.get_hash()).unwrap().is_none());
        assert!(pool.remove("unknown").unwrap().is_none());
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.transactions().len(), 1);
    }

    #[test]
    fn test_top_by_fee_ordering() {
        let pool = TransactionPool::new("main", 10);
        pool.add(sample_tx(5, 30)).unwrap();
        pool.add(sample_tx(9, 50)).unwrap();
        pool.add(sample_tx(5, 10)).unwrap();
        pool.add(sample_tx(1, 0)).unwrap();

        let top = pool.top_by_fee(10).unwrap();
        let order: Vec<(u64, i64)> = top
            .iter()
            .map(|tx| (tx.get_fee().units(), tx.get_timestamp()))
            .collect();
        assert_eq!(order, vec![(9, 50), (5, 10), (5, 30), (1, 0)]);
        assert_eq!(pool.top_by_fee(2).unwrap().len(), 2);
        assert_eq!(pool.top_by_fee(10).unwrap(), top);
    }

    #[test]
    fn test_manager_enforces_single_membership() {
        let manager = PoolManager::new();
        manager.create_pool("main", 5).unwrap();
        manager.create_pool("priority", 5).unwrap();
        assert!(manager.create_pool("main", 1).is_err());
        assert_eq!(
            manager.get_pool("missing").unwrap_err().kind(),
            ErrorKind::NotFound
        );

        let tx = sample_tx(4, 4);
        assert!(manager.add("main", tx.clone()).unwrap());
        assert_eq!(manager.pool_of(tx.get_hash()).unwrap().as_deref(), Some("main"));
        let err = manager.add("priority", tx.clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        assert_eq!(manager.evict_confirmed(&[tx.clone()]).unwrap(), 1);
        assert!(manager.pool_of(tx.get_hash()).unwrap().is_none());
        assert!(manager.add("priority", tx).unwrap());
    }

    #[test]
    fn test_manager_merges_pools_by_fee() {
        let manager = PoolManager::new();
        manager.create_pool("a", 5).unwrap();
        manager.create_pool("b", 5).unwrap();
        manager.add("a", sample_tx(2, 1)).unwrap();
        manager.add("b", sample_tx(7, 1)).unwrap();
        manager.add("a", sample_tx(3, 1)).unwrap();

        let fees: Vec<u64> = manager
            .top_by_fee(2)
            .unwrap()
            .iter()
            .map(|tx| tx.get_fee().units())
            .collect();
        assert_eq!(fees, vec![7, 3]);
        assert_eq!(manager.pending().unwrap().len(), 3);
        assert_eq!(manager.pending_from(ALICE).unwrap().len(), 3);
        assert_eq!(manager.pending_from(&ALICE.replace('a', "A")).unwrap().len(), 3);
        assert!(manager.pending_from(BOB).unwrap().is_empty());
    }
}
