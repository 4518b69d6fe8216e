//! Administrative surface for one chain
//!
//! [`ChainNode`] wires the ledger, consensus engine, miner, pools, stake
//! registry, account book and sync manager together from a [`Config`].
//! Each operation passes through to the component that owns it; the node
//! only adds the bookkeeping that spans components (settling balances for
//! accepted blocks, evicting their transactions from the pools, and saving
//! stake records).

use crate::config::Config;
use crate::core::{
    Amount, Block, ChainInfo, ConsensusEngine, ConsensusType, Decimal8, Ledger, Miner,
    MiningResult, ProofOfStake, Stake, StakeRegistry, StakeStatus, Transaction,
    TransactionStatus,
};
use crate::error::{BlockchainError, Result};
use crate::network::{PeerRegistry, PeerTransport, SyncManager, SyncReport};
use crate::storage::{
    AccountBook, BlockStore, MemoryBlockStore, MemoryStakeStore, PoolManager, SledBlockStore,
    StakeStore,
};
use crate::utils::{current_timestamp, CryptoProvider, Sha256Crypto};
use log::{info, warn};
use rand::Rng;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub struct ChainNode {
    config: Config,
    ledger: Arc<Ledger>,
    consensus: Arc<ConsensusEngine>,
    stakes: Arc<StakeRegistry>,
    stake_store: Box<dyn StakeStore>,
    miner: Miner,
    pools: PoolManager,
    accounts: AccountBook,
    sync: SyncManager,
}

impl ChainNode {
    /// Build a node over `store`. Blocks already in the store are replayed
    /// into the account book, then saved stakes are restored and their
    /// balance effects applied.
    pub fn new(
        config: Config,
        store: Box<dyn BlockStore>,
        stake_store: Box<dyn StakeStore>,
        crypto: Arc<dyn CryptoProvider>,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<ChainNode> {
        config.validate()?;

        let mut info = ChainInfo::new(&config.chain.name);
        info.difficulty = config.chain.initial_difficulty;
        info.block_reward = config.mining.initial_reward;
        info.target_block_interval_ms = config.chain.target_block_interval_ms;
        info.consensus_type = config.consensus.mode;
        let ledger = Arc::new(Ledger::open(info, store, crypto.clone())?);

        let stakes = Arc::new(StakeRegistry::new());
        let pos = ProofOfStake::new(
            stakes.clone(),
            config.staking.min_stake,
            config.staking.annual_rate,
        );
        let consensus = Arc::new(ConsensusEngine::new(config.consensus.mode, pos, crypto));
        let miner = Miner::new(ledger.clone(), consensus.clone(), config.mining_config());

        let pools = PoolManager::new();
        pools.create_pool(&config.pool.default_pool, config.pool.max_size)?;

        let sync = SyncManager::new(
            ledger.clone(),
            consensus.clone(),
            Arc::new(PeerRegistry::new()),
            transport,
            config.sync_config(),
        );

        let node = ChainNode {
            config,
            ledger,
            consensus,
            stakes,
            stake_store,
            miner,
            pools,
            accounts: AccountBook::new(),
            sync,
        };
        for block in node.ledger.blocks()? {
            node.settle(&block);
        }
        for stake in node.stake_store.load()? {
            node.replay_stake(stake)?;
        }
        Ok(node)
    }

    /// A bonded or unlocked stake still holds its principal; a withdrawn one
    /// has paid principal back plus its rewards
    fn replay_stake(&self, stake: Stake) -> Result<()> {
        let result = match stake.get_status() {
            StakeStatus::Withdrawn => self
                .accounts
                .credit(stake.get_address(), stake.get_accrued_rewards()),
            _ => self.accounts.debit(stake.get_address(), stake.get_amount()),
        };
        if let Err(e) = result {
            warn!("Stake {} replay: {e}", stake.get_id());
        }
        self.stakes.restore(stake)
    }

    /// Volatile node with the default crypto provider
    pub fn in_memory(config: Config, transport: Arc<dyn PeerTransport>) -> Result<ChainNode> {
        ChainNode::new(
            config,
            Box::new(MemoryBlockStore::new()),
            Box::new(MemoryStakeStore::new()),
            Arc::new(Sha256Crypto),
            transport,
        )
    }

    /// Node persisted in a sled database under the configured data directory.
    /// Blocks and stakes share the database.
    pub fn open(config: Config, transport: Arc<dyn PeerTransport>) -> Result<ChainNode> {
        let store = SledBlockStore::open(config.chain_db_path())?;
        let stake_store = store.stake_store()?;
        ChainNode::new(
            config,
            Box::new(store),
            Box::new(stake_store),
            Arc::new(Sha256Crypto),
            transport,
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn consensus(&self) -> &Arc<ConsensusEngine> {
        &self.consensus
    }

    pub fn stakes(&self) -> &Arc<StakeRegistry> {
        &self.stakes
    }

    pub fn miner(&self) -> &Miner {
        &self.miner
    }

    pub fn pools(&self) -> &PoolManager {
        &self.pools
    }

    pub fn accounts(&self) -> &AccountBook {
        &self.accounts
    }

    pub fn sync_manager(&self) -> &SyncManager {
        &self.sync
    }

    pub fn peers(&self) -> &Arc<PeerRegistry> {
        self.sync.peers()
    }

    pub fn chain_info(&self) -> Result<ChainInfo> {
        self.ledger.info()
    }

    pub fn flush(&self) -> Result<()> {
        self.ledger.flush()?;
        self.stake_store.flush()
    }

    /// Create the genesis block, produced by `producer`. Under proof of
    /// stake the genesis block carries no work.
    pub fn initialize_chain(&self, producer: &str) -> Result<Block> {
        if !self.ledger.is_empty() {
            return Err(BlockchainError::InvalidState(format!(
                "Chain {} is already initialized",
                self.config.chain.name
            )));
        }
        let mode = self.consensus.mode()?;
        let difficulty = if mode.uses_work() {
            self.ledger.difficulty()?
        } else {
            0
        };
        let result = self.miner.mine(&[], producer, difficulty);
        let block = self.accept_mined(result)?;
        info!(
            "Initialized chain {} with genesis {}",
            self.config.chain.name,
            block.get_hash()
        );
        Ok(block)
    }

    pub fn switch_consensus(&self, mode: ConsensusType) -> Result<()> {
        self.consensus.set_mode(mode)?;
        self.ledger.set_consensus_type(mode)
    }

    pub fn set_difficulty(&self, difficulty: u32) -> Result<()> {
        self.ledger.set_difficulty(difficulty)
    }

    pub fn retarget(&self) -> Result<u32> {
        self.miner.retarget()
    }

    /// Check and queue a signed transaction. `pool` defaults to the
    /// configured default pool. Returns false when the pool already held it.
    pub fn submit_transaction(&self, pool: Option<&str>, tx: Transaction) -> Result<bool> {
        let crypto = self.ledger.crypto();
        if !tx.verify_signature(crypto.as_ref()) {
            return Err(BlockchainError::InvalidArgument(format!(
                "Transaction {} has an invalid signature",
                tx.get_hash()
            )));
        }
        if self.ledger.is_confirmed(tx.get_hash()) {
            return Err(BlockchainError::DoubleSpend(tx.get_hash().to_string()));
        }

        let pool_name = pool.unwrap_or(&self.config.pool.default_pool);
        let already_queued = self.pools.pool_of(tx.get_hash())?.is_some();
        if !already_queued {
            let committed = self
                .pools
                .pending_from(tx.get_sender())?
                .iter()
                .fold(Amount::ZERO, |total, p| {
                    total.saturating_add(p.get_amount()).saturating_add(p.get_fee())
                });
            let needed = committed
                .saturating_add(tx.get_amount())
                .saturating_add(tx.get_fee());
            let balance = self.accounts.balance(tx.get_sender());
            if balance < needed {
                return Err(BlockchainError::InvalidState(format!(
                    "Insufficient funds for {}: balance {balance}, needed {needed}",
                    tx.get_sender()
                )));
            }
        }
        self.pools.add(pool_name, tx)
    }

    /// Produce the next block from the best-paying pending transactions.
    ///
    /// Proof of work mines for `producer`. Proof of stake forges a block
    /// without work for the selected validator. Hybrid mines at the ledger
    /// difficulty with the selected validator as producer.
    pub fn produce_block<R: Rng + ?Sized>(
        &self,
        producer: Option<&str>,
        rng: &mut R,
    ) -> Result<MiningResult> {
        self.produce(producer, rng, None)
    }

    /// As [`ChainNode::produce_block`], abandoning the nonce search once
    /// `cancel` is raised
    pub fn produce_block_with_cancel<R: Rng + ?Sized>(
        &self,
        producer: Option<&str>,
        rng: &mut R,
        cancel: &AtomicBool,
    ) -> Result<MiningResult> {
        self.produce(producer, rng, Some(cancel))
    }

    fn produce<R: Rng + ?Sized>(
        &self,
        producer: Option<&str>,
        rng: &mut R,
        cancel: Option<&AtomicBool>,
    ) -> Result<MiningResult> {
        let mode = self.consensus.mode()?;
        let (address, difficulty) = match self.consensus.select_next_validator(rng)? {
            Some(validator) if mode.uses_work() => (validator, self.ledger.difficulty()?),
            Some(validator) => (validator, 0),
            None => {
                let producer = producer.ok_or_else(|| {
                    BlockchainError::InvalidArgument(
                        "Proof of work needs a miner address".to_string(),
                    )
                })?;
                (producer.to_string(), self.ledger.difficulty()?)
            }
        };

        let pending = self
            .pools
            .top_by_fee(self.miner.get_config().max_transactions_per_block)?;
        let result = match cancel {
            Some(cancel) => self
                .miner
                .mine_with_cancel(&pending, &address, difficulty, cancel),
            None => self.miner.mine(&pending, &address, difficulty),
        };

        if let MiningResult::Success { block, .. } = &result {
            self.after_append(std::slice::from_ref(block))?;
            if self.config.chain.auto_retarget {
                self.miner.retarget()?;
            }
        }
        Ok(result)
    }

    fn accept_mined(&self, result: MiningResult) -> Result<Block> {
        match result {
            MiningResult::Success { block, .. } => {
                self.after_append(std::slice::from_ref(&block))?;
                Ok(block)
            }
            MiningResult::Cancelled { attempts } => Err(BlockchainError::InvalidState(format!(
                "Block production stopped after {attempts} attempts"
            ))),
            MiningResult::Failure { message } => Err(BlockchainError::ConsensusFailure(message)),
        }
    }

    /// Sync against one peer, then settle whatever was applied
    pub fn trigger_sync(&self, peer_id: &str) -> Result<SyncReport> {
        let report = self.sync.sync_with_peer(peer_id)?;
        self.absorb(&report)?;
        Ok(report)
    }

    /// Longest-chain resolution across active peers
    pub fn resolve_conflicts(&self) -> Result<Option<SyncReport>> {
        let report = self.sync.resolve_conflicts()?;
        if let Some(report) = &report {
            self.absorb(report)?;
        }
        Ok(report)
    }

    /// Settle only what this sync appended; blocks a concurrent producer or
    /// sync added were settled by that caller
    fn absorb(&self, report: &SyncReport) -> Result<()> {
        self.after_append(&report.applied)
    }

    fn after_append(&self, blocks: &[Block]) -> Result<()> {
        for block in blocks {
            self.settle(block);
            self.pools.evict_confirmed(block.get_transactions())?;
        }
        Ok(())
    }

    /// Move the block's transfers through the account book and pay the
    /// producer its fees plus the block reward. The chain is authoritative:
    /// a transfer the book cannot cover is logged and skipped.
    fn settle(&self, block: &Block) {
        let mut fees = Amount::ZERO;
        for tx in block.get_transactions() {
            fees = fees.saturating_add(tx.get_fee());
            if let Err(e) = self.accounts.transfer(
                tx.get_sender(),
                tx.get_recipient(),
                tx.get_amount(),
                tx.get_fee(),
            ) {
                warn!("Block {} transaction {}: {e}", block.get_index(), tx.get_hash());
            }
        }
        let reward = self.miner.calculate_mining_reward(block.get_index());
        if let Err(e) = self
            .accounts
            .credit(block.get_miner(), reward.saturating_add(fees))
        {
            warn!("Block {} producer payout: {e}", block.get_index());
        }
    }

    /// Pending transactions come from the pools, confirmed ones from the
    /// ledger
    pub fn transactions_with_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>> {
        match status {
            TransactionStatus::Pending => self.pools.pending(),
            TransactionStatus::Confirmed => Ok(self
                .ledger
                .blocks()?
                .into_iter()
                .flat_map(|block| block.get_transactions().to_vec())
                .collect()),
        }
    }

    /// Whole-chain validation; updates the chain's validity flag
    pub fn validate_chain(&self) -> Result<bool> {
        self.ledger.validate_chain()
    }

    /// Bond `amount` from the address's balance; returns the stake id
    pub fn stake(&self, address: &str, amount: Amount, weight: Option<Decimal8>) -> Result<String> {
        self.accounts.debit(address, amount)?;
        match self.stakes.stake(address, amount, weight) {
            Ok(id) => {
                self.save_stake(&id)?;
                Ok(id)
            }
            Err(e) => {
                self.accounts.credit(address, amount)?;
                Err(e)
            }
        }
    }

    pub fn lock_stake(&self, stake_id: &str, until: i64) -> Result<()> {
        self.stakes.lock(stake_id, until, current_timestamp()?)?;
        self.save_stake(stake_id)
    }

    pub fn unlock_stake(&self, stake_id: &str) -> Result<()> {
        self.stakes.unlock(stake_id, current_timestamp()?)?;
        self.save_stake(stake_id)
    }

    fn save_stake(&self, stake_id: &str) -> Result<()> {
        let stake = self
            .stakes
            .get(stake_id)?
            .ok_or_else(|| BlockchainError::NotFound(format!("stake {stake_id}")))?;
        self.stake_store.put(&stake)
    }

    /// Withdraw a stake and credit principal plus rewards back to its owner
    pub fn withdraw_stake(&self, stake_id: &str) -> Result<Amount> {
        let stake = self
            .stakes
            .get(stake_id)?
            .ok_or_else(|| BlockchainError::NotFound(format!("stake {stake_id}")))?;
        let payout = self.stakes.withdraw(stake_id, current_timestamp()?)?;
        self.save_stake(stake_id)?;
        self.accounts.credit(stake.get_address(), payout)?;
        Ok(payout)
    }

    /// Accrue one period of staking rewards at the configured annual rate
    pub fn accrue_stake_rewards(&self) -> Result<Amount> {
        let total = self.stakes.accrue_rewards(self.config.staking.annual_rate)?;
        for stake in self.stakes.all()? {
            if stake.get_status().is_bonded() {
                self.stake_store.put(&stake)?;
            }
        }
        Ok(total)
    }
}
