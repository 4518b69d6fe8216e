//! Consensus and pool integration tests
//!
//! Exercises mode switching, stake-weighted selection, the halving
//! schedule and fee-ordered pools through the public API.

use keystone_chain::{
    select_weighted, Amount, Block, BlockchainError, ChainNode, Config, ConsensusEngine,
    ConsensusType, Decimal8, ErrorKind, InMemoryTransport, KeyPair, Ledger, Miner, MiningConfig,
    MiningResult, PoolManager, ProofOfStake, Sha256Crypto, StakeRegistry, Transaction,
    GENESIS_PREVIOUS_HASH,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const CAROL: &str = "0xcccccccccccccccccccccccccccccccccccccccc";

fn coins(n: u64) -> Amount {
    Amount::from_coins(n)
}

fn engine(mode: ConsensusType, registry: Arc<StakeRegistry>) -> ConsensusEngine {
    let pos = ProofOfStake::new(registry, coins(10), Decimal8::parse("0.05").unwrap());
    ConsensusEngine::new(mode, pos, Arc::new(Sha256Crypto))
}

#[test]
fn test_selection_only_returns_eligible_staker() {
    let stakes = vec![(ALICE.to_string(), coins(15)), (BOB.to_string(), Amount::ZERO)];
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..200 {
        assert_eq!(select_weighted(&stakes, coins(10), &mut rng).unwrap(), ALICE);
    }

    assert!(matches!(
        select_weighted(&[(BOB.to_string(), coins(5))], coins(10), &mut rng),
        Err(BlockchainError::NoEligibleValidators)
    ));
    let err = select_weighted(&[(BOB.to_string(), Amount::ZERO)], Amount::ZERO, &mut rng)
        .unwrap_err();
    assert!(matches!(err, BlockchainError::ZeroTotalStake));
    assert_eq!(err.kind(), ErrorKind::ConsensusFailure);
}

#[test]
fn test_mode_switch_changes_validation() {
    let registry = Arc::new(StakeRegistry::new());
    registry.stake(ALICE, coins(12), None).unwrap();
    let consensus = engine(ConsensusType::ProofOfWork, registry);
    let crypto = Sha256Crypto;

    let genesis = Block::new_candidate(0, GENESIS_PREVIOUS_HASH, 1, 0, BOB, vec![], &crypto);
    let by_bob = Block::new_candidate(1, genesis.get_hash(), 2, 0, BOB, vec![], &crypto);
    let by_alice = Block::new_candidate(1, genesis.get_hash(), 2, 0, ALICE, vec![], &crypto);

    assert!(consensus.validate(&by_bob));
    let mut rng = StdRng::seed_from_u64(1);
    assert_eq!(consensus.select_next_validator(&mut rng).unwrap(), None);

    consensus.set_mode(ConsensusType::ProofOfStake).unwrap();
    assert!(!consensus.validate(&by_bob));
    assert!(consensus.validate(&by_alice));
    assert!(consensus.validate(&genesis));
    assert_eq!(
        consensus.select_next_validator(&mut rng).unwrap().as_deref(),
        Some(ALICE)
    );

    consensus.set_mode(ConsensusType::Hybrid).unwrap();
    let report = consensus.validate_detailed(&by_bob);
    assert!(!report.is_valid());
    assert!(report.reasons.iter().any(|r| r.contains("eligible")));
}

#[test]
fn test_reward_halving_schedule() {
    let ledger = Arc::new(Ledger::in_memory("rewards", Arc::new(Sha256Crypto)).unwrap());
    let consensus = Arc::new(engine(
        ConsensusType::ProofOfWork,
        Arc::new(StakeRegistry::new()),
    ));
    let miner = Miner::new(ledger, consensus, MiningConfig::default());
    assert_eq!(miner.calculate_mining_reward(0), coins(50));
    assert_eq!(miner.calculate_mining_reward(210_000), coins(25));
    assert_eq!(
        miner.calculate_mining_reward(420_000),
        Decimal8::parse("12.5").unwrap()
    );
}

#[test]
fn test_cancelled_mining_appends_nothing() {
    let ledger = Arc::new(Ledger::in_memory("cancel", Arc::new(Sha256Crypto)).unwrap());
    let consensus = Arc::new(engine(
        ConsensusType::ProofOfWork,
        Arc::new(StakeRegistry::new()),
    ));
    let miner = Miner::new(ledger.clone(), consensus, MiningConfig::default());

    let cancel = AtomicBool::new(true);
    let result = miner.mine_with_cancel(&[], CAROL, 12, &cancel);
    assert!(matches!(result, MiningResult::Cancelled { .. }));
    assert!(ledger.is_empty());

    let result = miner.mine_bounded(&[], CAROL, 12, 5);
    assert_eq!(result, MiningResult::Cancelled { attempts: 5 });
    assert!(ledger.is_empty());

    assert!(matches!(
        miner.mine(&[], "not-an-address", 0),
        MiningResult::Failure { .. }
    ));
}

#[test]
fn test_pools_order_by_fee_and_respect_capacity() {
    let crypto = Sha256Crypto;
    let pools = PoolManager::new();
    let pool = pools.create_pool("main", 3).unwrap();
    for (fee, timestamp) in [(5, 20), (9, 30), (5, 10)] {
        let tx = Transaction::new_at(
            ALICE,
            BOB,
            coins(1),
            Amount::from_units(fee),
            timestamp,
            &crypto,
        )
        .unwrap();
        assert!(pools.add("main", tx).unwrap());
    }

    let overflow =
        Transaction::new_at(ALICE, BOB, coins(1), Amount::ZERO, 40, &crypto).unwrap();
    let err = pools.add("main", overflow).unwrap_err();
    assert!(matches!(err, BlockchainError::PoolFull { current: 3, max: 3, .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(pool.len(), 3);

    let order: Vec<(u64, i64)> = pools
        .top_by_fee(10)
        .unwrap()
        .iter()
        .map(|tx| (tx.get_fee().units(), tx.get_timestamp()))
        .collect();
    assert_eq!(order, vec![(9, 30), (5, 10), (5, 20)]);
}

#[test]
fn test_hybrid_node_mines_for_selected_validator() {
    let mut config = Config::default();
    config.chain.initial_difficulty = 1;
    config.staking.min_stake = coins(10);
    config.consensus.mode = ConsensusType::Hybrid;
    let node = ChainNode::in_memory(config, Arc::new(InMemoryTransport::new())).unwrap();

    let validator = KeyPair::generate().unwrap().address();
    let genesis = node.initialize_chain(&validator).unwrap();
    assert!(genesis.get_hash().starts_with('0'));
    node.stake(&validator, coins(25), None).unwrap();

    let mut rng = StdRng::seed_from_u64(9);
    let result = node.produce_block(None, &mut rng).unwrap();
    let block = result.block().unwrap();
    assert_eq!(block.get_miner(), validator);
    assert_eq!(block.get_difficulty(), 1);
    assert!(block.get_hash().starts_with('0'));
    assert!(node.consensus().validate(block));
}

#[test]
fn test_parallel_adds_of_one_transaction_insert_once() {
    let pools = PoolManager::new();
    let pool = pools.create_pool("main", 100).unwrap();
    let tx = Transaction::new_at(ALICE, BOB, coins(2), Amount::ZERO, 77, &Sha256Crypto).unwrap();

    let shared = &pool;
    let inserted = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tx = tx.clone();
                scope.spawn(move || shared.add(tx).unwrap())
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|added| *added)
            .count()
    });

    assert_eq!(inserted, 1);
    assert_eq!(pool.len(), 1);
    assert!(pool.contains(tx.get_hash()));
}
