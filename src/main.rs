// Entry point for the keystone-chain command line
use clap::Parser;
use data_encoding::HEXLOWER;
use keystone_chain::{
    ChainNode, Command, Config, ConsensusType, InMemoryTransport, KeyPair, MiningResult, Node, Opt, Transaction,
};
use log::{error, info, LevelFilter};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();
    if let Err(e) = run_command(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

/// Commands that write settings may name a file that does not exist yet
fn load_config(path: Option<&PathBuf>, command: &Command) -> keystone_chain::Result<Config> {
    let updates_settings = matches!(
        command,
        Command::SetDifficulty { .. } | Command::SetConsensus { .. }
    );
    match path {
        Some(path) if updates_settings => Config::load_or_default(path),
        Some(path) => Config::load(path),
        None => Config::from_env(),
    }
}

/// Settings changed from the command line are written back so later runs
/// pick them up
fn save_config(config: &Config, path: Option<&PathBuf>) -> keystone_chain::Result<PathBuf> {
    let path = path.cloned().unwrap_or_else(|| config.saved_path());
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    config.save(&path)?;
    Ok(path)
}

fn open_node(config: Config) -> keystone_chain::Result<ChainNode> {
    ChainNode::open(config, Arc::new(InMemoryTransport::new()))
}

fn run_command(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = opt.config.as_ref();
    let mut config = load_config(config_path, &opt.command)?;

    match opt.command {
        Command::Createchain { address } => {
            let node = open_node(config)?;
            let genesis = node.initialize_chain(&address)?;
            node.flush()?;
            println!("Genesis block {}", genesis.get_hash());
        }
        Command::Mine { address, count } => {
            let node = open_node(config)?;
            let mut rng = rand::thread_rng();
            for _ in 0..count {
                match node.produce_block(address.as_deref(), &mut rng)? {
                    MiningResult::Success {
                        block,
                        reward,
                        attempts,
                        ..
                    } => println!(
                        "Block {} {} ({} transactions, reward {reward}, {attempts} attempts)",
                        block.get_index(),
                        block.get_hash(),
                        block.get_transactions().len()
                    ),
                    MiningResult::Cancelled { attempts } => {
                        return Err(format!("mining stopped after {attempts} attempts").into())
                    }
                    MiningResult::Failure { message } => return Err(message.into()),
                }
            }
            node.flush()?;
        }
        Command::Send {
            key,
            to,
            amount,
            fee,
            miner,
        } => {
            let keys = KeyPair::from_pkcs8(&HEXLOWER.decode(key.as_bytes())?)?;
            let node = open_node(config)?;
            let crypto = node.ledger().crypto().clone();
            let mut tx = Transaction::new(&keys.address(), &to, amount, fee, crypto.as_ref())?;
            tx.sign(&keys, crypto.as_ref())?;
            node.submit_transaction(None, tx.clone())?;

            let result = node.produce_block(Some(&miner), &mut rand::thread_rng())?;
            node.flush()?;
            match result.block() {
                Some(block) => println!("Transaction {} in block {}", tx.get_hash(), block.get_index()),
                None => return Err(format!("transaction {} was not mined", tx.get_hash()).into()),
            }
        }
        Command::GetBalance { address } => {
            let node = open_node(config)?;
            println!("Balance of {address}: {}", node.accounts().balance(&address));
        }
        Command::Printchain => {
            let node = open_node(config)?;
            for block in node.ledger().blocks()?.iter().rev() {
                println!("Index: {}", block.get_index());
                println!("Previous hash: {}", block.get_previous_hash());
                println!("Hash: {}", block.get_hash());
                println!("Timestamp: {}", block.get_timestamp());
                println!("Producer: {}", block.get_miner());
                for tx in block.get_transactions() {
                    println!(
                        "- {} {} -> {} amount {} fee {}",
                        tx.get_hash(),
                        tx.get_sender(),
                        tx.get_recipient(),
                        tx.get_amount(),
                        tx.get_fee()
                    );
                }
                println!();
            }
        }
        Command::Validate => {
            let node = open_node(config)?;
            let valid = node.validate_chain()?;
            println!("{}", serde_json::to_string_pretty(&node.chain_info()?)?);
            if !valid {
                return Err("chain failed validation".into());
            }
        }
        Command::SetDifficulty { difficulty } => {
            config.chain.initial_difficulty = difficulty;
            config.validate()?;
            let path = save_config(&config, config_path)?;
            println!("Difficulty set to {difficulty} in {}", path.display());
        }
        Command::SetConsensus { mode } => {
            config.consensus.mode = mode;
            let path = save_config(&config, config_path)?;
            println!("Consensus set to {mode} in {}", path.display());
        }
        Command::Stake {
            address,
            amount,
            weight,
            lock_until,
        } => {
            let node = open_node(config)?;
            let id = node.stake(&address, amount, weight)?;
            if let Some(until) = lock_until {
                node.lock_stake(&id, until)?;
            }
            node.flush()?;
            println!("Stake {id}: {amount} bonded for {address}");
            println!("Balance of {address}: {}", node.accounts().balance(&address));
        }
        Command::Unstake { stake_id } => {
            let node = open_node(config)?;
            node.unlock_stake(&stake_id)?;
            node.flush()?;
            println!("Stake {stake_id} unlocked");
        }
        Command::Withdraw { stake_id } => {
            let node = open_node(config)?;
            let payout = node.withdraw_stake(&stake_id)?;
            node.flush()?;
            println!("Stake {stake_id} withdrawn, {payout} returned");
        }
        Command::Stakes { address } => {
            let node = open_node(config)?;
            for stake in node.stakes().stakes_for(&address)? {
                println!(
                    "{} {} {} rewards {}",
                    stake.get_id(),
                    stake.get_status(),
                    stake.get_amount(),
                    stake.get_accrued_rewards()
                );
            }
            println!("Bonded: {}", node.stakes().bonded_stake(&address)?);
        }
        Command::Keygen => {
            let keys = KeyPair::generate()?;
            println!("Address: {}", keys.address());
            println!("Private key: {}", HEXLOWER.encode(&keys.pkcs8));
        }
        Command::SimulateSync { blocks, batch_size } => {
            if let Some(batch_size) = batch_size {
                config.sync.batch_size = batch_size;
            }
            simulate_sync(config, blocks)?;
        }
    }
    Ok(())
}

/// Build a simulated peer holding `blocks` blocks and catch a fresh node up
/// with it through the in-process transport
fn simulate_sync(mut config: Config, blocks: u32) -> keystone_chain::Result<()> {
    config.consensus.mode = ConsensusType::ProofOfWork;
    let producer = KeyPair::generate()?.address();
    let peer = ChainNode::in_memory(config.clone(), Arc::new(InMemoryTransport::new()))?;
    peer.initialize_chain(&producer)?;
    let mut rng = rand::thread_rng();
    for _ in 1..blocks {
        peer.produce_block(Some(&producer), &mut rng)?;
    }
    info!("Simulated peer is at height {}", peer.ledger().height());

    let transport = Arc::new(InMemoryTransport::new());
    transport.attach("peer-1", peer.ledger().clone())?;
    let local = ChainNode::in_memory(config, transport)?;
    local.peers().register(Node::new("peer-1", "127.0.0.1", 2001))?;

    match local.resolve_conflicts()? {
        Some(report) => println!(
            "Synced from {}: height {} -> {} ({} blocks, {:?})",
            report.peer_id, report.start_height, report.end_height, report.blocks_applied, report.outcome
        ),
        None => println!("Already up to date"),
    }
    println!("Sync progress: {}%", local.sync_manager().sync_progress()?);
    Ok(())
}
