use crate::core::{ConsensusType, Decimal8};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "keystone-chain", about = "Single-node ledger with pluggable consensus")]
pub struct Opt {
    /// TOML configuration file; falls back to $KEYSTONE_CONFIG, then the
    /// settings saved under the data directory, then defaults
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "createchain", about = "Create the genesis block")]
    Createchain {
        #[arg(help = "The address credited with the genesis reward")]
        address: String,
    },
    #[command(name = "mine", about = "Produce blocks from pending transactions")]
    Mine {
        #[arg(help = "Producer address (proof of work); stake modes pick a validator")]
        address: Option<String>,
        #[arg(long = "count", default_value_t = 1, help = "Number of blocks to produce")]
        count: u32,
    },
    #[command(name = "send", about = "Sign a transfer and mine it into a block")]
    Send {
        #[arg(help = "Sender private key (PKCS#8, hex) as printed by keygen")]
        key: String,
        #[arg(help = "Recipient address")]
        to: String,
        #[arg(help = "Amount, up to 8 decimal places")]
        amount: Decimal8,
        #[arg(long = "fee", default_value = "0", help = "Transaction fee")]
        fee: Decimal8,
        #[arg(long = "miner", help = "Producer address for the block")]
        miner: String,
    },
    #[command(name = "getbalance", about = "Balance of an address after replaying the chain")]
    GetBalance {
        #[arg(help = "The account address")]
        address: String,
    },
    #[command(name = "printchain", about = "Print all blocks in the chain")]
    Printchain,
    #[command(name = "validate", about = "Validate the whole chain")]
    Validate,
    #[command(name = "setdifficulty", about = "Set the proof-of-work difficulty")]
    SetDifficulty {
        #[arg(help = "Leading zero characters required (0-12)")]
        difficulty: u32,
    },
    #[command(name = "setconsensus", about = "Switch the consensus mode")]
    SetConsensus {
        #[arg(help = "pow, pos or hybrid")]
        mode: ConsensusType,
    },
    #[command(name = "stake", about = "Bond part of an address's balance as stake")]
    Stake {
        #[arg(help = "The staking address")]
        address: String,
        #[arg(help = "Amount to bond, up to 8 decimal places")]
        amount: Decimal8,
        #[arg(long = "weight", help = "Reward weight multiplier (default 1)")]
        weight: Option<Decimal8>,
        #[arg(long = "lock-until", help = "Lock the stake until this time (ms since epoch)")]
        lock_until: Option<i64>,
    },
    #[command(name = "unstake", about = "Unbond a stake so it can be withdrawn")]
    Unstake {
        #[arg(help = "Stake id as printed by stake")]
        stake_id: String,
    },
    #[command(name = "withdraw", about = "Return an unbonded stake and its rewards")]
    Withdraw {
        #[arg(help = "Stake id as printed by stake")]
        stake_id: String,
    },
    #[command(name = "stakes", about = "List the stakes held by an address")]
    Stakes {
        #[arg(help = "The staking address")]
        address: String,
    },
    #[command(name = "keygen", about = "Generate a key pair and its address")]
    Keygen,
    #[command(
        name = "simulate-sync",
        about = "Sync a fresh in-memory node from a simulated peer"
    )]
    SimulateSync {
        #[arg(long = "blocks", default_value_t = 5, help = "Blocks on the simulated peer")]
        blocks: u32,
        #[arg(long = "batch-size", help = "Override the configured sync batch size")]
        batch_size: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let opt = Opt::try_parse_from(["keystone-chain", "setconsensus", "hybrid"]).unwrap();
        assert!(matches!(
            opt.command,
            Command::SetConsensus {
                mode: ConsensusType::Hybrid
            }
        ));

        let opt = Opt::try_parse_from([
            "keystone-chain",
            "--config",
            "node.toml",
            "mine",
            "--count",
            "3",
        ])
        .unwrap();
        assert_eq!(opt.config, Some(PathBuf::from("node.toml")));
        assert!(matches!(
            opt.command,
            Command::Mine {
                address: None,
                count: 3
            }
        ));

        let opt = Opt::try_parse_from([
            "keystone-chain",
            "stake",
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            "12.5",
            "--lock-until",
            "1700000000000",
        ])
        .unwrap();
        match opt.command {
            Command::Stake {
                amount,
                weight,
                lock_until,
                ..
            } => {
                assert_eq!(amount, Decimal8::parse("12.5").unwrap());
                assert_eq!(weight, None);
                assert_eq!(lock_until, Some(1_700_000_000_000));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(matches!(
            Opt::try_parse_from(["keystone-chain", "withdraw", "abc"]).unwrap().command,
            Command::Withdraw { .. }
        ));
        assert!(Opt::try_parse_from(["keystone-chain", "unstake"]).is_err());

        assert!(Opt::try_parse_from(["keystone-chain", "setconsensus", "raft"]).is_err());
        assert!(Opt::try_parse_from(["keystone-chain", "setdifficulty", "-1"]).is_err());
    }
}
