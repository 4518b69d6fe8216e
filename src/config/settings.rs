use crate::core::difficulty::{
    DifficultyAdjustment, INITIAL_DIFFICULTY, RETARGET_WINDOW, TARGET_BLOCK_INTERVAL_MS,
};
use crate::core::miner::MAX_TRANSACTIONS_PER_BLOCK;
use crate::core::monetary::{HALVING_INTERVAL, INITIAL_BLOCK_REWARD};
use crate::core::{Amount, ConsensusType, Decimal8, MiningConfig};
use crate::error::{BlockchainError, Result};
use crate::network::sync::{DEFAULT_BATCH_SIZE, DEFAULT_STALE_PEER_AGE_MS};
use crate::network::SyncConfig;
use log::info;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Path of the TOML file read by [`Config::from_env`]
pub const CONFIG_PATH_KEY: &str = "KEYSTONE_CONFIG";
pub const NODE_ID_KEY: &str = "NODE_ID";
pub const DATA_DIR_KEY: &str = "KEYSTONE_DATA_DIR";
/// File under the data directory holding settings saved by the CLI
pub const SAVED_CONFIG_FILE: &str = "keystone.toml";

const DEFAULT_NODE_ID: &str = "node-1";
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_CHAIN_NAME: &str = "keystone";
const DEFAULT_POOL_NAME: &str = "default";
const DEFAULT_POOL_SIZE: usize = 5_000;

/// Node configuration. Every field has a default, so an empty file is a
/// valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node_id: String,
    pub data_dir: PathBuf,
    pub chain: ChainSettings,
    pub mining: MiningSettings,
    pub staking: StakingSettings,
    pub pool: PoolSettings,
    pub sync: SyncSettings,
    pub consensus: ConsensusSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    pub name: String,
    pub initial_difficulty: u32,
    pub target_block_interval_ms: u64,
    /// Retarget difficulty after every produced block
    pub auto_retarget: bool,
    pub retarget_window: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningSettings {
    pub initial_reward: Amount,
    pub halving_interval: u64,
    pub max_transactions_per_block: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StakingSettings {
    pub min_stake: Amount,
    /// Fraction per year, e.g. "0.05"
    pub annual_rate: Decimal8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub default_pool: String,
    pub max_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub batch_size: u64,
    pub stale_peer_age_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSettings {
    pub mode: ConsensusType,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            node_id: DEFAULT_NODE_ID.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            chain: ChainSettings::default(),
            mining: MiningSettings::default(),
            staking: StakingSettings::default(),
            pool: PoolSettings::default(),
            sync: SyncSettings::default(),
            consensus: ConsensusSettings::default(),
        }
    }
}

impl Default for ChainSettings {
    fn default() -> Self {
        ChainSettings {
            name: DEFAULT_CHAIN_NAME.to_string(),
            initial_difficulty: INITIAL_DIFFICULTY,
            target_block_interval_ms: TARGET_BLOCK_INTERVAL_MS,
            auto_retarget: false,
            retarget_window: RETARGET_WINDOW,
        }
    }
}

impl Default for MiningSettings {
    fn default() -> Self {
        MiningSettings {
            initial_reward: INITIAL_BLOCK_REWARD,
            halving_interval: HALVING_INTERVAL,
            max_transactions_per_block: MAX_TRANSACTIONS_PER_BLOCK,
        }
    }
}

impl Default for StakingSettings {
    fn default() -> Self {
        StakingSettings {
            min_stake: Decimal8::from_coins(10),
            annual_rate: Decimal8::from_units(5_000_000),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            default_pool: DEFAULT_POOL_NAME.to_string(),
            max_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            batch_size: DEFAULT_BATCH_SIZE,
            stale_peer_age_ms: DEFAULT_STALE_PEER_AGE_MS,
        }
    }
}

impl Config {
    /// Read and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Config::from_toml_str(&contents)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Config> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| BlockchainError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// As [`Config::load`], but a file that does not exist yet gives the
    /// defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if path.exists() {
            Config::load(path)
        } else {
            info!("No configuration at {}, using defaults", path.display());
            Ok(Config::default())
        }
    }

    /// The file named by `KEYSTONE_CONFIG`, else the saved file under the
    /// data directory, else defaults; `NODE_ID` and `KEYSTONE_DATA_DIR` are
    /// applied on top
    pub fn from_env() -> Result<Config> {
        Config::from_sources(
            env::var(CONFIG_PATH_KEY).ok().map(PathBuf::from),
            env::var(NODE_ID_KEY).ok(),
            env::var(DATA_DIR_KEY).ok().map(PathBuf::from),
        )
    }

    pub fn from_sources(
        file: Option<PathBuf>,
        node_id: Option<String>,
        data_dir: Option<PathBuf>,
    ) -> Result<Config> {
        let mut config = match file {
            Some(path) => Config::load(path)?,
            None => {
                let dir = data_dir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
                Config::load_or_default(dir.join(SAVED_CONFIG_FILE))?
            }
        };
        if let Some(node_id) = node_id {
            config.node_id = node_id;
        }
        if let Some(dir) = data_dir {
            config.data_dir = dir;
        }
        config.validate()?;
        Ok(config)
    }

    /// Where settings changed from the command line are written when no
    /// file was named
    pub fn saved_path(&self) -> PathBuf {
        self.data_dir.join(SAVED_CONFIG_FILE)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| BlockchainError::Config(format!("cannot encode configuration: {e}")))?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(invalid("node_id must not be empty"));
        }
        if self.chain.name.trim().is_empty() {
            return Err(invalid("chain.name must not be empty"));
        }
        DifficultyAdjustment::validate_difficulty(self.chain.initial_difficulty)
            .map_err(|e| BlockchainError::Config(format!("chain.initial_difficulty: {e}")))?;
        if self.chain.target_block_interval_ms == 0 {
            return Err(invalid("chain.target_block_interval_ms must be positive"));
        }
        if self.chain.retarget_window < 2 {
            return Err(invalid("chain.retarget_window must cover at least 2 blocks"));
        }
        if self.mining.halving_interval == 0 {
            return Err(invalid("mining.halving_interval must be positive"));
        }
        if self.mining.max_transactions_per_block == 0 {
            return Err(invalid("mining.max_transactions_per_block must be positive"));
        }
        if self.staking.min_stake.is_zero() {
            return Err(invalid("staking.min_stake must be positive"));
        }
        if self.staking.annual_rate > Decimal8::ONE {
            return Err(invalid("staking.annual_rate must not exceed 1"));
        }
        if self.pool.default_pool.trim().is_empty() {
            return Err(invalid("pool.default_pool must not be empty"));
        }
        if self.pool.max_size == 0 {
            return Err(invalid("pool.max_size must be positive"));
        }
        if self.sync.batch_size == 0 {
            return Err(invalid("sync.batch_size must be positive"));
        }
        if self.sync.stale_peer_age_ms <= 0 {
            return Err(invalid("sync.stale_peer_age_ms must be positive"));
        }
        Ok(())
    }

    pub fn get_node_id(&self) -> &str {
        self.node_id.as_str()
    }

    /// Location of the sled database for this node
    pub fn chain_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.node_id).join("chain")
    }

    pub fn mining_config(&self) -> MiningConfig {
        MiningConfig {
            initial_reward: self.mining.initial_reward,
            halving_interval: self.mining.halving_interval,
            max_transactions_per_block: self.mining.max_transactions_per_block,
            target_block_interval_ms: self.chain.target_block_interval_ms,
            retarget_window: self.chain.retarget_window,
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            batch_size: self.sync.batch_size,
            stale_peer_age_ms: self.sync.stale_peer_age_ms,
        }
    }
}

fn invalid(message: &str) -> BlockchainError {
    BlockchainError::Config(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.mining.max_transactions_per_block, 10);
        assert_eq!(config.consensus.mode, ConsensusType::ProofOfWork);
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = Config::from_toml_str(
            r#"
            node_id = "validator-7"

            [chain]
            name = "testnet"
            initial_difficulty = 1
            auto_retarget = true

            [staking]
            min_stake = "2.5"
            annual_rate = "0.1"

            [consensus]
            mode = "hybrid"
            "#,
        )
        .unwrap();
        assert_eq!(config.get_node_id(), "validator-7");
        assert_eq!(config.chain.name, "testnet");
        assert!(config.chain.auto_retarget);
        assert_eq!(config.chain.retarget_window, RETARGET_WINDOW);
        assert_eq!(config.staking.min_stake, Decimal8::parse("2.5").unwrap());
        assert_eq!(config.consensus.mode, ConsensusType::Hybrid);
        assert_eq!(config.mining_config().retarget_window, RETARGET_WINDOW);
        assert_eq!(config.sync_config().batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        for toml in [
            "[chain]\ninitial_difficulty = 13",
            "[pool]\nmax_size = 0",
            "[sync]\nbatch_size = 0",
            "[staking]\nannual_rate = \"1.5\"",
            "node_id = \"  \"",
        ] {
            let err = Config::from_toml_str(toml).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Internal, "{toml}");
            assert!(matches!(err, BlockchainError::Config(_)));
        }
        assert!(Config::from_toml_str("[chain\n").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keystone.toml");
        let mut config = Config::default();
        config.chain.name = "saved".to_string();
        config.consensus.mode = ConsensusType::ProofOfStake;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(Config::load(dir.path().join("missing.toml")).is_err());
        assert!(loaded.chain_db_path().ends_with("node-1/chain"));
    }

    #[test]
    fn test_saved_settings_are_found_without_a_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = Config::from_sources(None, None, Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(fresh.consensus.mode, ConsensusType::ProofOfWork);

        let mut config = fresh.clone();
        config.consensus.mode = ConsensusType::ProofOfStake;
        config.chain.initial_difficulty = 3;
        config.save(config.saved_path()).unwrap();

        let reloaded = Config::from_sources(None, None, Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(reloaded.consensus.mode, ConsensusType::ProofOfStake);
        assert_eq!(reloaded.chain.initial_difficulty, 3);
        assert_eq!(reloaded.data_dir, dir.path());

        let renamed =
            Config::from_sources(None, Some("node-9".to_string()), Some(dir.path().to_path_buf()))
                .unwrap();
        assert_eq!(renamed.get_node_id(), "node-9");
        assert_eq!(renamed.consensus.mode, ConsensusType::ProofOfStake);
    }

    #[test]
    fn test_missing_file_loads_defaults_when_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.toml");
        assert_eq!(Config::load_or_default(&path).unwrap(), Config::default());
        assert!(Config::from_sources(Some(path), None, None).is_err());
    }
}
