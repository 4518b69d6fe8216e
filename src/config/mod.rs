//! Configuration management
//!
//! Node settings come from a TOML file with environment overrides. The
//! resulting value is handed to the components that need it; there is no
//! process-wide configuration state.

pub mod settings;

pub use settings::{
    ChainSettings, Config, ConsensusSettings, MiningSettings, PoolSettings, StakingSettings,
    SyncSettings,
};
