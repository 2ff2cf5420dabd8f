//! Network-wide constants and per-node runtime knobs.
//!
//! Split between the *consensus* surface (anything that changes what a valid
//! chain looks like — two nodes with different values here cannot
//! interoperate) and the *runtime* surface (how this particular process
//! behaves; safe to differ node to node).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Coin denomination and supply policy. Part of the consensus surface:
/// every node must agree on these to accept each other's blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusConfig {
    /// Target time between blocks, in nanoseconds.
    pub mine_rate: u128,
    pub coin_name: String,
    pub unit_name: String,
    pub units_per_coin: u64,
    pub starting_reward: u64,
    pub halving_interval: u64,
    pub supply_model: SupplyModel,
    pub foundation_address: String,
    pub foundation_fee_rate: f64,
    pub min_relay_fee_per_byte: u64,
    pub dynamic_fee_base_per_byte: u64,
    pub fee_congestion_target_txs: u64,
    pub fee_max_multiplier: u64,
    pub min_absolute_fee: u64,
    pub tx_size_input_overhead: usize,
    pub max_txs_per_block: usize,
    /// Address credited with the genesis allocation.
    pub treasury_address: String,
    /// Units minted directly into `treasury_address` at genesis.
    pub initial_supply: u64,
    pub genesis_message: String,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        const SECONDS: u128 = 1_000_000_000;
        const UNITS_PER_COIN: u64 = 100_000_000;
        Self {
            mine_rate: 15 * SECONDS,
            coin_name: "PYTH".to_string(),
            unit_name: "pipu".to_string(),
            units_per_coin: UNITS_PER_COIN,
            starting_reward: 12 * UNITS_PER_COIN,
            halving_interval: 4_204_800,
            supply_model: SupplyModel::Halving,
            foundation_address: "c8102ec9be0227ce30dbf77fec8a4e19b9e701ea".to_string(),
            foundation_fee_rate: 0.01,
            min_relay_fee_per_byte: 10,
            dynamic_fee_base_per_byte: 20,
            fee_congestion_target_txs: 5_000,
            fee_max_multiplier: 8,
            min_absolute_fee: 10_000,
            tx_size_input_overhead: 100,
            max_txs_per_block: 500,
            treasury_address: "treasury".to_string(),
            initial_supply: 0,
            genesis_message: "network-genesis".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SupplyModel {
    Halving,
    Fixed,
    Inflationary,
}

impl std::fmt::Display for SupplyModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SupplyModel::Halving => "halving",
            SupplyModel::Fixed => "fixed",
            SupplyModel::Inflationary => "inflationary",
        };
        write!(f, "{}", s)
    }
}

/// Per-process knobs that do not affect consensus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub api_port: u16,
    pub p2p_host: String,
    pub p2p_port: u16,
    pub p2p_seeds: Vec<String>,
    pub p2p_sync_interval_secs: u64,
    pub peer_mode: bool,
    pub auto_mine_enabled: bool,
    pub miner_address_override: Option<String>,
    pub miner_name: String,
    pub auto_refresh_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_port: 5000,
            p2p_host: "0.0.0.0".to_string(),
            p2p_port: 6000,
            p2p_seeds: Vec::new(),
            p2p_sync_interval_secs: 10,
            peer_mode: false,
            auto_mine_enabled: true,
            miner_address_override: None,
            miner_name: "Miner".to_string(),
            auto_refresh_secs: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub consensus: ConsensusConfig,
    pub runtime: RuntimeConfig,
}

impl Config {
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_file(&self, path: &PathBuf) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// `$XDG_DATA_HOME/pyth-node/config.toml` (or platform equivalent).
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("./data"))
            .join("pyth-node")
            .join("config.toml")
    }

    /// Read `P2P_SEEDS`, `P2P_HOST`, `P2P_PORT`, `API_PORT`, `PEER` and friends
    /// from the environment, overlaying them on top of the given defaults.
    pub fn from_env(mut self) -> Self {
        use std::env;

        if let Ok(v) = env::var("API_PORT") {
            if let Ok(n) = v.parse() {
                self.runtime.api_port = n;
            }
        }
        if let Ok(v) = env::var("P2P_HOST") {
            self.runtime.p2p_host = v;
        }
        if let Ok(v) = env::var("P2P_PORT") {
            if let Ok(n) = v.parse() {
                self.runtime.p2p_port = n;
            }
        }
        if let Ok(v) = env::var("P2P_SEEDS") {
            self.runtime.p2p_seeds = v.split(',').filter(|s| !s.is_empty()).map(String::from).collect();
        }
        if let Ok(v) = env::var("PEER") {
            self.runtime.peer_mode = v == "True" || v == "true";
        }
        if let Ok(v) = env::var("AUTO_MINE_ENABLED") {
            self.runtime.auto_mine_enabled = v == "True" || v == "true" || v == "1";
        }
        if let Ok(v) = env::var("MINER_ADDRESS_OVERRIDE") {
            if !v.is_empty() {
                self.runtime.miner_address_override = Some(v);
            }
        }
        if let Ok(v) = env::var("MINER_NAME") {
            self.runtime.miner_name = v;
        }
        if let Ok(v) = env::var("AUTO_REFRESH_SECONDS") {
            if let Ok(n) = v.parse() {
                self.runtime.auto_refresh_secs = n;
            }
        }
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("serialize error: {0}")]
    Serialize(String),
}
