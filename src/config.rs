//! Configuration management for ConsentChain

use crate::blockchain::{DEFAULT_MINING_REWARD, SEAL_DIFFICULTY};
use crate::error::{ConsentError, Result};
use crate::miner::MAX_DIFFICULTY;
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "consentchain.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub contract: ContractConfig,
    #[serde(default)]
    pub view: ViewConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
    #[serde(default = "default_reward_address")]
    pub reward_address: String,
    #[serde(default = "default_mining_reward")]
    pub mining_reward: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            reward_address: default_reward_address(),
            mining_reward: default_mining_reward(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
    /// Mints per auto-sealed block during a bulk load.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_patient_csv")]
    pub patient_csv: String,
    #[serde(default = "default_consent_csv")]
    pub consent_csv: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            patient_csv: default_patient_csv(),
            consent_csv: default_consent_csv(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractConfig {
    /// Hashed to derive the contract address.
    #[serde(default = "default_contract_label")]
    pub label: String,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            label: default_contract_label(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewConfig {
    /// Number of most recent blocks returned when no limit is given.
    #[serde(default = "default_chain_limit")]
    pub chain_limit: usize,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            chain_limit: default_chain_limit(),
        }
    }
}

fn default_difficulty() -> u32 {
    SEAL_DIFFICULTY
}

fn default_reward_address() -> String {
    "system".to_string()
}

fn default_mining_reward() -> u64 {
    DEFAULT_MINING_REWARD
}

fn default_batch_size() -> usize {
    10
}

fn default_patient_csv() -> String {
    "patient_dataset.csv".to_string()
}

fn default_consent_csv() -> String {
    "nft_metadata.csv".to_string()
}

fn default_contract_label() -> String {
    "PatientConsentContract".to_string()
}

fn default_chain_limit() -> usize {
    50
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ledger.difficulty > MAX_DIFFICULTY {
            return Err(ConsentError::Config(format!(
                "ledger.difficulty must be at most {} (got {})",
                MAX_DIFFICULTY, self.ledger.difficulty
            )));
        }
        if self.ledger.reward_address.trim().is_empty() {
            return Err(ConsentError::Config(
                "ledger.reward_address must not be empty".to_string(),
            ));
        }
        if self.import.batch_size == 0 {
            return Err(ConsentError::Config(
                "import.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.contract.label.is_empty() {
            return Err(ConsentError::Config(
                "contract.label must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load `consentchain.toml` from the working directory, falling back to defaults.
pub fn load_config() -> Result<Config> {
    load_config_from(Path::new(DEFAULT_CONFIG_PATH))
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = fs::read_to_string(path)?;
    Config::from_toml(&text)
}
