//! Node configuration: a human-editable TOML file that resolves into the
//! `chain-core` types a root chain instance is built from (`ProtocolParams`,
//! `SubchainPolicy`, `SyncFilter`). Sub-chains never read this file directly
//! — they derive their own parameters from their Register transaction's
//! `RegistrationData` (see `chain_core::subchain`).

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chain_core::{ConsensusParams, GenesisAllocation, ProtocolParams, SubchainPolicy, SyncFilter};
use serde::{Deserialize, Serialize};
use shared::{Address, Error, Network, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsensusConfig {
    Poa {
        slot_duration: u64,
        min_validator_stake: u64,
        /// Hex-encoded 33-byte compressed pubkeys.
        genesis_validators: Vec<String>,
    },
    Pow {
        initial_difficulty: u64,
        target_block_time: u64,
        adjustment_window: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisAllocationConfig {
    /// Bech32, `<hrp>:<hex>`, or bare 40-hex address form.
    pub address: String,
    pub amount: u64,
}

/// How this node decides which sub-chains to sync. Mirrors
/// `chain_core::subchain::SyncFilter` but in a config-friendly shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SyncFilterConfig {
    All,
    None,
    List { chain_ids: Vec<String> },
}

impl Default for SyncFilterConfig {
    fn default() -> Self {
        SyncFilterConfig::All
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubchainPolicyConfig {
    pub min_deposit: u64,
    pub max_per_parent: usize,
    pub allow_pow: bool,
}

impl Default for SubchainPolicyConfig {
    fn default() -> Self {
        Self {
            min_deposit: chain_core::params::DEFAULT_MIN_DEPOSIT,
            max_per_parent: chain_core::params::DEFAULT_MAX_PER_PARENT,
            allow_pow: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// "mainnet" or "testnet".
    #[serde(default = "default_network")]
    pub network: String,
    /// Where `SledStore` persists state. Omit to run in-memory only.
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub consensus: Option<ConsensusConfig>,
    #[serde(default = "default_block_reward")]
    pub block_reward: u64,
    #[serde(default)]
    pub max_supply: u64,
    #[serde(default = "default_coinbase_maturity")]
    pub coinbase_maturity: u64,
    #[serde(default = "default_min_fee_rate")]
    pub min_fee_rate: u64,
    #[serde(default = "default_mempool_capacity")]
    pub mempool_capacity: usize,
    #[serde(default = "default_max_block_transactions")]
    pub max_block_transactions: usize,
    #[serde(default = "default_max_token_amount")]
    pub max_token_amount: u64,
    #[serde(default = "default_token_creation_fee")]
    pub token_creation_fee: u64,
    #[serde(default = "default_max_timestamp_skew")]
    pub max_timestamp_skew: u64,
    #[serde(default = "default_genesis_timestamp")]
    pub genesis_timestamp: u64,
    #[serde(default)]
    pub genesis_allocations: Vec<GenesisAllocationConfig>,
    #[serde(default)]
    pub subchain_policy: SubchainPolicyConfig,
    #[serde(default)]
    pub sync_filter: SyncFilterConfig,
}

fn default_network() -> String {
    "testnet".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_block_reward() -> u64 {
    50 * chain_core::params::COIN / 100
}
fn default_coinbase_maturity() -> u64 {
    chain_core::params::DEFAULT_COINBASE_MATURITY
}
fn default_min_fee_rate() -> u64 {
    1
}
fn default_mempool_capacity() -> usize {
    10_000
}
fn default_max_block_transactions() -> usize {
    chain_core::params::DEFAULT_MAX_BLOCK_TXS
}
fn default_max_token_amount() -> u64 {
    chain_core::params::DEFAULT_MAX_TOKEN_AMOUNT
}
fn default_token_creation_fee() -> u64 {
    chain_core::params::DEFAULT_TOKEN_CREATION_FEE
}
fn default_max_timestamp_skew() -> u64 {
    chain_core::params::DEFAULT_MAX_TIMESTAMP_SKEW
}
fn default_genesis_timestamp() -> u64 {
    1_700_000_000
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            data_dir: None,
            log_level: default_log_level(),
            consensus: None,
            block_reward: default_block_reward(),
            max_supply: 0,
            coinbase_maturity: default_coinbase_maturity(),
            min_fee_rate: default_min_fee_rate(),
            mempool_capacity: default_mempool_capacity(),
            max_block_transactions: default_max_block_transactions(),
            max_token_amount: default_max_token_amount(),
            token_creation_fee: default_token_creation_fee(),
            max_timestamp_skew: default_max_timestamp_skew(),
            genesis_timestamp: default_genesis_timestamp(),
            genesis_allocations: Vec::new(),
            subchain_policy: SubchainPolicyConfig::default(),
            sync_filter: SyncFilterConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::ConfigurationError(format!("reading {}: {e}", path.as_ref().display()))
        })?;
        toml::from_str(&text)
            .map_err(|e| Error::ConfigurationError(format!("parsing node config: {e}")))
    }

    pub fn network(&self) -> Result<Network> {
        match self.network.as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(Error::ConfigurationError(format!(
                "unknown network '{other}', expected 'mainnet' or 'testnet'"
            ))),
        }
    }

    fn consensus_params(&self) -> Result<ConsensusParams> {
        match &self.consensus {
            None => Ok(ConsensusParams::ProofOfWork {
                initial_difficulty: 1,
                target_block_time: 30,
                adjustment_window: 60,
            }),
            Some(ConsensusConfig::Pow {
                initial_difficulty,
                target_block_time,
                adjustment_window,
            }) => Ok(ConsensusParams::ProofOfWork {
                initial_difficulty: *initial_difficulty,
                target_block_time: *target_block_time,
                adjustment_window: *adjustment_window,
            }),
            Some(ConsensusConfig::Poa {
                slot_duration,
                min_validator_stake,
                genesis_validators,
            }) => {
                let mut validators = Vec::with_capacity(genesis_validators.len());
                for hex_key in genesis_validators {
                    let bytes = hex::decode(hex_key).map_err(|e| {
                        Error::ConfigurationError(format!("invalid genesis validator hex: {e}"))
                    })?;
                    let arr: [u8; 33] = bytes.try_into().map_err(|_| {
                        Error::ConfigurationError(
                            "genesis validator pubkey must be 33 bytes".to_string(),
                        )
                    })?;
                    validators.push(arr);
                }
                Ok(ConsensusParams::ProofOfAuthority {
                    slot_duration: *slot_duration,
                    min_validator_stake: *min_validator_stake,
                    genesis_validators: validators,
                })
            }
        }
    }

    pub fn protocol_params(&self) -> Result<ProtocolParams> {
        let mut genesis_allocations = Vec::with_capacity(self.genesis_allocations.len());
        for alloc in &self.genesis_allocations {
            genesis_allocations.push(GenesisAllocation {
                address: Address::parse(&alloc.address)?,
                amount: alloc.amount,
            });
        }
        Ok(ProtocolParams {
            network: self.network()?,
            consensus: self.consensus_params()?,
            block_reward: self.block_reward,
            max_supply: self.max_supply,
            coinbase_maturity: self.coinbase_maturity,
            min_fee_rate: self.min_fee_rate,
            mempool_capacity: self.mempool_capacity,
            max_block_transactions: self.max_block_transactions,
            max_token_amount: self.max_token_amount,
            token_creation_fee: self.token_creation_fee,
            max_timestamp_skew: self.max_timestamp_skew,
            genesis_timestamp: self.genesis_timestamp,
            genesis_allocations,
        })
    }

    pub fn subchain_policy(&self) -> SubchainPolicy {
        SubchainPolicy {
            min_deposit: self.subchain_policy.min_deposit,
            max_per_parent: self.subchain_policy.max_per_parent,
            allow_pow: self.subchain_policy.allow_pow,
            network: self.network().unwrap_or(Network::Testnet),
        }
    }

    pub fn sync_filter(&self) -> Result<SyncFilter> {
        match &self.sync_filter {
            SyncFilterConfig::All => Ok(SyncFilter::All),
            SyncFilterConfig::None => Ok(SyncFilter::None),
            SyncFilterConfig::List { chain_ids } => {
                let mut set = HashSet::with_capacity(chain_ids.len());
                for hex_id in chain_ids {
                    let bytes = hex::decode(hex_id).map_err(|e| {
                        Error::ConfigurationError(format!("invalid chain id hex: {e}"))
                    })?;
                    set.insert(shared::ChainId::from_bytes(
                        bytes.try_into().map_err(|_| {
                            Error::ConfigurationError("chain id must be 32 bytes".to_string())
                        })?,
                    ));
                }
                Ok(SyncFilter::List(set))
            }
        }
    }
}
