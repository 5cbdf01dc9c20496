//! Protocol constants and genesis configuration. Every chain instance
//! (root or sub-chain) carries one of these; sub-chains derive theirs from
//! the root's defaults overridden by their Register transaction's
//! `RegistrationData` (see `subchain`).

use serde::{Deserialize, Serialize};
use shared::{Address, Network};

/// One "coin" in base units: 12 decimal places, matching spec.md §6.5.
pub const COIN: u64 = 1_000_000_000_000;

/// Default cap on transactions per block, coinbase included.
pub const DEFAULT_MAX_BLOCK_TXS: usize = 5_000;

/// Default number of confirmations before a coinbase output is spendable.
pub const DEFAULT_COINBASE_MATURITY: u64 = 100;

/// Per-output cap on a token amount (mint or burn).
pub const DEFAULT_MAX_TOKEN_AMOUNT: u64 = (1u64 << 63) - 1;

/// Native fee a transaction containing any Mint output must pay.
pub const DEFAULT_TOKEN_CREATION_FEE: u64 = 50 * COIN;

/// How far into the future a block's timestamp may sit ahead of local time.
pub const DEFAULT_MAX_TIMESTAMP_SKEW: u64 = 120;

/// Minimum value a Register output must burn to found a sub-chain.
pub const DEFAULT_MIN_DEPOSIT: u64 = COIN;

/// Maximum number of sub-chains a single parent will register.
pub const DEFAULT_MAX_PER_PARENT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusKind {
    ProofOfAuthority,
    ProofOfWork,
}

/// A single genesis allocation: an address and the coin amount it starts
/// with, encoded as one coinbase-style output in block zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisAllocation {
    pub address: Address,
    pub amount: u64,
}

/// Tunable network parameters, loaded from node configuration and carried
/// unchanged for the life of a chain instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolParams {
    pub network: Network,
    pub consensus: ConsensusParams,
    /// Coin-denominated reward paid to the coinbase each block, before fees.
    /// Zero once `max_supply` has been reached (see `capped_reward`).
    pub block_reward: u64,
    /// Total supply this chain will ever mint, not counting fees. Zero
    /// means uncapped.
    pub max_supply: u64,
    /// Blocks a coinbase output must wait before it is spendable.
    pub coinbase_maturity: u64,
    /// Minimum fee rate (base units per byte) the mempool will admit.
    pub min_fee_rate: u64,
    /// Maximum number of transactions the mempool holds before evicting
    /// the lowest fee-rate entries.
    pub mempool_capacity: usize,
    /// Maximum transactions per block the producer will select, coinbase
    /// included.
    pub max_block_transactions: usize,
    /// Per-output cap on a token amount (mint or burn).
    pub max_token_amount: u64,
    /// Native fee a transaction containing any Mint output must pay.
    pub token_creation_fee: u64,
    /// How far into the future a block's timestamp may sit ahead of local time.
    pub max_timestamp_skew: u64,
    pub genesis_timestamp: u64,
    pub genesis_allocations: Vec<GenesisAllocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConsensusParams {
    ProofOfAuthority {
        /// Seconds allotted to each validator's slot.
        slot_duration: u64,
        /// Minimum stake an address must bond to join the validator set.
        min_validator_stake: u64,
        /// Compressed pubkeys (33 bytes each) present at genesis; never
        /// removed from the validator set regardless of stake.
        genesis_validators: Vec<[u8; 33]>,
    },
    ProofOfWork {
        initial_difficulty: u64,
        target_block_time: u64,
        /// Blocks between difficulty recalculation; 0 pins the difficulty
        /// at `initial_difficulty` forever.
        adjustment_window: u64,
    },
}

impl ConsensusParams {
    #[must_use]
    pub const fn kind(&self) -> ConsensusKind {
        match self {
            ConsensusParams::ProofOfAuthority { .. } => ConsensusKind::ProofOfAuthority,
            ConsensusParams::ProofOfWork { .. } => ConsensusKind::ProofOfWork,
        }
    }
}

impl ProtocolParams {
    /// The reward a new block at `current_supply` should carry: the full
    /// `block_reward`, clamped down to whatever headroom remains under
    /// `max_supply`, or zero once the cap is reached. Uncapped (`max_supply
    /// == 0`) chains always pay the full reward.
    #[must_use]
    pub fn capped_reward(&self, current_supply: u64) -> u64 {
        if self.max_supply == 0 {
            return self.block_reward;
        }
        if current_supply >= self.max_supply {
            return 0;
        }
        self.block_reward.min(self.max_supply - current_supply)
    }
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            network: Network::Testnet,
            consensus: ConsensusParams::ProofOfWork {
                initial_difficulty: 1,
                target_block_time: 30,
                adjustment_window: 60,
            },
            block_reward: 50 * COIN / 100,
            max_supply: 0,
            coinbase_maturity: DEFAULT_COINBASE_MATURITY,
            min_fee_rate: 1,
            mempool_capacity: 10_000,
            max_block_transactions: DEFAULT_MAX_BLOCK_TXS,
            max_token_amount: DEFAULT_MAX_TOKEN_AMOUNT,
            token_creation_fee: DEFAULT_TOKEN_CREATION_FEE,
            max_timestamp_skew: DEFAULT_MAX_TIMESTAMP_SKEW,
            genesis_timestamp: 1_700_000_000,
            genesis_allocations: Vec::new(),
        }
    }
}
