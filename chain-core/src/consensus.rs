//! Pluggable consensus: a chain instance runs either Proof-of-Authority or
//! Proof-of-Work, fixed at spawn time and never switched at runtime. The two
//! rule sets share almost nothing (signature-over-slot vs. nonce search), so
//! rather than force them through one trait they're modeled as a tagged
//! enum that the chain processor and block producer match on explicitly.

use std::sync::atomic::{AtomicBool, Ordering};

use shared::{verify, BlockHeader, Error, KeyPair, PublicKey, Result};

use crate::params::ConsensusParams;
use crate::utxo::UtxoSet;

#[derive(Debug, Clone)]
pub enum ConsensusEngine {
    Poa(PoaEngine),
    Pow(PowEngine),
}

impl ConsensusEngine {
    #[must_use]
    pub fn from_params(params: &ConsensusParams) -> Self {
        match params {
            ConsensusParams::ProofOfAuthority {
                slot_duration,
                min_validator_stake,
                genesis_validators,
            } => ConsensusEngine::Poa(PoaEngine {
                slot_duration: *slot_duration,
                min_validator_stake: *min_validator_stake,
                genesis_validators: genesis_validators
                    .iter()
                    .filter_map(|bytes| PublicKey::from_bytes(bytes).ok())
                    .collect(),
            }),
            ConsensusParams::ProofOfWork {
                target_block_time,
                adjustment_window,
                ..
            } => ConsensusEngine::Pow(PowEngine {
                target_block_time: *target_block_time,
                adjustment_window: *adjustment_window,
            }),
        }
    }

    /// Validates a sealed header's consensus fields (signature or PoW
    /// target) against the state needed to check it. Structural fields
    /// (merkle root, previous hash linkage) are checked by the chain
    /// processor before this is called.
    pub fn validate_header(&self, header: &BlockHeader, utxos: &UtxoSet) -> Result<()> {
        match self {
            ConsensusEngine::Poa(engine) => engine.validate_header(header, utxos),
            ConsensusEngine::Pow(engine) => engine.validate_header(header),
        }
    }
}

/// Round-robin Proof-of-Authority: the validator set is every address that
/// currently bonds at least `min_validator_stake` in a Stake output, sorted
/// by public key for a deterministic order every node agrees on. The slot
/// validator for a height is `validators[height % validators.len()]`, so
/// the set can grow or shrink (stake/unstake) without a configuration
/// change — an address leaving the set simply stops appearing in the
/// rotation at its next scheduled slot.
#[derive(Debug, Clone)]
pub struct PoaEngine {
    pub slot_duration: u64,
    pub min_validator_stake: u64,
    /// Validators present at genesis. These stay in the validator set even
    /// if they bond no stake at all; a chain with `min_validator_stake == 0`
    /// relies entirely on this fixed list (spec.md's "fixed set").
    pub genesis_validators: Vec<PublicKey>,
}

impl PoaEngine {
    /// Whether `pubkey` was present at genesis and therefore can never be
    /// dropped from the validator set by an unstake.
    #[must_use]
    pub fn is_genesis_validator(&self, pubkey: &PublicKey) -> bool {
        self.genesis_validators.contains(pubkey)
    }

    #[must_use]
    pub fn validator_set(&self, utxos: &UtxoSet) -> Vec<PublicKey> {
        let mut validators: Vec<PublicKey> = utxos
            .stake_pubkeys()
            .into_iter()
            .filter(|pk| utxos.total_stake(pk) >= self.min_validator_stake)
            .chain(self.genesis_validators.iter().copied())
            .collect();
        validators.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
        validators.dedup();
        validators
    }

    /// The validator whose slot `height` belongs to.
    pub fn expected_validator(&self, height: u64, utxos: &UtxoSet) -> Result<PublicKey> {
        let validators = self.validator_set(utxos);
        if validators.is_empty() {
            return Err(Error::InvalidConsensus(
                "no bonded validators to elect a slot from".to_string(),
            ));
        }
        let index = (height % validators.len() as u64) as usize;
        Ok(validators[index])
    }

    pub fn validate_header(&self, header: &BlockHeader, utxos: &UtxoSet) -> Result<()> {
        let expected = self.expected_validator(header.height, utxos)?;
        let signature = shared::Signature::from_bytes(&header.consensus_data)?;
        let ok = verify(&expected, &header.hash(), &signature)?;
        if !ok {
            return Err(Error::InvalidConsensus(
                "header signature does not match the elected slot validator".to_string(),
            ));
        }
        Ok(())
    }

    /// Signs `header` as the given validator, filling in `consensus_data`.
    pub fn seal(&self, header: &mut BlockHeader, keypair: &KeyPair) {
        header.consensus_data = keypair.sign(&header.hash()).as_bytes().to_vec();
    }
}

/// Proof-of-Work: a 256-bit target derived from an integer difficulty, and
/// a cancellable nonce search.
#[derive(Debug, Clone)]
pub struct PowEngine {
    pub target_block_time: u64,
    pub adjustment_window: u64,
}

/// The maximum PoW target (difficulty 1): all bits set.
const MAX_TARGET: [u8; 32] = [0xff; 32];

impl PowEngine {
    /// `MAX_TARGET / difficulty`, computed as 256-bit long division by a
    /// 64-bit divisor. Difficulty 0 is treated as 1 (every block must do
    /// at least this much work).
    #[must_use]
    pub fn target_for_difficulty(&self, difficulty: u64) -> shared::Hash {
        let divisor = u128::from(difficulty.max(1));
        let mut quotient = [0u8; 32];
        let mut remainder: u128 = 0;
        for (i, byte) in MAX_TARGET.iter().enumerate() {
            remainder = (remainder << 8) | u128::from(*byte);
            quotient[i] = (remainder / divisor) as u8;
            remainder %= divisor;
        }
        shared::Hash::from_bytes(quotient)
    }

    pub fn validate_header(&self, header: &BlockHeader) -> Result<()> {
        let target = self.target_for_difficulty(header.difficulty);
        if !header.hash().le_numeric(&target) {
            return Err(Error::InvalidConsensus(
                "block hash does not meet the required PoW target".to_string(),
            ));
        }
        Ok(())
    }

    /// Next difficulty from a window of ascending-height recent headers
    /// (oldest first, including the header the window starts at). Floor
    /// division, clamped to a quarter/quadruple of the current difficulty,
    /// never below 1. `height` is the height of the block being produced;
    /// the recalculation only fires every `adjustment_window` blocks, and
    /// never at all when `adjustment_window == 0` (difficulty pinned at
    /// whatever it was set to at genesis).
    #[must_use]
    pub fn next_difficulty(
        &self,
        height: u64,
        current_difficulty: u64,
        recent_headers: &[BlockHeader],
    ) -> u64 {
        if self.adjustment_window == 0 || height % self.adjustment_window != 0 {
            return current_difficulty.max(1);
        }
        if recent_headers.len() < 2 {
            return current_difficulty.max(1);
        }
        let first = recent_headers.first().expect("len checked above");
        let last = recent_headers.last().expect("len checked above");
        let actual_time = last.timestamp.saturating_sub(first.timestamp).max(1);
        let elapsed_blocks = (recent_headers.len() - 1) as u64;
        let expected_time = self.target_block_time * elapsed_blocks;

        let scaled = u128::from(current_difficulty) * u128::from(expected_time)
            / u128::from(actual_time.max(1));
        let new_difficulty = u64::try_from(scaled).unwrap_or(u64::MAX);

        let lower_bound = (current_difficulty / 4).max(1);
        let upper_bound = current_difficulty.saturating_mul(4);
        new_difficulty.clamp(lower_bound, upper_bound).max(1)
    }

    /// Searches nonces starting from `header.nonce` until the header meets
    /// its own difficulty's target or `cancel` is observed set.
    pub fn seal(&self, header: &mut BlockHeader, cancel: &AtomicBool) -> Result<()> {
        let target = self.target_for_difficulty(header.difficulty);
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            if header.hash().le_numeric(&target) {
                return Ok(());
            }
            header.nonce = header.nonce.wrapping_add(1);
        }
    }
}
