//! Transaction model: inputs, outputs, and the canonical hash two independent
//! validators must agree on without exchanging signatures first.

use serde::{Deserialize, Serialize};

use crate::encoding::Writer;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::script::Script;
use crate::types::{Outpoint, TokenData, TxId};

/// A transaction input. `signature`/`pubkey` are empty for coinbase inputs;
/// for everything else `signature` is a 64-byte Schnorr signature and
/// `pubkey` a 33-byte compressed secp256k1 point whose `BLAKE3(..)[:20]`
/// must equal the spent output's recipient address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub previous_output: Outpoint,
    pub signature: Vec<u8>,
    pub pubkey: Vec<u8>,
}

impl TxInput {
    #[must_use]
    pub fn new(previous_output: Outpoint, signature: Vec<u8>, pubkey: Vec<u8>) -> Self {
        Self {
            previous_output,
            signature,
            pubkey,
        }
    }

    /// A coinbase input: the zero outpoint, with the block height little-endian
    /// encoded into the signature slot so every coinbase transaction is unique.
    #[must_use]
    pub fn coinbase(height: u64) -> Self {
        Self {
            previous_output: Outpoint::coinbase_marker(),
            signature: height.to_le_bytes().to_vec(),
            pubkey: Vec::new(),
        }
    }

    /// Recovers the embedded height from a coinbase input's signature slot.
    pub fn coinbase_height(&self) -> Result<u64> {
        let bytes: [u8; 8] = self
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidStructure("coinbase height must be 8 bytes".to_string()))?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn write_signing_bytes(&self, w: &mut Writer) {
        w.raw(self.previous_output.txid.as_bytes());
        w.u32(self.previous_output.index);
        w.bytes(&self.pubkey);
    }
}

/// A transaction output: a value, a script describing who/what can spend it,
/// and an optional colored-coin payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub script: Script,
    pub token: Option<TokenData>,
    /// Height below which the UTXO this output creates cannot be spent.
    /// Zero (the default via [`TxOutput::new`]) means unlocked.
    pub lock_until: u64,
}

impl TxOutput {
    #[must_use]
    pub fn new(value: u64, script: Script, token: Option<TokenData>) -> Self {
        Self {
            value,
            script,
            token,
            lock_until: 0,
        }
    }

    #[must_use]
    pub fn with_lock_until(mut self, lock_until: u64) -> Self {
        self.lock_until = lock_until;
        self
    }

    fn write_signing_bytes(&self, w: &mut Writer) {
        w.u64(self.value);
        w.u8(self.script.script_type.as_u8());
        w.bytes(&self.script.data);
        match self.token {
            Some(token) => {
                w.bool(true);
                w.raw(token.id.as_bytes());
                w.u64(token.amount);
            }
            None => {
                w.bool(false);
            }
        }
        w.u64(self.lock_until);
    }
}

/// The maximum representable output value; values above this overflow a
/// signed 64-bit accounting ledger and are rejected at structural validation.
pub const MAX_AMOUNT: u64 = i64::MAX as u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u64,
}

impl Transaction {
    #[must_use]
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>, lock_time: u64) -> Self {
        Self {
            version: 1,
            inputs,
            outputs,
            lock_time,
        }
    }

    /// Canonical byte layout this transaction's hash is taken over. Signatures
    /// are excluded so a signature can commit to the hash it appears in.
    #[must_use]
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u32(self.version);
        w.u32(self.inputs.len() as u32);
        for input in &self.inputs {
            input.write_signing_bytes(&mut w);
        }
        w.u32(self.outputs.len() as u32);
        for output in &self.outputs {
            output.write_signing_bytes(&mut w);
        }
        w.u64(self.lock_time);
        w.finish()
    }

    #[must_use]
    pub fn hash(&self) -> TxId {
        Hash::blake3(&self.signing_bytes())
    }

    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_coinbase_marker()
    }

    pub fn total_output_value(&self) -> Result<u64> {
        self.outputs.iter().try_fold(0u64, |acc, out| {
            acc.checked_add(out.value)
                .ok_or_else(|| Error::Overflow("transaction output sum overflowed".to_string()))
        })
    }

    /// Stateless checks: well-formedness that doesn't require UTXO lookups.
    pub fn validate_structure(&self) -> Result<()> {
        if self.version != 1 {
            return Err(Error::InvalidStructure(format!(
                "unsupported transaction version: {}",
                self.version
            )));
        }
        if self.inputs.is_empty() {
            return Err(Error::InvalidStructure(
                "transaction has no inputs".to_string(),
            ));
        }
        if self.outputs.is_empty() {
            return Err(Error::InvalidStructure(
                "transaction has no outputs".to_string(),
            ));
        }

        if self.is_coinbase() {
            if self.inputs.len() != 1 {
                return Err(Error::InvalidStructure(
                    "coinbase transaction must have exactly one input".to_string(),
                ));
            }
            self.inputs[0].coinbase_height()?;
        } else {
            for input in &self.inputs {
                if input.previous_output.is_coinbase_marker() {
                    return Err(Error::InvalidStructure(
                        "non-coinbase transaction references the coinbase marker".to_string(),
                    ));
                }
            }
        }

        let mut seen = std::collections::HashSet::with_capacity(self.inputs.len());
        for input in &self.inputs {
            if !seen.insert(input.previous_output) {
                return Err(Error::InvalidStructure(
                    "transaction spends the same outpoint twice".to_string(),
                ));
            }
        }

        for output in &self.outputs {
            if output.value > MAX_AMOUNT {
                return Err(Error::InvalidStructure(
                    "output value exceeds the maximum representable amount".to_string(),
                ));
            }
        }
        self.total_output_value()?;

        Ok(())
    }

    /// `BLAKE3(first_input.txid ‖ first_input.index)`: the identifier a Mint
    /// output's colored-coin TokenID must equal, binding each mint to the
    /// exact input set that produced it and making TokenIDs unforgeable
    /// without spending a specific, never-reused outpoint.
    #[must_use]
    pub fn mint_token_id(&self) -> Option<crate::hash::TokenId> {
        let first = self.inputs.first()?;
        let mut w = Writer::new();
        w.raw(first.previous_output.txid.as_bytes());
        w.u32(first.previous_output.index);
        Some(Hash::blake3(&w.finish()))
    }
}
