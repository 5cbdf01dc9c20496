//! The UTXO set: every currently-spendable output, plus the secondary
//! indexes the wallet/RPC surface and the stake-weighted validator set
//! need to avoid a full scan.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use shared::{Address, Hash, Outpoint, PublicKey, Script, ScriptType, TokenData};

/// A single unspent output plus the bookkeeping needed to judge maturity
/// and to reconstruct the spending-path (address/stake) indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub outpoint: Outpoint,
    pub value: u64,
    pub script: Script,
    pub token: Option<TokenData>,
    /// Height of the block that created this output.
    pub height: u64,
    pub is_coinbase: bool,
    /// Height below which this output cannot be spent, 0 meaning unlocked.
    pub locked_until: u64,
}

impl Utxo {
    #[must_use]
    pub fn is_mature(&self, current_height: u64, coinbase_maturity: u64) -> bool {
        if self.is_coinbase {
            current_height >= self.height + coinbase_maturity
        } else {
            true
        }
    }

    #[must_use]
    pub fn is_locked(&self, current_height: u64) -> bool {
        self.locked_until > current_height
    }
}

/// Canonical per-UTXO digest: `BLAKE3(Outpoint‖Value‖Script.Type‖Script.Data‖Token?‖Height‖Coinbase‖LockedUntil)`.
/// Used by [`UtxoSet::commitment`] to fold the whole set into one order-independent hash.
#[must_use]
pub fn hash_utxo(utxo: &Utxo) -> Hash {
    let mut writer = shared::encoding::Writer::new();
    writer.raw(utxo.outpoint.txid.as_bytes());
    writer.u32(utxo.outpoint.index);
    writer.u64(utxo.value);
    writer.u8(utxo.script.script_type.as_u8());
    writer.bytes(&utxo.script.data);
    match utxo.token {
        Some(token) => {
            writer.bool(true);
            writer.raw(token.id.as_bytes());
            writer.u64(token.amount);
        }
        None => {
            writer.bool(false);
        }
    }
    writer.u64(utxo.height);
    writer.bool(utxo.is_coinbase);
    writer.u64(utxo.locked_until);
    Hash::blake3(&writer.finish())
}

/// The full UTXO set with address and stake-pubkey secondary indexes.
///
/// This in-memory representation mirrors what the chain processor persists
/// to the `u/` keyspace; it is rebuilt from the store on startup and used
/// directly by validation, the mempool and the block producer so they don't
/// round-trip through the store for every lookup.
#[derive(Debug, Clone, Default)]
pub struct UtxoSet {
    by_outpoint: HashMap<Outpoint, Utxo>,
    by_address: HashMap<Address, HashSet<Outpoint>>,
    by_stake_pubkey: HashMap<PublicKey, HashSet<Outpoint>>,
}

impl UtxoSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, utxo: Utxo) {
        if let Some(address) = utxo.script.recipient_address() {
            self.by_address
                .entry(address)
                .or_default()
                .insert(utxo.outpoint);
        }
        if utxo.script.script_type == ScriptType::Stake {
            if let Ok(pubkey) = utxo.script.stake_pubkey() {
                self.by_stake_pubkey
                    .entry(pubkey)
                    .or_default()
                    .insert(utxo.outpoint);
            }
        }
        self.by_outpoint.insert(utxo.outpoint, utxo);
    }

    pub fn remove(&mut self, outpoint: &Outpoint) -> Option<Utxo> {
        let utxo = self.by_outpoint.remove(outpoint)?;
        if let Some(address) = utxo.script.recipient_address() {
            if let Some(set) = self.by_address.get_mut(&address) {
                set.remove(outpoint);
                if set.is_empty() {
                    self.by_address.remove(&address);
                }
            }
        }
        if utxo.script.script_type == ScriptType::Stake {
            if let Ok(pubkey) = utxo.script.stake_pubkey() {
                if let Some(set) = self.by_stake_pubkey.get_mut(&pubkey) {
                    set.remove(outpoint);
                    if set.is_empty() {
                        self.by_stake_pubkey.remove(&pubkey);
                    }
                }
            }
        }
        Some(utxo)
    }

    #[must_use]
    pub fn get(&self, outpoint: &Outpoint) -> Option<&Utxo> {
        self.by_outpoint.get(outpoint)
    }

    #[must_use]
    pub fn contains(&self, outpoint: &Outpoint) -> bool {
        self.by_outpoint.contains_key(outpoint)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_outpoint.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_outpoint.is_empty()
    }

    #[must_use]
    pub fn for_address(&self, address: &Address) -> Vec<&Utxo> {
        self.by_address
            .get(address)
            .into_iter()
            .flatten()
            .filter_map(|op| self.by_outpoint.get(op))
            .collect()
    }

    #[must_use]
    pub fn balance_of(&self, address: &Address) -> u64 {
        self.for_address(address).iter().map(|u| u.value).sum()
    }

    /// All stake outputs currently bonded under `pubkey`. A validator's
    /// total stake is the sum of these; losing all of them drops the
    /// validator from the active set.
    #[must_use]
    pub fn stake_of(&self, pubkey: &PublicKey) -> Vec<&Utxo> {
        self.by_stake_pubkey
            .get(pubkey)
            .into_iter()
            .flatten()
            .filter_map(|op| self.by_outpoint.get(op))
            .collect()
    }

    #[must_use]
    pub fn total_stake(&self, pubkey: &PublicKey) -> u64 {
        self.stake_of(pubkey).iter().map(|u| u.value).sum()
    }

    /// Every distinct stake pubkey with at least one bonded output.
    #[must_use]
    pub fn stake_pubkeys(&self) -> Vec<PublicKey> {
        self.by_stake_pubkey.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utxo> {
        self.by_outpoint.values()
    }

    /// Order-independent commitment over the whole set: hash each entry
    /// with [`hash_utxo`], sort the digests, fold with BLAKE3. The empty
    /// set commits to the zero hash. Two UTXO sets with the same members
    /// always produce the same commitment regardless of insertion order,
    /// which is what lets a sub-chain's anchor output usefully summarize
    /// its state root.
    #[must_use]
    pub fn commitment(&self) -> Hash {
        if self.by_outpoint.is_empty() {
            return Hash::zero();
        }
        let mut digests: Vec<Hash> = self.by_outpoint.values().map(hash_utxo).collect();
        digests.sort();
        let mut writer = shared::encoding::Writer::new();
        for digest in &digests {
            writer.raw(digest.as_bytes());
        }
        Hash::blake3(&writer.finish())
    }
}
