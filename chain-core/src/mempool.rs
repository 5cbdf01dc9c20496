//! The candidate-transaction pool: admission policy, fee-rate floor,
//! capacity eviction, fee-descending selection for block assembly, and
//! invalidation once a block confirms (or conflicts with) a held entry.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use shared::{Error, Outpoint, Result, Transaction, TxId};

use crate::params::ProtocolParams;
use crate::utxo::UtxoSet;
use crate::validation::{fee_rate, validate_with_utxos};

#[derive(Debug, Clone)]
struct MempoolEntry {
    tx: Transaction,
    fee: u64,
    fee_rate: u64,
    size: usize,
}

/// Ordering key for the fee-rate index: highest fee-rate first, ties broken
/// by txid ascending. `Reverse(fee_rate)` makes the set's natural ascending
/// iteration order walk highest-fee-rate-first, and a plain `TxId` tiebreaker
/// then sorts ascending within a fee-rate group, matching block-selection
/// order exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct RankKey {
    fee_rate: Reverse<u64>,
    txid: TxId,
}

#[derive(Debug, Default)]
pub struct Mempool {
    entries: HashMap<TxId, MempoolEntry>,
    by_rank: BTreeSet<RankKey>,
    spends: HashMap<Outpoint, TxId>,
}

impl Mempool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, txid: &TxId) -> bool {
        self.entries.contains_key(txid)
    }

    /// Validates `tx` against `utxos`, checks the fee-rate floor, rejects
    /// conflicts with whatever this pool already holds, and evicts the
    /// lowest fee-rate entry if the pool is full and `tx` outranks it.
    pub fn admit(
        &mut self,
        tx: Transaction,
        utxos: &UtxoSet,
        current_height: u64,
        params: &ProtocolParams,
    ) -> Result<()> {
        let txid = tx.hash();
        if self.entries.contains_key(&txid) {
            return Ok(());
        }

        for input in &tx.inputs {
            if let Some(conflicting) = self.spends.get(&input.previous_output) {
                return Err(Error::Conflict(format!(
                    "outpoint already spent in mempool by transaction {conflicting}"
                )));
            }
        }

        let fee = validate_with_utxos(&tx, utxos, current_height, params)?;
        let size = tx.signing_bytes().len();
        let rate = fee_rate(fee, size);
        if rate < params.min_fee_rate {
            return Err(Error::PolicyRejection(format!(
                "fee rate {rate} is below the minimum {}",
                params.min_fee_rate
            )));
        }

        if self.entries.len() >= params.mempool_capacity {
            let worst = self.by_rank.iter().next_back().copied();
            match worst {
                Some(worst) if worst.fee_rate.0 < rate => {
                    self.remove(&worst.txid);
                }
                _ => {
                    return Err(Error::PolicyRejection(
                        "mempool is full and this transaction does not outrank the lowest entry"
                            .to_string(),
                    ));
                }
            }
        }

        for input in &tx.inputs {
            self.spends.insert(input.previous_output, txid);
        }
        self.by_rank.insert(RankKey {
            fee_rate: Reverse(rate),
            txid,
        });
        self.entries.insert(
            txid,
            MempoolEntry {
                tx,
                fee,
                fee_rate: rate,
                size,
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, txid: &TxId) -> Option<Transaction> {
        let entry = self.entries.remove(txid)?;
        self.by_rank.remove(&RankKey {
            fee_rate: Reverse(entry.fee_rate),
            txid: *txid,
        });
        for input in &entry.tx.inputs {
            self.spends.remove(&input.previous_output);
        }
        Some(entry.tx)
    }

    /// Drops every mempool entry confirmed in `confirmed_txids`, plus any
    /// entry left behind that now conflicts with a spend the block made
    /// (a double-spend the chain just resolved).
    pub fn invalidate_confirmed(&mut self, confirmed: &[Transaction]) {
        for tx in confirmed {
            self.remove(&tx.hash());
        }
        for tx in confirmed {
            for input in &tx.inputs {
                if let Some(conflicting) = self.spends.get(&input.previous_output).copied() {
                    self.remove(&conflicting);
                }
            }
        }
    }

    /// Highest fee-rate entries first, ties broken by txid ascending,
    /// capped at `limit`, skipping any transaction whose input still
    /// depends on another transaction that is itself in the mempool
    /// (unconfirmed parent) to avoid building a block with an unresolvable
    /// ordering.
    #[must_use]
    pub fn select_for_block(&self, limit: usize) -> Vec<Transaction> {
        let mut selected = Vec::new();
        for rank in self.by_rank.iter() {
            if selected.len() >= limit {
                break;
            }
            let entry = &self.entries[&rank.txid];
            let depends_on_mempool_parent = entry
                .tx
                .inputs
                .iter()
                .any(|input| self.entries.contains_key(&input.previous_output.txid));
            if depends_on_mempool_parent {
                continue;
            }
            selected.push(entry.tx.clone());
        }
        selected
    }
}
