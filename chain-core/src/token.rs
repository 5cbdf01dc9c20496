//! Colored-coin (token) accounting. A transaction either mints a brand new
//! `TokenID` or moves existing token supply between outputs; both rules are
//! checked together because a transaction that tries to do both to the same
//! `TokenID` is always invalid, regardless of whether the amounts happen to
//! balance.

use std::collections::{HashMap, HashSet};

use shared::{Error, Result, ScriptType, Transaction, TokenId};

use crate::params::ProtocolParams;
use crate::utxo::UtxoSet;

/// Checks every `TokenID` touched by `tx`: a mint must use the TokenID
/// derived from the transaction's first input and must not also appear as
/// a transfer in the same transaction; anything else must conserve input
/// and output token amounts exactly. Every Mint/Burn output amount is
/// bounded by `params.max_token_amount`.
pub fn validate_token_rules(tx: &Transaction, utxos: &UtxoSet, params: &ProtocolParams) -> Result<()> {
    for output in &tx.outputs {
        let is_mint_or_burn = matches!(output.script.script_type, ScriptType::Mint | ScriptType::Burn);
        if !is_mint_or_burn {
            continue;
        }
        let Some(token) = output.token else {
            if output.script.script_type == ScriptType::Burn {
                return Err(Error::InvalidStructure(
                    "burn output must carry a token amount".to_string(),
                ));
            }
            continue;
        };
        if token.amount == 0 || token.amount > params.max_token_amount {
            return Err(Error::InvalidStructure(format!(
                "token amount {} is outside the allowed range (1..={})",
                token.amount, params.max_token_amount
            )));
        }
    }

    let mut input_totals: HashMap<TokenId, u64> = HashMap::new();
    for input in &tx.inputs {
        if input.previous_output.is_coinbase_marker() {
            continue;
        }
        let Some(utxo) = utxos.get(&input.previous_output) else {
            continue;
        };
        if let Some(token) = utxo.token {
            let entry = input_totals.entry(token.id).or_insert(0);
            *entry = entry
                .checked_add(token.amount)
                .ok_or_else(|| Error::Overflow("token input sum overflowed".to_string()))?;
        }
    }

    let mut output_totals: HashMap<TokenId, u64> = HashMap::new();
    let mut mint_totals: HashMap<TokenId, u64> = HashMap::new();
    for output in &tx.outputs {
        let Some(token) = output.token else {
            continue;
        };
        let bucket = if output.script.script_type == ScriptType::Mint {
            &mut mint_totals
        } else {
            &mut output_totals
        };
        let entry = bucket.entry(token.id).or_insert(0);
        *entry = entry
            .checked_add(token.amount)
            .ok_or_else(|| Error::Overflow("token output sum overflowed".to_string()))?;
    }

    if !mint_totals.is_empty() {
        let expected_id = tx.mint_token_id().ok_or_else(|| {
            Error::InvalidStructure("cannot mint without a first input to derive a TokenID from".to_string())
        })?;
        for tid in mint_totals.keys() {
            if *tid != expected_id {
                return Err(Error::InvalidAgainstState(
                    "minted TokenID does not match the one derived from this transaction's first input"
                        .to_string(),
                ));
            }
            if input_totals.contains_key(tid) || output_totals.contains_key(tid) {
                return Err(Error::InvalidAgainstState(
                    "transaction both mints and transfers the same TokenID".to_string(),
                ));
            }
        }
    }

    let touched: HashSet<TokenId> = input_totals
        .keys()
        .chain(output_totals.keys())
        .copied()
        .collect();
    for tid in touched {
        let in_amount = input_totals.get(&tid).copied().unwrap_or(0);
        let out_amount = output_totals.get(&tid).copied().unwrap_or(0);
        if in_amount != out_amount {
            return Err(Error::InvalidAgainstState(format!(
                "token {tid} conservation violated: {in_amount} in, {out_amount} out"
            )));
        }
    }

    Ok(())
}
