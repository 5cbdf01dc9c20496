//! Stateful transaction validation: everything `Transaction::validate_structure`
//! can't check because it needs the UTXO set — input existence, maturity,
//! signatures, value balance and token conservation.

use shared::{verify, Error, Hash, PublicKey, Result, Signature, Transaction};

use crate::params::ProtocolParams;
use crate::token::validate_token_rules;
use crate::utxo::UtxoSet;

/// Sum of input values, verified signatures, and maturity — everything a
/// transaction needs to be accepted into the mempool or a block, given the
/// `UtxoSet` it would be applied against.
pub fn validate_with_utxos(
    tx: &Transaction,
    utxos: &UtxoSet,
    current_height: u64,
    params: &ProtocolParams,
) -> Result<u64> {
    tx.validate_structure()?;

    if tx.is_coinbase() {
        return Ok(0);
    }

    let tx_hash = tx.hash();
    let mut input_total: u64 = 0;

    for input in &tx.inputs {
        let utxo = utxos.get(&input.previous_output).ok_or_else(|| {
            Error::NotFound(format!(
                "input {:?} does not reference a spendable output",
                input.previous_output
            ))
        })?;

        if !utxo.is_mature(current_height, params.coinbase_maturity) {
            return Err(Error::InvalidAgainstState(
                "input spends an immature coinbase output".to_string(),
            ));
        }
        if utxo.is_locked(current_height) {
            return Err(Error::InvalidAgainstState(
                "input spends a still-locked output".to_string(),
            ));
        }

        if utxo.script.is_unspendable() {
            return Err(Error::InvalidAgainstState(
                "spent output's script is unspendable".to_string(),
            ));
        }

        let pubkey = PublicKey::from_bytes(&input.pubkey)?;
        match utxo.script.script_type {
            shared::ScriptType::Stake => {
                // The bonded pubkey itself is the spending key, not its
                // derived address — an unstake proves ownership of the
                // exact key that was bonded.
                let bonded = utxo.script.stake_pubkey()?;
                if pubkey != bonded {
                    return Err(Error::InvalidAgainstState(
                        "input public key does not match the bonded stake pubkey".to_string(),
                    ));
                }
            }
            _ => {
                let expected_address = shared::Address::from_compressed_pubkey(pubkey.as_bytes());
                let owning_address = utxo.script.recipient_address().ok_or_else(|| {
                    Error::InvalidAgainstState(
                        "spent output has no recipient address to check against".to_string(),
                    )
                })?;
                if expected_address != owning_address {
                    return Err(Error::InvalidAgainstState(
                        "input public key does not match the spent output's address".to_string(),
                    ));
                }
            }
        }

        let signature = Signature::from_bytes(&input.signature)?;
        if !verify(&pubkey, &tx_hash, &signature)? {
            return Err(Error::InvalidAgainstState(
                "input signature does not verify against the transaction hash".to_string(),
            ));
        }

        input_total = input_total
            .checked_add(utxo.value)
            .ok_or_else(|| Error::Overflow("input value sum overflowed".to_string()))?;
    }

    let output_total = tx.total_output_value()?;
    if input_total < output_total {
        return Err(Error::InvalidAgainstState(
            "transaction spends more than its inputs provide".to_string(),
        ));
    }

    validate_token_rules(tx, utxos, params)?;

    let fee = input_total - output_total;
    let has_mint_output = tx
        .outputs
        .iter()
        .any(|output| output.script.script_type == shared::ScriptType::Mint);
    if has_mint_output && fee < params.token_creation_fee {
        return Err(Error::PolicyRejection(format!(
            "transaction mints a token but pays fee {fee}, below the required {} token creation fee",
            params.token_creation_fee
        )));
    }

    Ok(fee)
}

/// The per-byte fee rate a transaction pays, given its absolute fee.
#[must_use]
pub fn fee_rate(fee: u64, size_bytes: usize) -> u64 {
    if size_bytes == 0 {
        return 0;
    }
    fee / size_bytes as u64
}

/// `BLAKE3(first_input.txid ‖ first_input.index)` — re-exposed here for
/// callers that only have a hash and an index, not a whole transaction.
#[must_use]
pub fn mint_token_id_of(txid: Hash, index: u32) -> Hash {
    let mut w = shared::encoding::Writer::new();
    w.raw(txid.as_bytes());
    w.u32(index);
    Hash::blake3(&w.finish())
}
