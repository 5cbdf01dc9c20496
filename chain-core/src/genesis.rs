//! Builds block zero from a chain's configured allocation list. Genesis is
//! exempt from the usual consensus check (there is no previous validator
//! rotation or prior difficulty to check it against); the chain processor
//! special-cases height zero for exactly this reason.

use std::sync::atomic::AtomicBool;

use shared::{Block, BlockHeader, Error, Hash, Result, Script, Transaction, TxInput, TxOutput};

use crate::consensus::ConsensusEngine;
use crate::params::{ConsensusParams, ProtocolParams};

pub fn build_genesis_block(params: &ProtocolParams) -> Result<Block> {
    if params.genesis_allocations.is_empty() {
        return Err(Error::ConfigurationError(
            "genesis configuration has no allocations".to_string(),
        ));
    }

    let outputs: Vec<TxOutput> = params
        .genesis_allocations
        .iter()
        .map(|alloc| TxOutput::new(alloc.amount, Script::p2pkh(&alloc.address), None))
        .collect();
    let coinbase = Transaction::new(vec![TxInput::coinbase(0)], outputs, 0);
    let merkle_root = shared::block::merkle_root(&[coinbase.hash()]);

    let difficulty = match params.consensus {
        ConsensusParams::ProofOfWork {
            initial_difficulty, ..
        } => initial_difficulty,
        ConsensusParams::ProofOfAuthority { .. } => 0,
    };

    let mut header = BlockHeader {
        version: 1,
        previous_hash: Hash::zero(),
        merkle_root,
        timestamp: params.genesis_timestamp,
        height: 0,
        difficulty,
        nonce: 0,
        consensus_data: Vec::new(),
    };

    if let ConsensusEngine::Pow(engine) = ConsensusEngine::from_params(&params.consensus) {
        let cancel = AtomicBool::new(false);
        engine.seal(&mut header, &cancel)?;
    }

    Ok(Block::new(header, vec![coinbase]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::GenesisAllocation;
    use shared::Address;

    fn params_with_allocation() -> ProtocolParams {
        let mut params = ProtocolParams::default();
        params.genesis_allocations = vec![GenesisAllocation {
            address: Address::from_bytes([3; 20]),
            amount: 100_000,
        }];
        params
    }

    #[test]
    fn genesis_block_has_a_single_coinbase_at_height_zero() {
        let block = build_genesis_block(&params_with_allocation()).unwrap();
        assert_eq!(block.header.height, 0);
        assert_eq!(block.transactions.len(), 1);
        assert!(block.transactions[0].is_coinbase());
        assert_eq!(block.transactions[0].total_output_value().unwrap(), 100_000);
    }

    #[test]
    fn genesis_without_allocations_is_rejected() {
        let params = ProtocolParams::default();
        assert!(build_genesis_block(&params).is_err());
    }

    #[test]
    fn genesis_satisfies_its_own_pow_target() {
        let block = build_genesis_block(&params_with_allocation()).unwrap();
        let consensus = ConsensusEngine::from_params(&params_with_allocation().consensus);
        if let ConsensusEngine::Pow(engine) = consensus {
            assert!(engine.validate_header(&block.header).is_ok());
        }
    }
}
