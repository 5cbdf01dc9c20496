//! Assembles a candidate block from the mempool and seals it under
//! whichever consensus engine the chain instance runs.

use std::sync::atomic::AtomicBool;
use std::time::{SystemTime, UNIX_EPOCH};

use shared::{Address, Block, BlockHeader, Error, KeyPair, Result, Script, Transaction, TxInput, TxOutput};

use crate::consensus::ConsensusEngine;
use crate::mempool::Mempool;
use crate::params::ProtocolParams;
use crate::utxo::UtxoSet;
use crate::validation::validate_with_utxos;

/// How to seal the sealed header once its body is assembled: a PoA
/// validator's keypair, or a cancellation flag for a PoW nonce search.
pub enum Sealing<'a> {
    Authority(&'a KeyPair),
    Work(&'a AtomicBool),
}

pub struct BlockProducer<'a> {
    pub params: &'a ProtocolParams,
    pub consensus: &'a ConsensusEngine,
}

impl<'a> BlockProducer<'a> {
    #[must_use]
    pub fn new(params: &'a ProtocolParams, consensus: &'a ConsensusEngine) -> Self {
        Self { params, consensus }
    }

    /// Builds, seals and returns a new block on top of `prev_header`.
    /// `recent_headers` (ascending by height, ending at `prev_header`) is
    /// used only by the Proof-of-Work path to recompute difficulty.
    pub fn produce_block(
        &self,
        prev_header: &BlockHeader,
        recent_headers: &[BlockHeader],
        utxos: &UtxoSet,
        mempool: &Mempool,
        current_supply: u64,
        reward_address: &Address,
        sealing: Sealing<'_>,
    ) -> Result<Block> {
        let height = prev_header.height + 1;
        let candidate_budget = self.params.max_block_transactions.saturating_sub(1);
        let mut selected = mempool.select_for_block(candidate_budget);
        // Fee-rate order decides *which* transactions make the cut; canonical
        // block order is always ascending by hash so two nodes selecting the
        // same set always build byte-identical blocks.
        selected.sort_by_key(Transaction::hash);

        let mut total_fees = 0u64;
        for tx in &selected {
            total_fees = total_fees
                .checked_add(validate_with_utxos(tx, utxos, height, self.params)?)
                .ok_or_else(|| Error::Overflow("candidate block fee sum overflowed".to_string()))?;
        }

        let block_reward = self.params.capped_reward(current_supply);
        let coinbase_value = block_reward
            .checked_add(total_fees)
            .ok_or_else(|| Error::Overflow("coinbase value overflowed".to_string()))?;

        let coinbase = Transaction::new(
            vec![TxInput::coinbase(height)],
            vec![TxOutput::new(coinbase_value, Script::p2pkh(reward_address), None)],
            0,
        );

        let mut transactions = Vec::with_capacity(selected.len() + 1);
        transactions.push(coinbase);
        transactions.extend(selected);

        let difficulty = match self.consensus {
            ConsensusEngine::Pow(engine) => {
                engine.next_difficulty(height, prev_header.difficulty, recent_headers)
            }
            ConsensusEngine::Poa(_) => 0,
        };

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(prev_header.timestamp + 1);

        let mut header = BlockHeader {
            version: 1,
            previous_hash: prev_header.hash(),
            merkle_root: shared::block::merkle_root(
                &transactions.iter().map(Transaction::hash).collect::<Vec<_>>(),
            ),
            timestamp: timestamp.max(prev_header.timestamp + 1),
            height,
            difficulty,
            nonce: 0,
            consensus_data: Vec::new(),
        };

        match (self.consensus, sealing) {
            (ConsensusEngine::Poa(engine), Sealing::Authority(keypair)) => {
                engine.seal(&mut header, keypair);
            }
            (ConsensusEngine::Pow(engine), Sealing::Work(cancel)) => {
                engine.seal(&mut header, cancel)?;
            }
            _ => {
                return Err(Error::ConfigurationError(
                    "sealing method does not match this chain's consensus engine".to_string(),
                ))
            }
        }

        Ok(Block::new(header, transactions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Hash;
    use std::sync::atomic::AtomicBool;

    fn genesis_header() -> BlockHeader {
        BlockHeader {
            version: 1,
            previous_hash: Hash::zero(),
            merkle_root: Hash::zero(),
            timestamp: 1_700_000_000,
            height: 0,
            difficulty: 1,
            nonce: 0,
            consensus_data: Vec::new(),
        }
    }

    #[test]
    fn produces_a_valid_pow_block_with_only_a_coinbase() {
        let params = ProtocolParams::default();
        let consensus = ConsensusEngine::from_params(&params.consensus);
        let producer = BlockProducer::new(&params, &consensus);
        let utxos = UtxoSet::new();
        let mempool = Mempool::new();
        let cancel = AtomicBool::new(false);
        let reward_address = Address::from_bytes([1; 20]);

        let block = producer
            .produce_block(
                &genesis_header(),
                &[],
                &utxos,
                &mempool,
                0,
                &reward_address,
                Sealing::Work(&cancel),
            )
            .unwrap();

        assert_eq!(block.transactions.len(), 1);
        assert!(block.transactions[0].is_coinbase());
        assert_eq!(block.header.height, 1);
        assert!(consensus.validate_header(&block.header, &utxos).is_ok());
    }

    #[test]
    fn poa_sealing_against_a_pow_chain_is_rejected() {
        let params = ProtocolParams::default();
        let consensus = ConsensusEngine::from_params(&params.consensus);
        let producer = BlockProducer::new(&params, &consensus);
        let utxos = UtxoSet::new();
        let mempool = Mempool::new();
        let keypair = KeyPair::generate();
        let reward_address = Address::from_bytes([1; 20]);

        let result = producer.produce_block(
            &genesis_header(),
            &[],
            &utxos,
            &mempool,
            0,
            &reward_address,
            Sealing::Authority(&keypair),
        );
        assert!(result.is_err());
    }

    #[test]
    fn reward_is_capped_then_zeroed_once_supply_is_reached() {
        let mut params = ProtocolParams::default();
        params.block_reward = 50;
        params.max_supply = 100;
        let consensus = ConsensusEngine::from_params(&params.consensus);
        let producer = BlockProducer::new(&params, &consensus);
        let utxos = UtxoSet::new();
        let mempool = Mempool::new();
        let cancel = AtomicBool::new(false);
        let reward_address = Address::from_bytes([1; 20]);

        let block = producer
            .produce_block(
                &genesis_header(),
                &[],
                &utxos,
                &mempool,
                80,
                &reward_address,
                Sealing::Work(&cancel),
            )
            .unwrap();
        assert_eq!(block.transactions[0].outputs[0].value, 20);

        let block = producer
            .produce_block(
                &genesis_header(),
                &[],
                &utxos,
                &mempool,
                100,
                &reward_address,
                Sealing::Work(&cancel),
            )
            .unwrap();
        assert_eq!(block.transactions[0].outputs[0].value, 0);
    }
}
