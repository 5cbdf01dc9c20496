//! Block header and body.
//!
//! The header separates what a validator/miner commits to sealing
//! (`signing_bytes`) from the two fields attached after the fact: `nonce`
//! (PoW search variable) and `consensus_data` (a PoA validator's Schnorr
//! signature, or empty under PoW). The block hash folds in the nonce so a
//! PoW search can iterate it without re-deriving anything else; it never
//! folds in `consensus_data`, so a PoA validator's signature can itself
//! commit to the block hash.

use serde::{Deserialize, Serialize};

use crate::encoding::Writer;
use crate::hash::Hash;
use crate::tx::Transaction;
use crate::types::{BlockHeight, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub previous_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: Timestamp,
    pub height: BlockHeight,
    /// PoW target difficulty; ignored (left at 0) under PoA.
    pub difficulty: u64,
    /// PoW search variable; ignored (left at 0) under PoA.
    pub nonce: u64,
    /// PoA: the 64-byte Schnorr signature of the slot validator over this
    /// header's hash. PoW: empty.
    pub consensus_data: Vec<u8>,
}

impl BlockHeader {
    /// Bytes a validator seals or a miner searches over: everything except
    /// the nonce and the consensus signature.
    #[must_use]
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u32(self.version);
        w.raw(self.previous_hash.as_bytes());
        w.raw(self.merkle_root.as_bytes());
        w.u64(self.timestamp);
        w.u64(self.height);
        w.u64(self.difficulty);
        w.finish()
    }

    /// `BLAKE3(signing_bytes ‖ nonce_le)`. Independent of `consensus_data`,
    /// so a PoA signature can be computed over this hash and attached after.
    #[must_use]
    pub fn hash(&self) -> Hash {
        let mut bytes = self.signing_bytes();
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        Hash::blake3(&bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    #[must_use]
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    #[must_use]
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    #[must_use]
    pub fn compute_merkle_root(&self) -> Hash {
        let tx_hashes: Vec<Hash> = self.transactions.iter().map(Transaction::hash).collect();
        merkle_root(&tx_hashes)
    }
}

/// Binary merkle root over `leaves`. An odd level duplicates its last node,
/// matching the convention used throughout the UTXO-chain family this
/// layout descends from. Returns the zero hash for an empty leaf set.
#[must_use]
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::zero();
    }
    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().unwrap());
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut w = Writer::new();
                w.raw(pair[0].as_bytes());
                w.raw(pair[1].as_bytes());
                Hash::blake3(&w.finish())
            })
            .collect();
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::script::Script;
    use crate::tx::{TxInput, TxOutput};
    use crate::types::Outpoint;

    fn sample_tx(marker: u8) -> Transaction {
        Transaction::new(
            vec![TxInput::new(
                Outpoint::new(Hash::blake3(&[marker]), 0),
                vec![],
                vec![],
            )],
            vec![TxOutput::new(
                1,
                Script::p2pkh(&Address::from_bytes([marker; 20])),
                None,
            )],
            0,
        )
    }

    fn sample_header(nonce: u64) -> BlockHeader {
        BlockHeader {
            version: 1,
            previous_hash: Hash::zero(),
            merkle_root: Hash::zero(),
            timestamp: 1_700_000_000,
            height: 1,
            difficulty: 1,
            nonce,
            consensus_data: Vec::new(),
        }
    }

    #[test]
    fn merkle_root_of_single_leaf_is_itself() {
        let tx = sample_tx(1);
        let root = merkle_root(&[tx.hash()]);
        assert_eq!(root, tx.hash());
    }

    #[test]
    fn merkle_root_changes_with_transaction_order() {
        let a = sample_tx(1).hash();
        let b = sample_tx(2).hash();
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }

    #[test]
    fn merkle_root_handles_odd_leaf_count_by_duplication() {
        let hashes: Vec<Hash> = (1u8..=3).map(|m| sample_tx(m).hash()).collect();
        let root = merkle_root(&hashes);
        let mut padded = hashes.clone();
        padded.push(hashes[2]);
        assert_eq!(root, merkle_root(&padded[..4.min(padded.len())]));
    }

    #[test]
    fn block_hash_changes_with_nonce() {
        let header_a = sample_header(0);
        let header_b = sample_header(1);
        assert_ne!(header_a.hash(), header_b.hash());
    }

    #[test]
    fn block_hash_is_independent_of_consensus_data() {
        let mut header = sample_header(5);
        let hash_before = header.hash();
        header.consensus_data = vec![1, 2, 3, 4];
        assert_eq!(header.hash(), hash_before);
    }

    #[test]
    fn compute_merkle_root_matches_transaction_hashes() {
        let block = Block::new(sample_header(0), vec![sample_tx(1), sample_tx(2)]);
        let expected = merkle_root(&[block.transactions[0].hash(), block.transactions[1].hash()]);
        assert_eq!(block.compute_merkle_root(), expected);
    }
}
