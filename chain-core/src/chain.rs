//! The chain processor: validates and applies blocks, persists the result,
//! and can walk a reorg back to a common ancestor and replay the winning
//! branch. This is the only component that mutates the UTXO set; the
//! mempool and block producer only ever read it.

use std::sync::Arc;

use kvstore::{KvStore, WriteBatch};
use serde::{Deserialize, Serialize};
use shared::{
    Address, Block, BlockHeader, BlockHeight, ChainId, Error, Hash, Outpoint, Result, Script,
    ScriptType, TokenId, Transaction,
};
use tracing::{info, instrument, warn};

use crate::consensus::ConsensusEngine;
use crate::genesis::build_genesis_block;
use crate::params::ProtocolParams;
use crate::utxo::{Utxo, UtxoSet};

const KEY_TIP: &[u8] = b"tip";
const KEY_SUPPLY: &[u8] = b"supply";
const KEY_TX_COUNT: &[u8] = b"txcount";
const PREFIX_BLOCK: &[u8] = b"b/";
const PREFIX_HEIGHT: &[u8] = b"h/";
const PREFIX_UTXO: &[u8] = b"u/";
const PREFIX_TX_INDEX: &[u8] = b"i/";
const PREFIX_UNDO: &[u8] = b"undo/";
const PREFIX_ANCHOR: &[u8] = b"an/";
const PREFIX_TOKEN_META: &[u8] = b"t/";

fn height_key(height: u64) -> Vec<u8> {
    let mut key = PREFIX_HEIGHT.to_vec();
    key.extend_from_slice(&height.to_be_bytes());
    key
}

fn block_key(hash: &Hash) -> Vec<u8> {
    let mut key = PREFIX_BLOCK.to_vec();
    key.extend_from_slice(hash.as_bytes());
    key
}

fn utxo_key(outpoint: &Outpoint) -> Vec<u8> {
    let mut key = PREFIX_UTXO.to_vec();
    key.extend_from_slice(outpoint.txid.as_bytes());
    key.extend_from_slice(&outpoint.index.to_be_bytes());
    key
}

fn tx_index_key(txid: &Hash) -> Vec<u8> {
    let mut key = PREFIX_TX_INDEX.to_vec();
    key.extend_from_slice(txid.as_bytes());
    key
}

/// `block_hash(32) ‖ tx_index(4 BE)`, the value stored at a transaction's
/// `i/` key so `get_transaction` can locate it inside its block without a
/// linear scan.
fn tx_index_value(block_hash: &Hash, tx_index: u32) -> Vec<u8> {
    let mut value = block_hash.as_bytes().to_vec();
    value.extend_from_slice(&tx_index.to_be_bytes());
    value
}

fn decode_tx_index_value(bytes: &[u8]) -> Result<(Hash, u32)> {
    if bytes.len() != 36 {
        return Err(Error::BackendFailure(
            "corrupt transaction index entry".to_string(),
        ));
    }
    let block_hash = Hash::from_bytes(bytes[..32].try_into().unwrap());
    let tx_index = u32::from_be_bytes(bytes[32..36].try_into().unwrap());
    Ok((block_hash, tx_index))
}

fn undo_key(height: u64) -> Vec<u8> {
    let mut key = PREFIX_UNDO.to_vec();
    key.extend_from_slice(&height.to_be_bytes());
    key
}

fn anchor_key(chain_id: &ChainId, height: u64) -> Vec<u8> {
    let mut key = PREFIX_ANCHOR.to_vec();
    key.extend_from_slice(chain_id.as_bytes());
    key.extend_from_slice(&height.to_be_bytes());
    key
}

fn token_meta_key(token_id: &TokenId) -> Vec<u8> {
    let mut key = PREFIX_TOKEN_META.to_vec();
    key.extend_from_slice(token_id.as_bytes());
    key
}

/// Everything a block's application changed, kept so a reorg can walk the
/// tip backwards without re-deriving it from genesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UndoRecord {
    removed: Vec<Utxo>,
    created: Vec<Outpoint>,
    /// Total supply immediately before this block was applied, so a revert
    /// can restore it exactly rather than re-derive it.
    supply_before: u64,
}

/// A read-only snapshot of chain state: height, tip hash, outstanding
/// transaction and UTXO counts, and the current PoW target difficulty
/// (zero under Proof-of-Authority).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStats {
    pub height: BlockHeight,
    pub tip_hash: Hash,
    pub transaction_count: u64,
    pub utxo_count: usize,
    pub difficulty: u64,
    pub supply: u64,
}

/// Callbacks the sub-chain manager registers so the chain processor can
/// notify it of Register/Anchor outputs without chain-core depending on it.
/// None of these may fail: a sink that rejects a registration only logs and
/// leaves the root chain's UTXO set untouched, it never unwinds the block
/// that is already being applied.
pub trait ChainEventSink {
    fn on_register(
        &mut self,
        height: BlockHeight,
        txid: Hash,
        output_index: u32,
        value: u64,
        payload: &[u8],
    );
    fn on_anchor(&mut self, chain_id: ChainId, state_root: Hash, height: u64);

    /// Fired when a reorg reverts a block that had created a Register output,
    /// i.e. the registration itself is being undone. Default no-op.
    fn on_deregister(&mut self, _txid: Hash, _output_index: u32) {}
}

/// A sink that does nothing; the default for chain instances that don't
/// need to react to Register/Anchor outputs (sub-chains themselves, which
/// don't spawn further sub-chains).
#[derive(Default)]
pub struct NullEventSink;

impl ChainEventSink for NullEventSink {
    fn on_register(
        &mut self,
        _height: BlockHeight,
        _txid: Hash,
        _output_index: u32,
        _value: u64,
        _payload: &[u8],
    ) {
    }
    fn on_anchor(&mut self, _chain_id: ChainId, _state_root: Hash, _height: u64) {}
}

pub struct ChainProcessor<S: ChainEventSink = NullEventSink> {
    store: Arc<dyn KvStore>,
    params: ProtocolParams,
    consensus: ConsensusEngine,
    utxos: UtxoSet,
    headers: Vec<BlockHeader>,
    sink: S,
    /// Running total of coins minted through block rewards so far (fees are
    /// not new supply — they move existing coins). Drives `capped_reward`.
    supply: u64,
    /// Running total of transactions applied across every block, coinbases
    /// included.
    tx_count: u64,
}

impl<S: ChainEventSink> ChainProcessor<S> {
    /// Opens an existing chain from `store`, or bootstraps genesis if the
    /// store has no tip pointer yet.
    pub fn open(store: Arc<dyn KvStore>, params: ProtocolParams, sink: S) -> Result<Self> {
        let consensus = ConsensusEngine::from_params(&params.consensus);
        let mut processor = Self {
            store,
            params,
            consensus,
            utxos: UtxoSet::new(),
            headers: Vec::new(),
            sink,
            supply: 0,
            tx_count: 0,
        };

        if processor.store.get(KEY_TIP).map_err(store_err)?.is_some() {
            processor.restore_from_store()?;
        } else {
            let genesis = build_genesis_block(&processor.params)?;
            processor.apply_block(genesis)?;
        }
        Ok(processor)
    }

    fn restore_from_store(&mut self) -> Result<()> {
        let tip_hash = self.read_tip_hash()?;
        let mut hash = tip_hash;
        let mut chain = Vec::new();
        loop {
            let block = self.read_block(&hash)?;
            let prev = block.header.previous_hash;
            chain.push(block);
            if prev.is_zero() {
                break;
            }
            hash = prev;
        }
        chain.reverse();
        self.headers = chain.iter().map(|b| b.header.clone()).collect();
        self.tx_count = chain.iter().map(|b| b.transactions.len() as u64).sum();

        for (_, value) in self.store.scan_prefix(PREFIX_UTXO).map_err(store_err)? {
            let utxo: Utxo = serde_json::from_slice(&value)
                .map_err(|e| Error::BackendFailure(format!("corrupt utxo record: {e}")))?;
            self.utxos.insert(utxo);
        }

        self.supply = match self.store.get(KEY_SUPPLY).map_err(store_err)? {
            Some(bytes) => u64::from_be_bytes(
                bytes
                    .try_into()
                    .map_err(|_| Error::BackendFailure("supply counter is not 8 bytes".to_string()))?,
            ),
            None => 0,
        };
        Ok(())
    }

    fn read_tip_hash(&self) -> Result<Hash> {
        let bytes = self
            .store
            .get(KEY_TIP)
            .map_err(store_err)?
            .ok_or_else(|| Error::NotFound("no chain tip recorded".to_string()))?;
        Hash::from_bytes(bytes.try_into().map_err(|_| {
            Error::BackendFailure("tip pointer is not a 32-byte hash".to_string())
        })?)
        .pipe(Ok)
    }

    fn read_block(&self, hash: &Hash) -> Result<Block> {
        let bytes = self
            .store
            .get(&block_key(hash))
            .map_err(store_err)?
            .ok_or_else(|| Error::NotFound(format!("no block with hash {hash}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::BackendFailure(format!("corrupt block record: {e}")))
    }

    #[must_use]
    pub fn tip(&self) -> &BlockHeader {
        self.headers.last().expect("genesis is always present")
    }

    #[must_use]
    pub fn height(&self) -> u64 {
        self.tip().height
    }

    #[must_use]
    pub fn utxos(&self) -> &UtxoSet {
        &self.utxos
    }

    #[must_use]
    pub fn consensus(&self) -> &ConsensusEngine {
        &self.consensus
    }

    #[must_use]
    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Mutable access to the event sink, for callers that drive it directly
    /// (e.g. the sub-chain manager's `restore_chains` on startup).
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Headers in ascending height order, most recent `count` of them —
    /// the window the Proof-of-Work producer needs for difficulty
    /// recalculation.
    #[must_use]
    pub fn recent_headers(&self, count: usize) -> &[BlockHeader] {
        let start = self.headers.len().saturating_sub(count);
        &self.headers[start..]
    }

    pub fn get_anchors(&self, chain_id: ChainId) -> Result<Vec<(u64, Hash)>> {
        let mut prefix = PREFIX_ANCHOR.to_vec();
        prefix.extend_from_slice(chain_id.as_bytes());
        let mut out = Vec::new();
        for (key, value) in self.store.scan_prefix(&prefix).map_err(store_err)? {
            let height_bytes: [u8; 8] = key[key.len() - 8..]
                .try_into()
                .map_err(|_| Error::BackendFailure("malformed anchor key".to_string()))?;
            let height = u64::from_be_bytes(height_bytes);
            let root: [u8; 32] = value
                .try_into()
                .map_err(|_| Error::BackendFailure("malformed anchor value".to_string()))?;
            out.push((height, Hash::from_bytes(root)));
        }
        out.sort_by_key(|(h, _)| *h);
        Ok(out)
    }

    pub fn latest_anchor(&self, chain_id: ChainId) -> Result<Option<(u64, Hash)>> {
        Ok(self.get_anchors(chain_id)?.pop())
    }

    /// The tip block's hash.
    #[must_use]
    pub fn tip_hash(&self) -> Hash {
        self.tip().hash()
    }

    /// The tip block's timestamp.
    #[must_use]
    pub fn tip_timestamp(&self) -> u64 {
        self.tip().timestamp
    }

    /// Looks up a block by its hash.
    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Block> {
        self.read_block(hash)
    }

    /// Looks up a block by height, via its recorded height-to-hash pointer.
    pub fn get_block_by_height(&self, height: u64) -> Result<Block> {
        let bytes = self
            .store
            .get(&height_key(height))
            .map_err(store_err)?
            .ok_or_else(|| Error::NotFound(format!("no block at height {height}")))?;
        let hash = Hash::from_bytes(
            bytes
                .try_into()
                .map_err(|_| Error::BackendFailure("height pointer is not a 32-byte hash".to_string()))?,
        );
        self.read_block(&hash)
    }

    /// Looks up a confirmed transaction by hash, returning it alongside the
    /// block that contains it and its index within that block.
    pub fn get_transaction(&self, txid: &Hash) -> Result<(Transaction, Hash, u32)> {
        let bytes = self
            .store
            .get(&tx_index_key(txid))
            .map_err(store_err)?
            .ok_or_else(|| Error::NotFound(format!("no confirmed transaction {txid}")))?;
        let (block_hash, tx_index) = decode_tx_index_value(&bytes)?;
        let block = self.read_block(&block_hash)?;
        let tx = block
            .transactions
            .get(tx_index as usize)
            .cloned()
            .ok_or_else(|| Error::BackendFailure("tx index points past its block's transactions".to_string()))?;
        Ok((tx, block_hash, tx_index))
    }

    /// Validates `block` against the current tip and applies it, persisting
    /// the new UTXO set, indexes and undo record in one batch.
    #[instrument(skip(self, block), fields(height = block.header.height))]
    pub fn apply_block(&mut self, block: Block) -> Result<()> {
        let _total_fees = self.validate_block(&block)?;

        let block_hash = block.header.hash();
        let height = block.header.height;
        let supply_before = self.supply;
        let reward = if height == 0 {
            block.transactions[0].total_output_value()?
        } else {
            self.params.capped_reward(self.supply)
        };
        self.supply = supply_before
            .checked_add(reward)
            .ok_or_else(|| Error::Overflow("supply overflowed".to_string()))?;

        let mut batch = WriteBatch::new();
        let mut undo = UndoRecord {
            removed: Vec::new(),
            created: Vec::new(),
            supply_before,
        };

        for (tx_index, tx) in block.transactions.iter().enumerate() {
            let txid = tx.hash();
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let spent = self.utxos.remove(&input.previous_output).ok_or_else(|| {
                        Error::InvalidAgainstState("spent output vanished mid-application".to_string())
                    })?;
                    batch.delete(utxo_key(&input.previous_output));
                    undo.removed.push(spent);
                }
            }
            for (index, output) in tx.outputs.iter().enumerate() {
                let outpoint = Outpoint::new(txid, index as u32);
                let utxo = Utxo {
                    outpoint,
                    value: output.value,
                    script: output.script.clone(),
                    token: output.token,
                    height,
                    is_coinbase: tx.is_coinbase(),
                    locked_until: output.lock_until,
                };
                batch.put(
                    utxo_key(&outpoint),
                    serde_json::to_vec(&utxo).expect("utxo serializes"),
                );
                self.utxos.insert(utxo);
                undo.created.push(outpoint);

                self.handle_special_output(height, tx, index as u32, output.value, output.script.clone())?;
            }
            batch.put(tx_index_key(&txid), tx_index_value(&block_hash, tx_index as u32));
        }

        self.tx_count += block.transactions.len() as u64;

        batch.put(block_key(&block_hash), serde_json::to_vec(&block).expect("block serializes"));
        batch.put(height_key(height), block_hash.as_bytes().to_vec());
        batch.put(undo_key(height), serde_json::to_vec(&undo).expect("undo serializes"));
        batch.put(KEY_TIP, block_hash.as_bytes().to_vec());
        batch.put(KEY_SUPPLY, self.supply.to_be_bytes().to_vec());
        batch.put(KEY_TX_COUNT, self.tx_count.to_be_bytes().to_vec());
        self.store.apply_batch(&batch).map_err(store_err)?;

        self.headers.push(block.header);
        info!(height, %block_hash, "applied block");
        Ok(())
    }

    fn handle_special_output(
        &mut self,
        height: BlockHeight,
        tx: &Transaction,
        index: u32,
        value: u64,
        script: Script,
    ) -> Result<()> {
        let txid = tx.hash();
        match script.script_type {
            ScriptType::Register => {
                self.sink.on_register(height, txid, index, value, &script.data);
            }
            ScriptType::Anchor => {
                let (chain_id, state_root, anchor_height) = script.decode_anchor()?;
                self.sink.on_anchor(chain_id, state_root, anchor_height);
                self.store
                    .put(&anchor_key(&chain_id, anchor_height), state_root.as_bytes())
                    .map_err(store_err)?;
            }
            ScriptType::Mint => {
                if let Some(meta) = script.mint_metadata() {
                    if let Some(token_id) = tx.mint_token_id() {
                        self.record_token_metadata(token_id, &meta)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Checks `block` against the current tip and, if it passes, returns the
    /// total fees its non-coinbase transactions pay (used both to verify
    /// the coinbase value and to track supply in `apply_block`).
    fn validate_block(&self, block: &Block) -> Result<u64> {
        if block.transactions.is_empty() || !block.transactions[0].is_coinbase() {
            return Err(Error::InvalidStructure(
                "block's first transaction must be the coinbase".to_string(),
            ));
        }
        for tx in &block.transactions[1..] {
            if tx.is_coinbase() {
                return Err(Error::InvalidStructure(
                    "only the first transaction may be coinbase".to_string(),
                ));
            }
        }
        for tx in &block.transactions {
            tx.validate_structure()?;
        }
        if block.header.merkle_root != block.compute_merkle_root() {
            return Err(Error::InvalidStructure("merkle root mismatch".to_string()));
        }

        // Genesis has no tip to extend and no reward/fee relationship to
        // check; it is exempt from every rule below.
        if block.header.height == 0 {
            return Ok(0);
        }

        let tip = self.tip();
        if block.header.height != tip.height + 1 {
            return Err(Error::InvalidStructure(format!(
                "expected height {}, got {}",
                tip.height + 1,
                block.header.height
            )));
        }
        if block.header.previous_hash != tip.hash() {
            return Err(Error::InvalidStructure(
                "block does not extend the current tip".to_string(),
            ));
        }
        if block.header.timestamp <= tip.timestamp {
            return Err(Error::InvalidStructure(
                "block timestamp does not advance past its parent".to_string(),
            ));
        }
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(block.header.timestamp);
        if block.header.timestamp > now + self.params.max_timestamp_skew {
            return Err(Error::InvalidStructure(
                "block timestamp is too far ahead of local time".to_string(),
            ));
        }

        self.consensus.validate_header(&block.header, &self.utxos)?;

        let mut total_fees = 0u64;
        for tx in &block.transactions[1..] {
            let fee = crate::validation::validate_with_utxos(tx, &self.utxos, block.header.height, &self.params)?;
            total_fees = total_fees
                .checked_add(fee)
                .ok_or_else(|| Error::Overflow("block fee sum overflowed".to_string()))?;
        }

        let expected_reward = self.params.capped_reward(self.supply);
        let expected_coinbase_value = expected_reward
            .checked_add(total_fees)
            .ok_or_else(|| Error::Overflow("expected coinbase value overflowed".to_string()))?;
        let actual_coinbase_value = block.transactions[0].total_output_value()?;
        if actual_coinbase_value != expected_coinbase_value {
            return Err(Error::InvalidAgainstState(format!(
                "coinbase pays {actual_coinbase_value}, expected {expected_coinbase_value} ({expected_reward} reward + {total_fees} fees)"
            )));
        }

        Ok(total_fees)
    }

    /// Reverts the current tip, returning the block removed and its
    /// transactions (other than the coinbase) so the caller can re-admit
    /// them to the mempool.
    fn revert_tip(&mut self) -> Result<Block> {
        let tip_header = self.headers.pop().ok_or_else(|| {
            Error::InvalidAgainstState("cannot revert below genesis".to_string())
        })?;
        let tip_hash = tip_header.hash();
        let block = self.read_block(&tip_hash)?;

        let undo_bytes = self
            .store
            .get(&undo_key(tip_header.height))
            .map_err(store_err)?
            .ok_or_else(|| Error::BackendFailure("missing undo record".to_string()))?;
        let undo: UndoRecord = serde_json::from_slice(&undo_bytes)
            .map_err(|e| Error::BackendFailure(format!("corrupt undo record: {e}")))?;

        for tx in &block.transactions {
            let txid = tx.hash();
            for (index, output) in tx.outputs.iter().enumerate() {
                if output.script.script_type == ScriptType::Register {
                    self.sink.on_deregister(txid, index as u32);
                }
            }
        }

        let mut batch = WriteBatch::new();
        for outpoint in &undo.created {
            self.utxos.remove(outpoint);
            batch.delete(utxo_key(outpoint));
        }
        for utxo in undo.removed {
            batch.put(
                utxo_key(&utxo.outpoint),
                serde_json::to_vec(&utxo).expect("utxo serializes"),
            );
            self.utxos.insert(utxo);
        }
        for tx in &block.transactions {
            batch.delete(tx_index_key(&tx.hash()));
        }
        batch.delete(block_key(&tip_hash));
        batch.delete(height_key(tip_header.height));
        batch.delete(undo_key(tip_header.height));
        let new_tip = self.headers.last().expect("genesis remains").hash();
        batch.put(KEY_TIP, new_tip.as_bytes().to_vec());

        self.supply = undo.supply_before;
        self.tx_count -= block.transactions.len() as u64;
        batch.put(KEY_SUPPLY, self.supply.to_be_bytes().to_vec());
        batch.put(KEY_TX_COUNT, self.tx_count.to_be_bytes().to_vec());
        self.store.apply_batch(&batch).map_err(store_err)?;

        warn!(height = tip_header.height, "reverted block");
        Ok(block)
    }

    /// Walks back to the branch's ancestor height and replays `new_branch`
    /// on top. Returns the non-coinbase transactions from every reverted
    /// block, for the caller to re-admit to the mempool. If replay fails
    /// partway, the UTXO set is rebuilt from genesis rather than left in
    /// whatever partial state the failed revert/apply sequence produced.
    pub fn reorg_to(&mut self, new_branch: Vec<Block>) -> Result<Vec<Transaction>> {
        let Some(first) = new_branch.first() else {
            return Ok(Vec::new());
        };
        let ancestor_height = first.header.height.saturating_sub(1);

        let mut displaced = Vec::new();
        let revert_result = (|| -> Result<()> {
            while self.tip().height > ancestor_height {
                let block = self.revert_tip()?;
                displaced.extend(block.transactions.into_iter().filter(|t| !t.is_coinbase()));
            }
            Ok(())
        })();

        if let Err(e) = revert_result {
            self.rebuild_from_genesis()?;
            return Err(e);
        }

        for block in new_branch {
            if let Err(e) = self.apply_block(block) {
                self.rebuild_from_genesis()?;
                return Err(e);
            }
        }

        Ok(displaced)
    }

    /// Replays every block from height 0 against a fresh UTXO set. Used
    /// only when a reorg fails partway and the in-memory/undo-record state
    /// can no longer be trusted.
    fn rebuild_from_genesis(&mut self) -> Result<()> {
        warn!("rebuilding chain state from genesis after a failed reorg");
        let tip_hash = self.read_tip_hash()?;
        let mut hashes = vec![tip_hash];
        let mut cursor = tip_hash;
        loop {
            let block = self.read_block(&cursor)?;
            if block.header.previous_hash.is_zero() {
                break;
            }
            cursor = block.header.previous_hash;
            hashes.push(cursor);
        }
        hashes.reverse();

        self.utxos = UtxoSet::new();
        self.headers.clear();
        self.supply = 0;
        self.tx_count = 0;
        for hash in hashes {
            let block = self.read_block(&hash)?;
            for tx in &block.transactions {
                let txid = tx.hash();
                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        self.utxos.remove(&input.previous_output);
                    }
                }
                for (index, output) in tx.outputs.iter().enumerate() {
                    self.utxos.insert(Utxo {
                        outpoint: Outpoint::new(txid, index as u32),
                        value: output.value,
                        script: output.script.clone(),
                        token: output.token,
                        height: block.header.height,
                        is_coinbase: tx.is_coinbase(),
                        locked_until: output.lock_until,
                    });
                }
            }
            self.tx_count += block.transactions.len() as u64;
            self.supply += if block.header.height == 0 {
                block.transactions[0].total_output_value()?
            } else {
                self.params.capped_reward(self.supply)
            };
            self.headers.push(block.header);
        }

        let mut batch = WriteBatch::new();
        batch.put(KEY_SUPPLY, self.supply.to_be_bytes().to_vec());
        batch.put(KEY_TX_COUNT, self.tx_count.to_be_bytes().to_vec());
        self.store.apply_batch(&batch).map_err(store_err)?;
        Ok(())
    }

    pub fn token_metadata(&self, token_id: &TokenId) -> Result<Option<shared::MintMetadata>> {
        match self.store.get(&token_meta_key(token_id)).map_err(store_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
                Error::BackendFailure(format!("corrupt token metadata: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    pub fn record_token_metadata(&self, token_id: TokenId, meta: &shared::MintMetadata) -> Result<()> {
        if self.store.contains(&token_meta_key(&token_id)).map_err(store_err)? {
            return Ok(());
        }
        self.store
            .put(
                &token_meta_key(&token_id),
                &serde_json::to_vec(meta).expect("metadata serializes"),
            )
            .map_err(store_err)
    }

    #[must_use]
    pub fn balance_of(&self, address: &Address) -> u64 {
        self.utxos.balance_of(address)
    }

    #[must_use]
    pub fn current_supply(&self) -> u64 {
        self.supply
    }

    /// Alias for [`ChainProcessor::current_supply`].
    #[must_use]
    pub fn supply(&self) -> u64 {
        self.supply
    }

    #[must_use]
    pub fn stats(&self) -> ChainStats {
        let tip = self.tip();
        ChainStats {
            height: tip.height,
            tip_hash: tip.hash(),
            transaction_count: self.tx_count,
            utxo_count: self.utxos.len(),
            difficulty: tip.difficulty,
            supply: self.supply,
        }
    }
}

fn store_err(e: kvstore::StoreError) -> Error {
    Error::BackendFailure(e.to_string())
}

trait Pipe: Sized {
    fn pipe<T>(self, f: impl FnOnce(Self) -> T) -> T {
        f(self)
    }
}
impl<T> Pipe for T {}
