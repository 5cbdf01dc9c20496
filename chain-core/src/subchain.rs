//! Sub-chain registration, spawning, deregistration and startup restoration.
//!
//! Owned exclusively by the root chain: a spawned sub-chain's own
//! `ChainProcessor` is wired with a [`NullEventSink`], so a Register output
//! confirmed on a sub-chain is inert rather than recursively spawning a
//! sub-sub-chain.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use kvstore::{KvStore, PrefixedStore};
use serde::{Deserialize, Serialize};
use shared::{Address, ChainId, Error, Hash, Network, Result, TxId};
use tracing::{info, warn};

use crate::chain::{ChainEventSink, ChainProcessor, NullEventSink};
use crate::mempool::Mempool;
use crate::params::{ConsensusParams, GenesisAllocation, ProtocolParams};

/// Minimum native value a Register output must burn to found a sub-chain.
pub use crate::params::DEFAULT_MIN_DEPOSIT;
/// Maximum number of sub-chains a single parent will register.
pub use crate::params::DEFAULT_MAX_PER_PARENT;

const PREFIX_REGISTRY: &[u8] = b"r/";

fn registry_key(chain_id: &ChainId) -> Vec<u8> {
    let mut key = PREFIX_REGISTRY.to_vec();
    key.extend_from_slice(chain_id.as_bytes());
    key
}

fn subchain_prefix(chain_id: &ChainId) -> Vec<u8> {
    format!("sc/{}/", hex::encode(chain_id.as_bytes())).into_bytes()
}

/// `BLAKE3(registration_tx_hash ‖ output_index as BE32)`.
#[must_use]
pub fn derive_chain_id(registration_tx_hash: Hash, output_index: u32) -> ChainId {
    let mut w = shared::encoding::Writer::new();
    w.raw(registration_tx_hash.as_bytes());
    w.raw(&output_index.to_be_bytes());
    Hash::blake3(&w.finish())
}

/// The JSON payload carried by a Register output's script data (spec.md
/// §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationData {
    pub name: String,
    pub symbol: String,
    pub consensus_type: String,
    pub block_time: u64,
    pub block_reward: u64,
    pub max_supply: u64,
    pub min_fee_rate: u64,
    #[serde(default)]
    pub validators: Vec<String>,
    #[serde(default)]
    pub initial_difficulty: u64,
    #[serde(default)]
    pub difficulty_adjust: u64,
    #[serde(default)]
    pub validator_stake: u64,
}

impl RegistrationData {
    /// Every structural rule from spec.md §4.8 step 1, checked up front so a
    /// malformed registration never reaches consensus-param construction.
    pub fn validate(&self, allow_pow: bool) -> Result<()> {
        let name_len = self.name.chars().count();
        if name_len == 0 || name_len > 64 {
            return Err(Error::InvalidStructure(
                "registration name must be 1-64 characters".to_string(),
            ));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '-')
        {
            return Err(Error::InvalidStructure(
                "registration name must be alphanumeric, space or hyphen".to_string(),
            ));
        }

        let symbol_len = self.symbol.chars().count();
        if !(2..=10).contains(&symbol_len) {
            return Err(Error::InvalidStructure(
                "registration symbol must be 2-10 characters".to_string(),
            ));
        }
        if !self
            .symbol
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return Err(Error::InvalidStructure(
                "registration symbol must be uppercase alphanumeric".to_string(),
            ));
        }

        if self.block_time < 1 {
            return Err(Error::InvalidStructure(
                "registration block_time must be at least 1 second".to_string(),
            ));
        }
        if self.block_reward == 0 {
            return Err(Error::InvalidStructure(
                "registration block_reward must be positive".to_string(),
            ));
        }
        if self.max_supply < self.block_reward {
            return Err(Error::InvalidStructure(
                "registration max_supply must be at least block_reward".to_string(),
            ));
        }
        if self.min_fee_rate == 0 {
            return Err(Error::InvalidStructure(
                "registration min_fee_rate must be positive".to_string(),
            ));
        }

        match self.consensus_type.as_str() {
            "poa" => {
                if self.validators.is_empty() {
                    return Err(Error::InvalidStructure(
                        "poa registration requires a non-empty validator list".to_string(),
                    ));
                }
                for v in &self.validators {
                    let bytes = hex::decode(v).map_err(|_| {
                        Error::InvalidStructure("validator entry is not valid hex".to_string())
                    })?;
                    if bytes.len() != 33 {
                        return Err(Error::InvalidStructure(
                            "validator entry must decode to 33 bytes".to_string(),
                        ));
                    }
                }
            }
            "pow" => {
                if !allow_pow {
                    return Err(Error::PolicyRejection(
                        "proof-of-work sub-chains are not permitted by this parent".to_string(),
                    ));
                }
                if self.initial_difficulty == 0 {
                    return Err(Error::InvalidStructure(
                        "pow registration requires initial_difficulty > 0".to_string(),
                    ));
                }
                if self.difficulty_adjust != 0 && self.difficulty_adjust < 10 {
                    return Err(Error::InvalidStructure(
                        "pow registration difficulty_adjust must be 0 or >= 10".to_string(),
                    ));
                }
            }
            other => {
                return Err(Error::InvalidStructure(format!(
                    "unknown consensus_type: {other}"
                )))
            }
        }

        Ok(())
    }

    fn to_consensus_params(&self) -> Result<ConsensusParams> {
        match self.consensus_type.as_str() {
            "poa" => {
                let mut genesis_validators = Vec::with_capacity(self.validators.len());
                for v in &self.validators {
                    let bytes = hex::decode(v)
                        .map_err(|_| Error::InvalidStructure("validator entry is not valid hex".to_string()))?;
                    let array: [u8; 33] = bytes.try_into().map_err(|_| {
                        Error::InvalidStructure("validator entry must decode to 33 bytes".to_string())
                    })?;
                    genesis_validators.push(array);
                }
                Ok(ConsensusParams::ProofOfAuthority {
                    slot_duration: self.block_time,
                    min_validator_stake: self.validator_stake,
                    genesis_validators,
                })
            }
            "pow" => Ok(ConsensusParams::ProofOfWork {
                initial_difficulty: self.initial_difficulty,
                target_block_time: self.block_time,
                adjustment_window: self.difficulty_adjust,
            }),
            other => Err(Error::InvalidStructure(format!(
                "unknown consensus_type: {other}"
            ))),
        }
    }
}

/// A registered sub-chain's persisted record: who registered it, under what
/// terms, and how much was burned to found it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubchainMetadata {
    pub chain_id: ChainId,
    pub registration_txid: TxId,
    pub output_index: u32,
    pub registered_height: u64,
    pub burn_value: u64,
    pub data: RegistrationData,
}

/// Which sub-chains this node maintains state for.
#[derive(Debug, Clone)]
pub enum SyncFilter {
    All,
    List(HashSet<ChainId>),
    None,
}

impl SyncFilter {
    #[must_use]
    pub fn permits(&self, chain_id: &ChainId) -> bool {
        match self {
            SyncFilter::All => true,
            SyncFilter::List(set) => set.contains(chain_id),
            SyncFilter::None => false,
        }
    }
}

/// Which Proof-of-Work sub-chains this node mines. Deliberately has no
/// "all" variant (spec.md §4.8): mining every known sub-chain by default
/// would silently commit CPU/GPU resources a node operator never asked for.
#[derive(Debug, Clone, Default)]
pub struct MineFilter(HashSet<ChainId>);

impl MineFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&mut self, chain_id: ChainId) {
        self.0.insert(chain_id);
    }

    pub fn disallow(&mut self, chain_id: &ChainId) {
        self.0.remove(chain_id);
    }

    #[must_use]
    pub fn allows(&self, chain_id: &ChainId) -> bool {
        self.0.contains(chain_id)
    }
}

/// A running sub-chain instance: its own isolated processor, mempool and
/// backing namespace, all reachable from the manager's live map.
pub struct SpawnedChain {
    pub processor: ChainProcessor<NullEventSink>,
    pub mempool: Mempool,
    store: Arc<PrefixedStore>,
}

/// Configuration the manager needs to enforce registration policy, separate
/// from a spawned chain's own `ProtocolParams`.
pub struct SubchainPolicy {
    pub min_deposit: u64,
    pub max_per_parent: usize,
    pub allow_pow: bool,
    pub network: Network,
}

impl Default for SubchainPolicy {
    fn default() -> Self {
        Self {
            min_deposit: DEFAULT_MIN_DEPOSIT,
            max_per_parent: DEFAULT_MAX_PER_PARENT,
            allow_pow: true,
            network: Network::Testnet,
        }
    }
}

/// Owned by the root chain. Holds the persisted registry and the live map
/// of spawned sub-chain instances, and reacts to Register/Anchor/Deregister
/// notifications fired by the root `ChainProcessor`.
pub struct SubchainManager {
    root_store: Arc<dyn KvStore>,
    policy: SubchainPolicy,
    sync_filter: SyncFilter,
    mine_filter: MineFilter,
    registry: HashMap<ChainId, SubchainMetadata>,
    live: HashMap<ChainId, SpawnedChain>,
    spawn_handler: Option<Box<dyn FnMut(ChainId) + Send>>,
    stop_handler: Option<Box<dyn FnMut(ChainId) + Send>>,
}

impl SubchainManager {
    #[must_use]
    pub fn new(root_store: Arc<dyn KvStore>, policy: SubchainPolicy, sync_filter: SyncFilter) -> Self {
        Self {
            root_store,
            policy,
            sync_filter,
            mine_filter: MineFilter::new(),
            registry: HashMap::new(),
            live: HashMap::new(),
            spawn_handler: None,
            stop_handler: None,
        }
    }

    pub fn set_spawn_handler(&mut self, handler: impl FnMut(ChainId) + Send + 'static) {
        self.spawn_handler = Some(Box::new(handler));
    }

    pub fn set_stop_handler(&mut self, handler: impl FnMut(ChainId) + Send + 'static) {
        self.stop_handler = Some(Box::new(handler));
    }

    #[must_use]
    pub fn mine_filter(&mut self) -> &mut MineFilter {
        &mut self.mine_filter
    }

    #[must_use]
    pub fn get_chain(&self, chain_id: &ChainId) -> Option<&SpawnedChain> {
        self.live.get(chain_id)
    }

    pub fn get_chain_mut(&mut self, chain_id: &ChainId) -> Option<&mut SpawnedChain> {
        self.live.get_mut(chain_id)
    }

    #[must_use]
    pub fn list_chains(&self) -> Vec<ChainId> {
        self.registry.keys().copied().collect()
    }

    #[must_use]
    pub fn metadata(&self, chain_id: &ChainId) -> Option<&SubchainMetadata> {
        self.registry.get(chain_id)
    }

    /// Loads the persisted registry and spawns every entry the sync filter
    /// permits. Called once at node startup after the root chain opens.
    pub fn restore_chains(&mut self) -> Result<()> {
        for (_, value) in self.root_store.scan_prefix(PREFIX_REGISTRY).map_err(store_err)? {
            let meta: SubchainMetadata = serde_json::from_slice(&value)
                .map_err(|e| Error::BackendFailure(format!("corrupt sub-chain registry entry: {e}")))?;
            let chain_id = meta.chain_id;
            self.registry.insert(chain_id, meta);
            if self.sync_filter.permits(&chain_id) {
                self.spawn(chain_id)?;
            }
        }
        Ok(())
    }

    /// Runs the registration flow (spec.md §4.8 steps 1-6) against a
    /// Register output that just became confirmed on the root chain.
    /// Never fails the caller's block application: registration failures are
    /// logged and otherwise silently dropped, matching the best-effort
    /// `ChainEventSink` contract.
    pub fn handle_registration(
        &mut self,
        height: u64,
        txid: TxId,
        output_index: u32,
        burn_value: u64,
        payload: &[u8],
    ) -> Result<()> {
        let data: RegistrationData = serde_json::from_slice(payload)
            .map_err(|e| Error::InvalidStructure(format!("malformed registration payload: {e}")))?;
        data.validate(self.policy.allow_pow)?;

        if burn_value < self.policy.min_deposit {
            return Err(Error::PolicyRejection(format!(
                "registration burns {burn_value}, below the required minimum deposit of {}",
                self.policy.min_deposit
            )));
        }
        if self.registry.len() >= self.policy.max_per_parent {
            return Err(Error::PolicyRejection(
                "this parent has already registered its maximum number of sub-chains".to_string(),
            ));
        }

        let chain_id = derive_chain_id(txid, output_index);
        if self.registry.contains_key(&chain_id) {
            return Err(Error::Conflict(format!(
                "sub-chain {chain_id} is already registered"
            )));
        }

        let meta = SubchainMetadata {
            chain_id,
            registration_txid: txid,
            output_index,
            registered_height: height,
            burn_value,
            data,
        };
        self.root_store
            .put(
                &registry_key(&chain_id),
                &serde_json::to_vec(&meta).expect("metadata serializes"),
            )
            .map_err(store_err)?;
        self.registry.insert(chain_id, meta);
        info!(%chain_id, "sub-chain registered");

        if self.sync_filter.permits(&chain_id) {
            self.spawn(chain_id)?;
        }
        Ok(())
    }

    /// Creates (or, on restart, re-opens) an isolated chain instance under
    /// `sc/<chain_id_hex>/` and adds it to the live map.
    fn spawn(&mut self, chain_id: ChainId) -> Result<()> {
        let meta = self
            .registry
            .get(&chain_id)
            .ok_or_else(|| Error::NotFound(format!("no registration for sub-chain {chain_id}")))?
            .clone();

        let store = Arc::new(PrefixedStore::new(self.root_store.clone(), subchain_prefix(&chain_id)));
        let params = self.build_params(&meta)?;
        let processor = ChainProcessor::open(store.clone(), params, NullEventSink)?;
        let mempool = Mempool::new();

        self.live.insert(
            chain_id,
            SpawnedChain {
                processor,
                mempool,
                store,
            },
        );
        info!(%chain_id, "sub-chain spawned");
        if let Some(handler) = &mut self.spawn_handler {
            handler(chain_id);
        }
        Ok(())
    }

    fn build_params(&self, meta: &SubchainMetadata) -> Result<ProtocolParams> {
        let consensus = meta.data.to_consensus_params()?;
        Ok(ProtocolParams {
            network: self.policy.network,
            consensus,
            block_reward: meta.data.block_reward,
            max_supply: meta.data.max_supply,
            coinbase_maturity: crate::params::DEFAULT_COINBASE_MATURITY,
            min_fee_rate: meta.data.min_fee_rate,
            mempool_capacity: 10_000,
            max_block_transactions: crate::params::DEFAULT_MAX_BLOCK_TXS,
            max_token_amount: crate::params::DEFAULT_MAX_TOKEN_AMOUNT,
            token_creation_fee: crate::params::DEFAULT_TOKEN_CREATION_FEE,
            max_timestamp_skew: crate::params::DEFAULT_MAX_TIMESTAMP_SKEW,
            genesis_timestamp: meta.registered_height,
            // A sub-chain's genesis carries no allocation of its own — its
            // economy starts from nothing but a single zero-value output,
            // which still satisfies the "at least one output" structural
            // rule every genesis block must meet.
            genesis_allocations: vec![GenesisAllocation {
                address: Address::from_bytes([0u8; 20]),
                amount: 0,
            }],
        })
    }

    /// Called when a reorg reverts the block that created `txid`'s Register
    /// output at `output_index`. A no-op for an unrecognized ChainID.
    pub fn handle_deregistration(&mut self, txid: TxId, output_index: u32) -> Result<()> {
        let chain_id = derive_chain_id(txid, output_index);
        if !self.registry.contains_key(&chain_id) {
            return Ok(());
        }

        if let Some(handler) = &mut self.stop_handler {
            handler(chain_id);
        }
        if let Some(chain) = self.live.remove(&chain_id) {
            chain.store.wipe().map_err(store_err)?;
        } else {
            // Never spawned (filtered out), but still registered: wipe the
            // namespace anyway in case a restart spawned it in between.
            self.root_store
                .delete_prefix(&subchain_prefix(&chain_id))
                .map_err(store_err)?;
        }
        self.registry.remove(&chain_id);
        self.root_store.delete(&registry_key(&chain_id)).map_err(store_err)?;
        warn!(%chain_id, "sub-chain deregistered");
        Ok(())
    }
}

/// Wires the manager directly into a root `ChainProcessor` as its event
/// sink: registration/deregistration failures are logged and otherwise
/// swallowed, per the best-effort callback contract (spec.md §5 — handlers
/// "must not block on another chain's apply path").
impl ChainEventSink for SubchainManager {
    fn on_register(&mut self, height: u64, txid: TxId, output_index: u32, value: u64, payload: &[u8]) {
        if let Err(e) = self.handle_registration(height, txid, output_index, value, payload) {
            warn!(error = %e, "sub-chain registration rejected");
        }
    }

    fn on_anchor(&mut self, _chain_id: ChainId, _state_root: Hash, _height: u64) {}

    fn on_deregister(&mut self, txid: TxId, output_index: u32) {
        if let Err(e) = self.handle_deregistration(txid, output_index) {
            warn!(error = %e, "sub-chain deregistration failed");
        }
    }
}

fn store_err(e: kvstore::StoreError) -> Error {
    Error::BackendFailure(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvstore::MemoryStore;

    fn poa_payload() -> Vec<u8> {
        serde_json::to_vec(&RegistrationData {
            name: "Test Chain".to_string(),
            symbol: "TST".to_string(),
            consensus_type: "poa".to_string(),
            block_time: 5,
            block_reward: 1_000,
            max_supply: 1_000_000,
            min_fee_rate: 1,
            validators: vec!["02".to_string() + &"ab".repeat(32)],
            initial_difficulty: 0,
            difficulty_adjust: 0,
            validator_stake: 0,
        })
        .unwrap()
    }

    fn manager() -> SubchainManager {
        SubchainManager::new(
            Arc::new(MemoryStore::new()),
            SubchainPolicy::default(),
            SyncFilter::All,
        )
    }

    #[test]
    fn validates_name_and_symbol_charset() {
        let mut data = serde_json::from_slice::<RegistrationData>(&poa_payload()).unwrap();
        data.name = "bad_name!".to_string();
        assert!(data.validate(true).is_err());

        let mut data = serde_json::from_slice::<RegistrationData>(&poa_payload()).unwrap();
        data.symbol = "lower".to_string();
        assert!(data.validate(true).is_err());
    }

    #[test]
    fn pow_requires_nonzero_initial_difficulty() {
        let mut data = serde_json::from_slice::<RegistrationData>(&poa_payload()).unwrap();
        data.consensus_type = "pow".to_string();
        data.initial_difficulty = 0;
        assert!(data.validate(true).is_err());
    }

    #[test]
    fn pow_rejected_when_parent_disallows_it() {
        let mut data = serde_json::from_slice::<RegistrationData>(&poa_payload()).unwrap();
        data.consensus_type = "pow".to_string();
        data.initial_difficulty = 1;
        assert!(data.validate(false).is_err());
        assert!(data.validate(true).is_ok());
    }

    #[test]
    fn registration_below_min_deposit_is_rejected() {
        let mut mgr = manager();
        let txid = Hash::blake3(b"reg-tx");
        let err = mgr
            .handle_registration(10, txid, 0, DEFAULT_MIN_DEPOSIT - 1, &poa_payload())
            .unwrap_err();
        assert!(matches!(err, Error::PolicyRejection(_)));
        assert!(mgr.list_chains().is_empty());
    }

    #[test]
    fn registration_spawns_an_isolated_chain() {
        let mut mgr = manager();
        let txid = Hash::blake3(b"reg-tx");
        mgr.handle_registration(10, txid, 0, DEFAULT_MIN_DEPOSIT, &poa_payload())
            .unwrap();

        let chain_id = derive_chain_id(txid, 0);
        assert_eq!(mgr.list_chains(), vec![chain_id]);
        let spawned = mgr.get_chain(&chain_id).expect("chain should be live");
        assert_eq!(spawned.processor.height(), 0);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut mgr = manager();
        let txid = Hash::blake3(b"reg-tx");
        mgr.handle_registration(10, txid, 0, DEFAULT_MIN_DEPOSIT, &poa_payload())
            .unwrap();
        let err = mgr
            .handle_registration(11, txid, 0, DEFAULT_MIN_DEPOSIT, &poa_payload())
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn max_per_parent_is_enforced() {
        let mut policy = SubchainPolicy::default();
        policy.max_per_parent = 1;
        let mut mgr = SubchainManager::new(Arc::new(MemoryStore::new()), policy, SyncFilter::All);
        mgr.handle_registration(1, Hash::blake3(b"a"), 0, DEFAULT_MIN_DEPOSIT, &poa_payload())
            .unwrap();
        let err = mgr
            .handle_registration(2, Hash::blake3(b"b"), 0, DEFAULT_MIN_DEPOSIT, &poa_payload())
            .unwrap_err();
        assert!(matches!(err, Error::PolicyRejection(_)));
    }

    #[test]
    fn sync_filter_none_registers_without_spawning() {
        let mut mgr = SubchainManager::new(
            Arc::new(MemoryStore::new()),
            SubchainPolicy::default(),
            SyncFilter::None,
        );
        let txid = Hash::blake3(b"reg-tx");
        mgr.handle_registration(10, txid, 0, DEFAULT_MIN_DEPOSIT, &poa_payload())
            .unwrap();
        let chain_id = derive_chain_id(txid, 0);
        assert_eq!(mgr.list_chains(), vec![chain_id]);
        assert!(mgr.get_chain(&chain_id).is_none());
    }

    #[test]
    fn deregistration_wipes_the_namespace_and_registry() {
        let mut mgr = manager();
        let txid = Hash::blake3(b"reg-tx");
        mgr.handle_registration(10, txid, 0, DEFAULT_MIN_DEPOSIT, &poa_payload())
            .unwrap();
        let chain_id = derive_chain_id(txid, 0);
        assert!(mgr.get_chain(&chain_id).is_some());

        mgr.handle_deregistration(txid, 0).unwrap();
        assert!(mgr.get_chain(&chain_id).is_none());
        assert!(mgr.list_chains().is_empty());
        assert!(mgr.root_store.get(&registry_key(&chain_id)).unwrap().is_none());
    }

    #[test]
    fn deregistering_an_unknown_chain_is_a_no_op() {
        let mut mgr = manager();
        assert!(mgr.handle_deregistration(Hash::blake3(b"nope"), 0).is_ok());
    }

    #[test]
    fn restore_respawns_registered_chains_permitted_by_sync_filter() {
        let store = Arc::new(MemoryStore::new());
        let txid = Hash::blake3(b"reg-tx");
        {
            let mut mgr = SubchainManager::new(store.clone(), SubchainPolicy::default(), SyncFilter::All);
            mgr.handle_registration(10, txid, 0, DEFAULT_MIN_DEPOSIT, &poa_payload())
                .unwrap();
        }

        let chain_id = derive_chain_id(txid, 0);
        let mut mgr = SubchainManager::new(store, SubchainPolicy::default(), SyncFilter::All);
        mgr.restore_chains().unwrap();
        assert!(mgr.get_chain(&chain_id).is_some());
    }

    #[test]
    fn mine_filter_has_no_all_mode_and_starts_empty() {
        let mut filter = MineFilter::new();
        let id = Hash::blake3(b"x");
        assert!(!filter.allows(&id));
        filter.allow(id);
        assert!(filter.allows(&id));
        filter.disallow(&id);
        assert!(!filter.allows(&id));
    }
}
