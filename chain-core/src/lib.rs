pub mod broadcast;
pub mod chain;
pub mod consensus;
pub mod genesis;
pub mod mempool;
pub mod params;
pub mod producer;
pub mod subchain;
pub mod token;
pub mod utxo;
pub mod validation;

pub use broadcast::{BlockBroadcaster, NoopBroadcaster};
pub use chain::{ChainEventSink, ChainProcessor, ChainStats, NullEventSink};
pub use consensus::ConsensusEngine;
pub use mempool::Mempool;
pub use params::{ConsensusKind, ConsensusParams, GenesisAllocation, ProtocolParams};
pub use producer::{BlockProducer, Sealing};
pub use subchain::{
    derive_chain_id, MineFilter, RegistrationData, SpawnedChain, SubchainManager, SubchainMetadata,
    SubchainPolicy, SyncFilter,
};
pub use utxo::{Utxo, UtxoSet};

pub use shared::{Error, Result};
