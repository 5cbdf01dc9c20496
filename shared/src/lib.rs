pub mod address;
pub mod block;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod hash;
pub mod script;
pub mod tx;
pub mod types;

pub use address::Address;
pub use block::{Block, BlockHeader};
pub use crypto::{verify, KeyPair, PrivateKey, PublicKey, Signature};
pub use error::Error;
pub use hash::{ChainId, Hash, TokenId};
pub use script::{MintMetadata, Script, ScriptType};
pub use tx::{TxInput, TxOutput, Transaction};
pub use types::{
    Amount, BlockHeight, BlockId, Network, Outpoint, OutputIndex, Timestamp, TokenData, TxId,
};

pub type Result<T> = std::result::Result<T, Error>;
