use thiserror::Error;

/// Error kinds shared by every node component, matching the classification
/// the chain processor, mempool and sub-chain manager all key their
/// rejection/propagation behavior on.
#[derive(Error, Debug)]
pub enum Error {
    /// No block/tx/UTXO/sub-chain exists for the given key. Expected, surfaced verbatim.
    #[error("not found: {0}")]
    NotFound(String),

    /// Fails a stateless structural check; rejected before touching any state.
    #[error("invalid structure: {0}")]
    InvalidStructure(String),

    /// Fails a check that requires current UTXO/chain state (signature, maturity, conservation).
    #[error("invalid against state: {0}")]
    InvalidAgainstState(String),

    /// Header signature, slot election or PoW target check failed.
    #[error("invalid consensus: {0}")]
    InvalidConsensus(String),

    /// Below the fee-rate floor, or mempool full with no room for the candidate.
    #[error("policy rejection: {0}")]
    PolicyRejection(String),

    /// A double-spend against the mempool or already-confirmed state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The key-value store failed; fatal for the affected chain instance.
    #[error("backend failure: {0}")]
    BackendFailure(String),

    /// Nil store, nil consensus rules, or an unknown consensus type at spawn.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// PoW sealing was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,

    /// Arithmetic overflow in a value or token sum; never silently wrapped.
    #[error("overflow: {0}")]
    Overflow(String),
}

pub type Result<T> = std::result::Result<T, Error>;
