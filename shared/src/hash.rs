use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-byte BLAKE3 digest used to identify transactions, blocks, chains and tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Hashes `data` with BLAKE3.
    #[must_use]
    pub fn blake3(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }

    /// Treats both hashes as 256-bit big-endian integers and checks
    /// `self <= target`. Used by PoW to compare a block hash to the target.
    #[must_use]
    pub fn le_numeric(&self, target: &Hash) -> bool {
        self.0 <= target.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::LowerHex for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A chain identifier is hash-shaped: `BLAKE3(registration_tx_hash ‖ output_index)`.
pub type ChainId = Hash;

/// A token identifier is hash-shaped: `BLAKE3(first_input_txid ‖ first_input_index)`.
pub type TokenId = Hash;
