use bech32::{FromBase32, ToBase32, Variant};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Mainnet bech32 human-readable prefix.
pub const HRP_MAINNET: &str = "kgx";
/// Testnet bech32 human-readable prefix.
pub const HRP_TESTNET: &str = "tkgx";

/// 20-byte account address: `BLAKE3(compressed_pubkey)[:20]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address([u8; 20]);

impl Address {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Derives an address from a compressed secp256k1 public key: `BLAKE3(pubkey)[:20]`.
    #[must_use]
    pub fn from_compressed_pubkey(pubkey: &[u8]) -> Self {
        let digest = crate::hash::Hash::blake3(pubkey);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest.as_bytes()[..20]);
        Self(bytes)
    }

    /// Encodes as bech32 with the given human-readable prefix.
    pub fn encode(&self, hrp: &str) -> Result<String> {
        bech32::encode(hrp, self.0.to_base32(), Variant::Bech32)
            .map_err(|e| Error::InvalidStructure(format!("bech32 encode: {e}")))
    }

    /// Parses any of the three accepted forms: bech32, `<hrp>:<40-hex>`, or bare 40-hex.
    pub fn parse(s: &str) -> Result<Self> {
        if let Some((_, hex_part)) = s.split_once(':') {
            return Self::from_hex(hex_part);
        }
        if s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Self::from_hex(s);
        }
        let (hrp, data, variant) = bech32::decode(s)
            .map_err(|e| Error::InvalidStructure(format!("bech32 decode: {e}")))?;
        if hrp != HRP_MAINNET && hrp != HRP_TESTNET {
            return Err(Error::InvalidStructure(format!(
                "unknown address prefix: {hrp}"
            )));
        }
        if variant != Variant::Bech32 {
            return Err(Error::InvalidStructure(
                "address must use bech32 checksum, not bech32m".to_string(),
            ));
        }
        let bytes = Vec::<u8>::from_base32(&data)
            .map_err(|e| Error::InvalidStructure(format!("bech32 payload: {e}")))?;
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| Error::InvalidStructure("address payload must be 20 bytes".to_string()))?;
        Ok(Self(arr))
    }

    fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| Error::InvalidStructure(format!("invalid hex address: {e}")))?;
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| Error::InvalidStructure("hex address must be 20 bytes".to_string()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bech32_round_trips() {
        let addr = Address::from_bytes([7u8; 20]);
        let encoded = addr.encode(HRP_MAINNET).unwrap();
        assert_eq!(Address::parse(&encoded).unwrap(), addr);
    }

    #[test]
    fn single_character_mutation_fails_checksum() {
        let addr = Address::from_bytes([42u8; 20]);
        let encoded = addr.encode(HRP_MAINNET).unwrap();
        let mut chars: Vec<char> = encoded.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == 'q' { 'p' } else { 'q' };
        let mutated: String = chars.into_iter().collect();
        assert!(Address::parse(&mutated).is_err());
    }

    #[test]
    fn accepts_legacy_hrp_colon_hex_form() {
        let addr = Address::from_bytes([1u8; 20]);
        let legacy = format!("kgx:{}", hex::encode(addr.as_bytes()));
        assert_eq!(Address::parse(&legacy).unwrap(), addr);
    }

    #[test]
    fn accepts_bare_hex_form() {
        let addr = Address::from_bytes([9u8; 20]);
        let bare = hex::encode(addr.as_bytes());
        assert_eq!(Address::parse(&bare).unwrap(), addr);
    }

    #[test]
    fn testnet_prefix_round_trips() {
        let addr = Address::from_bytes([3u8; 20]);
        let encoded = addr.encode(HRP_TESTNET).unwrap();
        assert_eq!(Address::parse(&encoded).unwrap(), addr);
    }
}
