//! Output scripts. Unlike a general-purpose scripting VM, each `ScriptType`
//! here has one fixed interpretation of `data` — there is no opcode
//! execution, only structural parsing.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::crypto::PublicKey;
use crate::error::{Error, Result};
use crate::hash::{ChainId, Hash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ScriptType {
    P2pkh = 0x01,
    P2sh = 0x02,
    Mint = 0x10,
    Burn = 0x11,
    Anchor = 0x20,
    Register = 0x21,
    Bridge = 0x30,
    Stake = 0x40,
}

impl ScriptType {
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(byte: u8) -> Result<Self> {
        Ok(match byte {
            0x01 => ScriptType::P2pkh,
            0x02 => ScriptType::P2sh,
            0x10 => ScriptType::Mint,
            0x11 => ScriptType::Burn,
            0x20 => ScriptType::Anchor,
            0x21 => ScriptType::Register,
            0x30 => ScriptType::Bridge,
            0x40 => ScriptType::Stake,
            other => {
                return Err(Error::InvalidStructure(format!(
                    "unknown script type byte: 0x{other:02x}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub script_type: ScriptType,
    pub data: Vec<u8>,
}

/// Optional metadata appended after a Mint output's recipient address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl Script {
    #[must_use]
    pub fn p2pkh(address: &Address) -> Self {
        Self {
            script_type: ScriptType::P2pkh,
            data: address.as_bytes().to_vec(),
        }
    }

    #[must_use]
    pub fn mint(address: &Address, metadata: Option<&MintMetadata>) -> Self {
        let mut data = address.as_bytes().to_vec();
        if let Some(meta) = metadata {
            let name_bytes = meta.name.as_bytes();
            let symbol_bytes = meta.symbol.as_bytes();
            data.push(u8::try_from(name_bytes.len()).unwrap_or(u8::MAX));
            data.extend_from_slice(&name_bytes[..name_bytes.len().min(u8::MAX as usize)]);
            data.push(u8::try_from(symbol_bytes.len()).unwrap_or(u8::MAX));
            data.extend_from_slice(&symbol_bytes[..symbol_bytes.len().min(u8::MAX as usize)]);
            data.push(meta.decimals);
        }
        Self {
            script_type: ScriptType::Mint,
            data,
        }
    }

    #[must_use]
    pub const fn burn() -> Self {
        Self {
            script_type: ScriptType::Burn,
            data: Vec::new(),
        }
    }

    #[must_use]
    pub fn stake(pubkey: &PublicKey) -> Self {
        Self {
            script_type: ScriptType::Stake,
            data: pubkey.as_bytes().to_vec(),
        }
    }

    #[must_use]
    pub fn register(registration_json: Vec<u8>) -> Self {
        Self {
            script_type: ScriptType::Register,
            data: registration_json,
        }
    }

    #[must_use]
    pub fn anchor(chain_id: ChainId, state_root: Hash, height: u64) -> Self {
        let mut data = Vec::with_capacity(72);
        data.extend_from_slice(chain_id.as_bytes());
        data.extend_from_slice(state_root.as_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        Self {
            script_type: ScriptType::Anchor,
            data,
        }
    }

    /// Recipient address for scripts whose `data` leads with a 20-byte
    /// address: P2PKH and Mint per spec.md's Data semantics, and P2SH/Bridge
    /// by extension since the spec leaves their payload format otherwise
    /// unspecified and both are address-locked outputs in every chain that
    /// defines them.
    #[must_use]
    pub fn recipient_address(&self) -> Option<Address> {
        match self.script_type {
            ScriptType::P2pkh | ScriptType::Mint | ScriptType::P2sh | ScriptType::Bridge => {
                let bytes: [u8; 20] = self.data.get(..20)?.try_into().ok()?;
                Some(Address::from_bytes(bytes))
            }
            _ => None,
        }
    }

    /// Mint metadata suffix, if this is a Mint script that carries one.
    #[must_use]
    pub fn mint_metadata(&self) -> Option<MintMetadata> {
        if self.script_type != ScriptType::Mint || self.data.len() <= 20 {
            return None;
        }
        let rest = &self.data[20..];
        let name_len = *rest.first()? as usize;
        let name = rest.get(1..1 + name_len)?;
        let after_name = 1 + name_len;
        let symbol_len = *rest.get(after_name)? as usize;
        let symbol = rest.get(after_name + 1..after_name + 1 + symbol_len)?;
        let decimals = *rest.get(after_name + 1 + symbol_len)?;
        Some(MintMetadata {
            name: String::from_utf8_lossy(name).into_owned(),
            symbol: String::from_utf8_lossy(symbol).into_owned(),
            decimals,
        })
    }

    /// The bonded pubkey for a Stake script, requiring exactly 33 bytes.
    pub fn stake_pubkey(&self) -> Result<PublicKey> {
        if self.script_type != ScriptType::Stake {
            return Err(Error::InvalidStructure(
                "not a stake script".to_string(),
            ));
        }
        if self.data.len() != 33 {
            return Err(Error::InvalidStructure(
                "stake script data must be exactly 33 bytes".to_string(),
            ));
        }
        PublicKey::from_bytes(&self.data)
    }

    /// Decodes a 72-byte anchor payload: `ChainID(32) ‖ StateRoot(32) ‖ Height(8 BE)`.
    pub fn decode_anchor(&self) -> Result<(ChainId, Hash, u64)> {
        if self.script_type != ScriptType::Anchor {
            return Err(Error::InvalidStructure("not an anchor script".to_string()));
        }
        if self.data.len() != 72 {
            return Err(Error::InvalidStructure(
                "anchor payload must be 72 bytes".to_string(),
            ));
        }
        let chain_id = Hash::from_bytes(self.data[0..32].try_into().unwrap());
        let state_root = Hash::from_bytes(self.data[32..64].try_into().unwrap());
        let height = u64::from_be_bytes(self.data[64..72].try_into().unwrap());
        Ok((chain_id, state_root, height))
    }

    #[must_use]
    pub fn is_unspendable(&self) -> bool {
        matches!(
            self.script_type,
            ScriptType::Burn | ScriptType::Anchor | ScriptType::Register
        )
    }
}
