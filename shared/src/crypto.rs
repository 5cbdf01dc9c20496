//! Schnorr-over-secp256k1 signing and verification.
//!
//! Keys are carried around the wire in 33-byte SEC1-compressed form (the
//! format the script/UTXO layer stores for P2PKH and Stake outputs);
//! Schnorr signing and verification operate on the x-only point per
//! BIP-340, so the parity byte is dropped internally before each call.

use crate::error::{Error, Result};
use crate::hash::Hash;
use secp256k1::{Keypair, Message, PublicKey as Secp256k1PublicKey, Secp256k1, SecretKey};
use zeroize::Zeroize;

/// A 33-byte SEC1-compressed secp256k1 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 33]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 33] = bytes
            .try_into()
            .map_err(|_| Error::InvalidStructure("public key must be 33 bytes".to_string()))?;
        Secp256k1PublicKey::from_slice(&arr)
            .map_err(|e| Error::InvalidStructure(format!("invalid public key: {e}")))?;
        Ok(Self(arr))
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    fn to_secp(self) -> Secp256k1PublicKey {
        Secp256k1PublicKey::from_slice(&self.0).expect("validated at construction")
    }
}

/// A secp256k1 private scalar. Zeroized on drop.
pub struct PrivateKey(SecretKey);

impl PrivateKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let secret = SecretKey::from_slice(bytes)
            .map_err(|e| Error::InvalidStructure(format!("invalid private key: {e}")))?;
        Ok(Self(secret))
    }

    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::new();
        let pk = Secp256k1PublicKey::from_secret_key(&secp, &self.0);
        PublicKey(pk.serialize())
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        // SecretKey doesn't expose mutable bytes to zeroize directly; overwrite
        // via a local copy of the key material we do control.
        let mut bytes = self.0.secret_bytes();
        bytes.zeroize();
    }
}

/// A signing keypair: a private scalar plus its derived public key.
pub struct KeyPair {
    secp_keypair: Keypair,
    public_key: PublicKey,
}

impl KeyPair {
    #[must_use]
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secp_keypair = Keypair::new(&secp, &mut rand::thread_rng());
        let (xonly, _parity) = secp_keypair.x_only_public_key();
        let full = Secp256k1PublicKey::from_x_only_public_key(xonly, secp256k1::Parity::Even);
        Self {
            secp_keypair,
            public_key: PublicKey(full.serialize()),
        }
    }

    pub fn from_private_key(private: &PrivateKey) -> Self {
        let secp = Secp256k1::new();
        let secp_keypair = Keypair::from_secret_key(&secp, &private.0);
        let pk = Secp256k1PublicKey::from_secret_key(&secp, &private.0);
        Self {
            secp_keypair,
            public_key: PublicKey(pk.serialize()),
        }
    }

    #[must_use]
    pub const fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Signs a 32-byte message digest, returning a 64-byte Schnorr signature.
    #[must_use]
    pub fn sign(&self, digest: &Hash) -> Signature {
        let secp = Secp256k1::new();
        let message = Message::from_digest(*digest.as_bytes());
        let sig = secp.sign_schnorr(&message, &self.secp_keypair);
        Signature(sig.as_ref().try_into().expect("schnorr sig is 64 bytes"))
    }
}

/// A 64-byte BIP-340 Schnorr signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| Error::InvalidStructure("signature must be 64 bytes".to_string()))?;
        Ok(Self(arr))
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

/// Verifies a Schnorr `signature` over `digest` against the x-only point of
/// `pubkey` (the 33-byte compressed form's parity byte is ignored per BIP-340).
pub fn verify(pubkey: &PublicKey, digest: &Hash, signature: &Signature) -> Result<bool> {
    let secp = Secp256k1::new();
    let full = pubkey.to_secp();
    let (xonly, _parity) = full.x_only_public_key();
    let message = Message::from_digest(*digest.as_bytes());
    let sig = secp256k1::schnorr::Signature::from_slice(&signature.0)
        .map_err(|e| Error::InvalidStructure(format!("malformed signature: {e}")))?;
    Ok(secp.verify_schnorr(&sig, &message, &xonly).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let keypair = KeyPair::generate();
        let digest = Hash::blake3(b"some transaction");
        let sig = keypair.sign(&digest);
        assert!(verify(&keypair.public_key(), &digest, &sig).unwrap());
    }

    #[test]
    fn verify_rejects_wrong_digest() {
        let keypair = KeyPair::generate();
        let digest = Hash::blake3(b"original");
        let other = Hash::blake3(b"tampered");
        let sig = keypair.sign(&digest);
        assert!(!verify(&keypair.public_key(), &other, &sig).unwrap());
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let keypair = KeyPair::generate();
        let other_keypair = KeyPair::generate();
        let digest = Hash::blake3(b"some transaction");
        let sig = keypair.sign(&digest);
        assert!(!verify(&other_keypair.public_key(), &digest, &sig).unwrap());
    }

    #[test]
    fn address_derivation_is_deterministic() {
        let keypair = KeyPair::generate();
        let addr1 = crate::address::Address::from_compressed_pubkey(keypair.public_key().as_bytes());
        let addr2 = crate::address::Address::from_compressed_pubkey(keypair.public_key().as_bytes());
        assert_eq!(addr1, addr2);
    }
}
