//! Fixed canonical little-endian byte layout used for everything that feeds
//! a consensus-critical hash (transaction hash, header signing bytes, UTXO
//! commitment digests). Deliberately not `bincode`/`serde_json`: wire-format
//! or map-ordering changes in a serde backend must never change a hash that
//! two independent implementations need to agree on.

/// Append-only canonical byte writer.
#[derive(Default)]
pub struct Writer(Vec<u8>);

impl Writer {
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.0.push(v);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.extend_from_slice(bytes);
        self
    }

    /// A length-prefixed (u32 LE) byte string.
    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.u32(bytes.len() as u32);
        self.raw(bytes)
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.u8(u8::from(v))
    }

    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.0
    }
}
