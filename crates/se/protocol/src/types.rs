//! Fixed-size values exchanged with the device

use std::fmt;

use crate::error::{Error, Result};

/// Nine-byte device serial number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SerialNumber([u8; 9]);

impl SerialNumber {
    /// Wrap raw serial bytes
    pub const fn new(bytes: [u8; 9]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    pub const fn as_bytes(&self) -> &[u8; 9] {
        &self.0
    }

    /// Byte at position `index`; the digests mix in individual bytes
    pub const fn byte(&self, index: usize) -> u8 {
        self.0[index]
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

/// Uncompressed P-256 public key without the 0x04 prefix (X ‖ Y)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 64]);

impl PublicKey {
    /// Wrap raw key bytes
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Parse from a 64-byte slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| Error::InvalidInput("public key must be 64 bytes"))?;
        Ok(Self(bytes))
    }

    /// Raw bytes
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// SEC1 uncompressed encoding (0x04 ‖ X ‖ Y)
    pub fn to_uncompressed(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[0] = 0x04;
        out[1..].copy_from_slice(&self.0);
        out
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&hex::encode(self.0)).finish()
    }
}

/// Raw ECDSA P-256 signature (R ‖ S)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 64]);

impl Signature {
    /// Wrap raw signature bytes
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Parse from a 64-byte slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| Error::InvalidInput("signature must be 64 bytes"))?;
        Ok(Self(bytes))
    }

    /// Raw bytes
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// R component
    pub fn r(&self) -> &[u8] {
        &self.0[..32]
    }

    /// S component
    pub fn s(&self) -> &[u8] {
        &self.0[32..]
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature").field(&hex::encode(self.0)).finish()
    }
}
