//! The 72-byte partial certificate stored on the device
//!
//! | bytes | content                                         |
//! |-------|-------------------------------------------------|
//! | 0-63  | raw signature, R then S                         |
//! | 64-66 | [`CompressedDate`]                              |
//! | 67-68 | signer id, big endian                           |
//! | 69    | template id (high nibble), chain id (low)       |
//! | 70    | serial source (high nibble), format (low)       |
//! | 71    | reserved                                        |

use crate::date::CompressedDate;
use crate::error::{Error, Result};

/// How the certificate serial number is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum SerialSource {
    /// The signer id, big endian; the serial element must be two bytes wide
    #[display("signer id")]
    SignerId,
    /// Leading bytes of `SHA256(public key ‖ packed dates)`
    #[display("public key hash")]
    PublicKeyHash,
}

impl SerialSource {
    /// Decode a source code
    pub const fn from_code(code: u8) -> Result<Self> {
        match code {
            0x9 => Ok(Self::SignerId),
            0xA => Ok(Self::PublicKeyHash),
            other => Err(Error::UnknownSerialSource(other)),
        }
    }

    /// Source code as packed in the partial certificate
    pub const fn code(self) -> u8 {
        match self {
            Self::SignerId => 0x9,
            Self::PublicKeyHash => 0xA,
        }
    }
}

/// Parsed partial certificate
#[derive(Clone, PartialEq, Eq)]
pub struct PartialCertificate {
    signature: [u8; 64],
    meta: [u8; 8],
}

impl PartialCertificate {
    /// Stored size
    pub const SIZE: usize = 72;

    // Offsets into the eight metadata bytes following the signature
    const DATE: usize = 0;
    const SIGNER_ID: usize = 3;
    const TEMPLATE: usize = 5;
    const SOURCE: usize = 6;

    /// Parse the stored bytes
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(Error::InvalidLength {
                expected: Self::SIZE,
                found: bytes.len(),
            });
        }
        let mut partial = Self {
            signature: [0u8; 64],
            meta: [0u8; 8],
        };
        partial.signature.copy_from_slice(&bytes[..64]);
        partial.meta.copy_from_slice(&bytes[64..]);
        Ok(partial)
    }

    /// Assemble a partial certificate
    pub fn new(
        signature: &[u8; 64],
        date: CompressedDate,
        signer_id: u16,
        template_id: u8,
        source: SerialSource,
    ) -> Self {
        let mut meta = [0u8; 8];
        meta[Self::DATE..Self::SIGNER_ID].copy_from_slice(&date.to_bytes());
        meta[Self::SIGNER_ID..Self::TEMPLATE].copy_from_slice(&signer_id.to_be_bytes());
        meta[Self::TEMPLATE] = template_id << 4;
        meta[Self::SOURCE] = source.code() << 4;
        Self {
            signature: *signature,
            meta,
        }
    }

    /// Raw signature, R ‖ S
    pub const fn signature(&self) -> &[u8; 64] {
        &self.signature
    }

    /// Replace the signature, as a CA does after signing the rebuilt TBS
    pub fn set_signature(&mut self, signature: &[u8; 64]) {
        self.signature = *signature;
    }

    /// Packed dates
    pub const fn date(&self) -> CompressedDate {
        CompressedDate::from_bytes([self.meta[0], self.meta[1], self.meta[2]])
    }

    /// The packed date bytes, as hashed into the serial number
    pub fn date_bytes(&self) -> &[u8] {
        &self.meta[Self::DATE..Self::SIGNER_ID]
    }

    /// Identifier of the signing CA
    pub const fn signer_id(&self) -> u16 {
        u16::from_be_bytes([self.meta[3], self.meta[4]])
    }

    /// Template the certificate is rebuilt from
    pub const fn template_id(&self) -> u8 {
        self.meta[Self::TEMPLATE] >> 4
    }

    /// Position in the certificate chain
    pub const fn chain_id(&self) -> u8 {
        self.meta[Self::TEMPLATE] & 0x0F
    }

    /// How the serial number is derived
    pub const fn serial_source(&self) -> Result<SerialSource> {
        SerialSource::from_code(self.meta[Self::SOURCE] >> 4)
    }

    /// Format version
    pub const fn format_version(&self) -> u8 {
        self.meta[Self::SOURCE] & 0x0F
    }

    /// Stored bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..64].copy_from_slice(&self.signature);
        out[64..].copy_from_slice(&self.meta);
        out
    }
}

impl std::fmt::Debug for PartialCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialCertificate")
            .field("date", &self.date())
            .field("signer_id", &format_args!("{:04X}", self.signer_id()))
            .field("template_id", &self.template_id())
            .field("chain_id", &self.chain_id())
            .field("serial_source", &self.serial_source())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    fn golden() -> [u8; 72] {
        let mut bytes = [0u8; 72];
        bytes[..64].copy_from_slice(&[0xAB; 64]);
        bytes[64..].copy_from_slice(&hex!("8a3154 3a1f 10 a0 00"));
        bytes
    }

    #[test]
    fn test_parse_fields() {
        let partial = PartialCertificate::parse(&golden()).unwrap();
        assert_eq!(partial.signature(), &[0xAB; 64]);
        assert_eq!(partial.date().year(), 17);
        assert_eq!(partial.date_bytes(), &hex!("8a3154"));
        assert_eq!(partial.signer_id(), 0x3A1F);
        assert_eq!(partial.template_id(), 1);
        assert_eq!(partial.chain_id(), 0);
        assert_eq!(partial.serial_source(), Ok(SerialSource::PublicKeyHash));
        assert_eq!(partial.format_version(), 0);
    }

    #[test]
    fn test_new_matches_stored_layout() {
        let partial = PartialCertificate::new(
            &[0xAB; 64],
            CompressedDate::from_bytes(hex!("8a3154")),
            0x3A1F,
            1,
            SerialSource::PublicKeyHash,
        );
        assert_eq!(partial.to_bytes(), golden());
    }

    #[test]
    fn test_wrong_size() {
        assert_eq!(
            PartialCertificate::parse(&[0u8; 64]),
            Err(Error::InvalidLength {
                expected: 72,
                found: 64
            })
        );
    }

    #[test]
    fn test_unknown_serial_source() {
        let mut bytes = golden();
        bytes[70] = 0x30;
        let partial = PartialCertificate::parse(&bytes).unwrap();
        assert_eq!(partial.serial_source(), Err(Error::UnknownSerialSource(3)));
    }
}
