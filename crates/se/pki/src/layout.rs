//! Layout of the certificate slot
//!
//! | bytes   | content                              |
//! |---------|--------------------------------------|
//! | 0-71    | signer partial certificate           |
//! | 72-143  | device partial certificate           |
//! | 144-159 | device identifier (EUI-64, hex ASCII)|

use meterid_cert::{PartialCertificate, SUBJECT_SERIAL_LEN};

use crate::error::{Error, Result};

/// Bytes of the certificate slot in use
pub const CERTIFICATE_SLOT_LEN: usize = 2 * PartialCertificate::SIZE + SUBJECT_SERIAL_LEN;

const DEVICE_PARTIAL: usize = PartialCertificate::SIZE;
const SUBJECT_SERIAL: usize = 2 * PartialCertificate::SIZE;

/// Parsed certificate slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSlot {
    /// Signer partial certificate
    pub signer: PartialCertificate,
    /// Device partial certificate
    pub device: PartialCertificate,
    /// Device identifier
    pub subject_serial: [u8; SUBJECT_SERIAL_LEN],
}

impl CertificateSlot {
    /// Parse the slot contents; trailing bytes are ignored
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let Some(bytes) = bytes.get(..CERTIFICATE_SLOT_LEN) else {
            return Err(Error::MalformedSlot("certificate slot too short"));
        };
        let mut subject_serial = [0u8; SUBJECT_SERIAL_LEN];
        subject_serial.copy_from_slice(&bytes[SUBJECT_SERIAL..]);
        if !subject_serial
            .iter()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(b))
        {
            return Err(Error::MalformedSlot("device identifier is not upper-case hex"));
        }
        Ok(Self {
            signer: PartialCertificate::parse(&bytes[..DEVICE_PARTIAL])?,
            device: PartialCertificate::parse(&bytes[DEVICE_PARTIAL..SUBJECT_SERIAL])?,
            subject_serial,
        })
    }

    /// Slot contents
    pub fn to_bytes(&self) -> [u8; CERTIFICATE_SLOT_LEN] {
        let mut out = [0u8; CERTIFICATE_SLOT_LEN];
        out[..DEVICE_PARTIAL].copy_from_slice(&self.signer.to_bytes());
        out[DEVICE_PARTIAL..SUBJECT_SERIAL].copy_from_slice(&self.device.to_bytes());
        out[SUBJECT_SERIAL..].copy_from_slice(&self.subject_serial);
        out
    }

    /// Device identifier as text
    pub fn identifier(&self) -> &str {
        // Checked to be ASCII hex on parse
        std::str::from_utf8(&self.subject_serial).unwrap_or_default()
    }

    /// Check the identifier starts with the organization prefix
    pub fn check_prefix(&self, prefix: &str) -> Result<()> {
        if self.identifier().starts_with(prefix) {
            Ok(())
        } else {
            Err(Error::IdentityMismatch {
                expected: prefix.to_string(),
                found: self.identifier().to_string(),
            })
        }
    }
}
