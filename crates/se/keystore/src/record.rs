//! Persisted key records
//!
//! Each managed slot owns two records in the region: the authoritative copy
//! followed by the staging copy used during rotation. A record is the 32-byte
//! key value followed by its CRC-16, little endian. The CRC is a validity
//! flag, not an integrity check against an attacker.

use meterid_frame::crc16;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::storage::Storage;

/// Key value length
pub const KEY_LEN: usize = 32;

/// Value plus CRC
pub const RECORD_LEN: usize = KEY_LEN + 2;

/// Bytes a managed slot occupies: authoritative and staging records
pub const SLOT_STRIDE: usize = 2 * RECORD_LEN;

/// Which of a slot's two records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// The copy the key store trusts
    Authoritative,
    /// The candidate of a rotation
    Staging,
}

/// How a record's CRC relates to its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// CRC matches the value
    Valid,
    /// CRC is the complement of the value's CRC: a rotation staged this value
    /// and has not confirmed the device write
    Invalidated,
    /// Neither: erased, torn or never written
    Blank,
}

/// A key value and its CRC
#[derive(Clone)]
pub struct KeyRecord {
    value: Zeroizing<[u8; KEY_LEN]>,
    crc: u16,
}

impl KeyRecord {
    /// A record whose CRC matches `value`
    pub fn valid(value: &[u8; KEY_LEN]) -> Self {
        Self {
            value: Zeroizing::new(*value),
            crc: crc16(value),
        }
    }

    /// A record carrying `value` with a CRC no value can match
    pub fn invalidated(value: &[u8; KEY_LEN]) -> Self {
        Self {
            value: Zeroizing::new(*value),
            crc: invalidated_crc(value),
        }
    }

    /// Parse a stored record
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != RECORD_LEN {
            return Err(Error::Storage(format!("record of {} bytes", bytes.len())));
        }
        let mut value = Zeroizing::new([0u8; KEY_LEN]);
        value.copy_from_slice(&bytes[..KEY_LEN]);
        Ok(Self {
            value,
            crc: u16::from_le_bytes([bytes[KEY_LEN], bytes[KEY_LEN + 1]]),
        })
    }

    /// Key value
    pub fn value(&self) -> &[u8; KEY_LEN] {
        &self.value
    }

    /// Stored CRC
    pub const fn crc(&self) -> u16 {
        self.crc
    }

    /// Classify the CRC against the value
    pub fn validity(&self) -> Validity {
        let expected = crc16(&self.value[..]);
        if self.crc == expected {
            Validity::Valid
        } else if self.crc == expected ^ 0xFFFF {
            Validity::Invalidated
        } else {
            Validity::Blank
        }
    }

    /// Whether the record is authoritative
    pub fn is_valid(&self) -> bool {
        self.validity() == Validity::Valid
    }
}

impl std::fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRecord")
            .field("crc", &format_args!("{:#06x}", self.crc))
            .field("validity", &self.validity())
            .finish_non_exhaustive()
    }
}

/// CRC marking a staged, unconfirmed value
pub fn invalidated_crc(value: &[u8; KEY_LEN]) -> u16 {
    crc16(value) ^ 0xFFFF
}

/// Position of one managed slot's records in the region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    base: usize,
}

impl RecordLocation {
    /// Records of the `index`th managed slot, starting at `base_offset`
    pub const fn new(base_offset: usize, index: usize) -> Self {
        Self {
            base: base_offset + index * SLOT_STRIDE,
        }
    }

    /// Offset of a record
    pub const fn offset(&self, kind: RecordKind) -> usize {
        match kind {
            RecordKind::Authoritative => self.base,
            RecordKind::Staging => self.base + RECORD_LEN,
        }
    }

    /// Read a record
    pub fn load<S: Storage + ?Sized>(&self, storage: &S, kind: RecordKind) -> Result<KeyRecord> {
        KeyRecord::from_bytes(&Zeroizing::new(storage.read(self.offset(kind), RECORD_LEN)?))
    }

    /// Write a record value first, then its CRC.
    ///
    /// A crash between the two leaves a CRC that does not match, which the
    /// next startup sees as not authoritative.
    pub fn store<S: Storage + ?Sized>(&self, storage: &mut S, kind: RecordKind, record: &KeyRecord) -> Result<()> {
        self.store_value(storage, kind, record.value())?;
        self.store_crc(storage, kind, record.crc)
    }

    /// Write only the value field
    pub fn store_value<S: Storage + ?Sized>(&self, storage: &mut S, kind: RecordKind, value: &[u8; KEY_LEN]) -> Result<()> {
        storage.write(self.offset(kind), value)
    }

    /// Write only the CRC field
    pub fn store_crc<S: Storage + ?Sized>(&self, storage: &mut S, kind: RecordKind, crc: u16) -> Result<()> {
        storage.write(self.offset(kind) + KEY_LEN, &crc.to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_validity() {
        let key = [0x42; KEY_LEN];
        assert_eq!(KeyRecord::valid(&key).validity(), Validity::Valid);
        assert_eq!(KeyRecord::invalidated(&key).validity(), Validity::Invalidated);

        let mut bytes = [0xFF; RECORD_LEN];
        bytes[..KEY_LEN].copy_from_slice(&key);
        assert_eq!(KeyRecord::from_bytes(&bytes).unwrap().validity(), Validity::Blank);
    }

    #[test]
    fn test_store_and_load() {
        let mut store = MemoryStore::new(3 * SLOT_STRIDE);
        let location = RecordLocation::new(0, 1);
        let record = KeyRecord::valid(&[7; KEY_LEN]);
        location.store(&mut store, RecordKind::Staging, &record).unwrap();

        assert_eq!(location.offset(RecordKind::Staging), SLOT_STRIDE + RECORD_LEN);
        let loaded = location.load(&store, RecordKind::Staging).unwrap();
        assert_eq!(loaded.value(), &[7; KEY_LEN]);
        assert!(loaded.is_valid());
        assert!(!location.load(&store, RecordKind::Authoritative).unwrap().is_valid());
    }

    #[test]
    fn test_torn_write_is_not_authoritative() {
        let mut store = MemoryStore::new(SLOT_STRIDE);
        let location = RecordLocation::new(0, 0);
        location
            .store(&mut store, RecordKind::Authoritative, &KeyRecord::valid(&[1; KEY_LEN]))
            .unwrap();

        // Value lands, CRC does not
        store.fail_after_writes(1);
        assert!(location
            .store(&mut store, RecordKind::Authoritative, &KeyRecord::valid(&[2; KEY_LEN]))
            .is_err());
        let torn = location.load(&store, RecordKind::Authoritative).unwrap();
        assert_eq!(torn.value(), &[2; KEY_LEN]);
        assert!(!torn.is_valid());
    }
}
