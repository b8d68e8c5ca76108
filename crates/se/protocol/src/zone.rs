//! Zones, addressing, and the configuration zone layout

use crate::error::{Error, Result};
use crate::slot::{SLOT_COUNT, Slot, SlotCatalogue};
use crate::types::SerialNumber;

/// Size of the configuration zone
pub const CONFIG_ZONE_SIZE: usize = 128;

const SERIAL_LOW: std::ops::Range<usize> = 0..4;
const SERIAL_HIGH: std::ops::Range<usize> = 8..13;
const REVISION: std::ops::Range<usize> = 4..8;
const SLOT_CONFIG_OFFSET: usize = 20;
const KEY_CONFIG_OFFSET: usize = 96;
const LOCK_VALUE: usize = 86;
const LOCK_CONFIG: usize = 87;
const LOCKED: u8 = 0x00;

/// Device memory zones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    /// Configuration zone
    Config,
    /// One-time-programmable zone
    Otp,
    /// Data slots
    Data,
}

impl Zone {
    /// Zone selector as carried in param1
    pub const fn code(self) -> u8 {
        match self {
            Self::Config => 0x00,
            Self::Otp => 0x01,
            Self::Data => 0x02,
        }
    }

    /// Decode the zone bits of param1
    pub const fn from_param(param1: u8) -> Option<Self> {
        match param1 & 0x03 {
            0x00 => Some(Self::Config),
            0x01 => Some(Self::Otp),
            0x02 => Some(Self::Data),
            _ => None,
        }
    }
}

/// Address of a 32-byte block inside a data slot
pub const fn data_address(slot: Slot, block: u8) -> u16 {
    ((slot.id() as u16) << 3) | ((block as u16) << 8)
}

/// Split a data zone address into slot index and block
pub const fn split_data_address(address: u16) -> (u8, u8) {
    (((address >> 3) & 0x0F) as u8, (address >> 8) as u8)
}

/// Address of a 32-byte block of the configuration zone
pub const fn config_address(block: u8) -> u16 {
    (block as u16) << 3
}

/// The 128-byte configuration zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigZone([u8; CONFIG_ZONE_SIZE]);

impl ConfigZone {
    /// Parse a configuration zone dump
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; CONFIG_ZONE_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::InvalidResponse("configuration zone must be 128 bytes"))?;
        Ok(Self(bytes))
    }

    /// A locked configuration zone carrying the words a catalogue expects
    pub fn for_catalogue(catalogue: &SlotCatalogue, serial: &SerialNumber) -> Self {
        let mut zone = Self([0u8; CONFIG_ZONE_SIZE]);
        let sn = serial.as_bytes();
        zone.0[SERIAL_LOW].copy_from_slice(&sn[..4]);
        zone.0[REVISION].copy_from_slice(&[0x00, 0x00, 0x50, 0x00]);
        zone.0[SERIAL_HIGH].copy_from_slice(&sn[4..]);
        zone.0[LOCK_VALUE] = LOCKED;
        zone.0[LOCK_CONFIG] = LOCKED;
        for spec in catalogue.iter() {
            zone.set_slot_config(spec.slot, spec.slot_config());
            zone.set_key_config(spec.slot, spec.key_config());
        }
        zone
    }

    /// Raw bytes
    pub const fn as_bytes(&self) -> &[u8; CONFIG_ZONE_SIZE] {
        &self.0
    }

    /// The 32-byte block at `block`
    pub fn block(&self, block: u8) -> Option<&[u8]> {
        let start = block as usize * 32;
        self.0.get(start..start + 32)
    }

    /// Serial number, SN[0..4] at bytes 0..4 and SN[4..9] at bytes 8..13
    pub fn serial(&self) -> SerialNumber {
        let mut sn = [0u8; 9];
        sn[..4].copy_from_slice(&self.0[SERIAL_LOW]);
        sn[4..].copy_from_slice(&self.0[SERIAL_HIGH]);
        SerialNumber::new(sn)
    }

    /// Whether data and configuration zones are locked
    pub const fn is_locked(&self) -> bool {
        self.0[LOCK_VALUE] == LOCKED && self.0[LOCK_CONFIG] == LOCKED
    }

    /// SlotConfig word of a slot
    pub const fn slot_config(&self, slot: Slot) -> u16 {
        self.word(SLOT_CONFIG_OFFSET, slot)
    }

    /// KeyConfig word of a slot
    pub const fn key_config(&self, slot: Slot) -> u16 {
        self.word(KEY_CONFIG_OFFSET, slot)
    }

    /// Overwrite the SlotConfig word of a slot
    pub fn set_slot_config(&mut self, slot: Slot, word: u16) {
        self.set_word(SLOT_CONFIG_OFFSET, slot, word);
    }

    /// Overwrite the KeyConfig word of a slot
    pub fn set_key_config(&mut self, slot: Slot, word: u16) {
        self.set_word(KEY_CONFIG_OFFSET, slot, word);
    }

    const fn word(&self, base: usize, slot: Slot) -> u16 {
        let at = base + 2 * slot.id() as usize;
        u16::from_le_bytes([self.0[at], self.0[at + 1]])
    }

    fn set_word(&mut self, base: usize, slot: Slot, word: u16) {
        let at = base + 2 * slot.id() as usize;
        self.0[at..at + 2].copy_from_slice(&word.to_le_bytes());
    }
}

const _: () = assert!(SLOT_CONFIG_OFFSET + 2 * SLOT_COUNT as usize <= KEY_CONFIG_OFFSET);

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::slot::METER_CATALOGUE;

    #[test]
    fn test_addresses() {
        let slot = |id| Slot::new(id).unwrap();
        assert_eq!(data_address(slot(3), 0), 0x0018);
        assert_eq!(data_address(slot(8), 12), 0x0C40);
        assert_eq!(split_data_address(0x0C40), (8, 12));
        assert_eq!(config_address(3), 0x0018);
    }

    #[test]
    fn test_serial_layout() {
        let serial = SerialNumber::new(hex!("0123 4567 89ab cdef ee"));
        let zone = ConfigZone::for_catalogue(&METER_CATALOGUE, &serial);

        assert_eq!(&zone.as_bytes()[..4], &hex!("01234567"));
        assert_eq!(&zone.as_bytes()[8..13], &hex!("89abcdefee"));
        assert_eq!(zone.serial(), serial);
        assert!(zone.is_locked());
        assert_eq!(ConfigZone::from_bytes(zone.as_bytes()).unwrap(), zone);
    }

    #[test]
    fn test_words_are_little_endian() {
        let zone = ConfigZone::for_catalogue(&METER_CATALOGUE, &SerialNumber::default());
        // Slot 0 SlotConfig 0x8080, KeyConfig 0x0193
        assert_eq!(&zone.as_bytes()[20..22], &hex!("8080"));
        assert_eq!(&zone.as_bytes()[96..98], &hex!("9301"));
    }

    #[test]
    fn test_rejects_short_dump() {
        assert!(ConfigZone::from_bytes(&[0u8; 96]).is_err());
    }
}
