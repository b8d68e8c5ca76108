//! Slot catalogue
//!
//! Each slot the system relies on is described once, with its access policy
//! as typed variant data. The configuration words the device must carry are
//! derived from that description and compared against the device at startup.

use std::fmt;

use crate::error::{Error, Result};
use crate::zone::ConfigZone;

/// Number of data zone slots
pub const SLOT_COUNT: u8 = 16;

/// Data zone slot index
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display,
)]
#[display("slot {_0}")]
pub struct Slot(u8);

impl Slot {
    /// Validate a slot index
    pub const fn new(id: u8) -> Option<Self> {
        if id < SLOT_COUNT { Some(Self(id)) } else { None }
    }

    /// Slot index
    pub const fn id(self) -> u8 {
        self.0
    }

    /// Slot index as carried in command parameters
    pub const fn key_id(self) -> u16 {
        self.0 as u16
    }

    /// Device capacity of the slot in bytes
    pub const fn capacity(self) -> usize {
        match self.0 {
            0..=7 => 36,
            8 => 416,
            _ => 72,
        }
    }
}

/// Named slots of the metering endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum SlotName {
    /// ECC private key identifying the device
    DevicePrivateKey,
    /// Secret authorizing use of the device private key
    AuthKey,
    /// Secret protecting encrypted reads and writes
    WriteKey,
    /// Meter application key
    MeterKey,
    /// Network join key
    NetworkKey,
    /// Signer and device partial certificates plus the device identifier
    Certificates,
    /// Root CA public key
    RootPublicKey,
    /// Signer CA public key
    SignerPublicKey,
    /// Device public key
    DevicePublicKey,
}

impl SlotName {
    /// All named slots, in catalogue order
    pub const ALL: [Self; 9] = [
        Self::DevicePrivateKey,
        Self::AuthKey,
        Self::WriteKey,
        Self::MeterKey,
        Self::NetworkKey,
        Self::Certificates,
        Self::RootPublicKey,
        Self::SignerPublicKey,
        Self::DevicePublicKey,
    ];

    const fn index(self) -> usize {
        self as usize
    }
}

/// What a slot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// P-256 private key, optionally gated by a CheckMac on another slot
    EccPrivate {
        /// Slot whose key must be proven before use
        auth: Option<Slot>,
    },
    /// P-256 public key usable by Verify
    EccPublic,
    /// Symmetric secret
    Secret,
    /// Opaque data
    Data,
}

/// Read or write policy of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Never allowed
    Never,
    /// Allowed in the clear
    Clear,
    /// Encrypted with TempKey after a GenDig over the given slot
    Encrypted(Slot),
}

/// Typed description of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSpec {
    /// Name
    pub name: SlotName,
    /// Device slot
    pub slot: Slot,
    /// Bytes used in the slot
    pub size: usize,
    /// Content kind
    pub kind: KeyKind,
    /// Read policy
    pub read: Access,
    /// Write policy
    pub write: Access,
}

const SLOT_CONFIG_IS_SECRET: u16 = 1 << 7;
const SLOT_CONFIG_ENCRYPT_READ: u16 = 1 << 6;
const WRITE_CONFIG_ALWAYS: u16 = 0x0;
const WRITE_CONFIG_ENCRYPT: u16 = 0x4;
const WRITE_CONFIG_NEVER: u16 = 0x8;

const KEY_CONFIG_PRIVATE: u16 = 1 << 0;
const KEY_CONFIG_PUB_INFO: u16 = 1 << 1;
const KEY_CONFIG_REQ_AUTH: u16 = 1 << 7;
const KEY_TYPE_P256: u16 = 4;
const KEY_TYPE_OTHER: u16 = 7;

impl SlotSpec {
    /// Slot that must be authorized before this key is used
    pub const fn requires_authorization(&self) -> Option<Slot> {
        match self.kind {
            KeyKind::EccPrivate { auth } => auth,
            _ => None,
        }
    }

    /// Whether the slot holds a signing key
    pub const fn is_signing_key(&self) -> bool {
        matches!(self.kind, KeyKind::EccPrivate { .. })
    }

    /// Whether the slot holds a key usable by Verify
    pub const fn is_verify_key(&self) -> bool {
        matches!(self.kind, KeyKind::EccPublic)
    }

    /// Number of 32-byte blocks spanned by the used bytes
    pub const fn blocks(&self) -> usize {
        self.size.div_ceil(32)
    }

    /// SlotConfig word: ReadKey (bits 0-3), EncryptRead (6), IsSecret (7),
    /// WriteKey (8-11), WriteConfig (12-15)
    pub const fn slot_config(&self) -> u16 {
        let read = match self.read {
            Access::Clear => 0,
            Access::Never => SLOT_CONFIG_IS_SECRET,
            Access::Encrypted(key) => {
                SLOT_CONFIG_IS_SECRET | SLOT_CONFIG_ENCRYPT_READ | (key.0 as u16 & 0x0F)
            }
        };
        let write = match self.write {
            Access::Clear => WRITE_CONFIG_ALWAYS << 12,
            Access::Never => WRITE_CONFIG_NEVER << 12,
            Access::Encrypted(key) => (WRITE_CONFIG_ENCRYPT << 12) | ((key.0 as u16 & 0x0F) << 8),
        };
        read | write
    }

    /// KeyConfig word: Private (bit 0), PubInfo (1), KeyType (2-4),
    /// ReqAuth (7), AuthKey (8-11)
    pub const fn key_config(&self) -> u16 {
        match self.kind {
            KeyKind::EccPrivate { auth } => {
                let base = KEY_CONFIG_PRIVATE | KEY_CONFIG_PUB_INFO | (KEY_TYPE_P256 << 2);
                match auth {
                    Some(slot) => base | KEY_CONFIG_REQ_AUTH | ((slot.0 as u16 & 0x0F) << 8),
                    None => base,
                }
            }
            KeyKind::EccPublic => KEY_TYPE_P256 << 2,
            KeyKind::Secret | KeyKind::Data => KEY_TYPE_OTHER << 2,
        }
    }
}

/// A slot key value offered as proof of authority
#[derive(Clone, Copy)]
pub struct KeyRef<'a> {
    /// Slot the key belongs to
    pub slot: Slot,
    /// Key value
    pub value: &'a [u8; 32],
}

impl<'a> KeyRef<'a> {
    /// Pair a slot with its key value
    pub const fn new(slot: Slot, value: &'a [u8; 32]) -> Self {
        Self { slot, value }
    }
}

impl fmt::Debug for KeyRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRef")
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

/// Full slot layout, indexed by [`SlotName`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCatalogue {
    specs: [SlotSpec; 9],
}

const fn spec(name: SlotName, slot: u8, size: usize, kind: KeyKind, read: Access, write: Access) -> SlotSpec {
    SlotSpec {
        name,
        slot: Slot(slot),
        size,
        kind,
        read,
        write,
    }
}

const AUTH_KEY: Slot = Slot(1);
const WRITE_KEY: Slot = Slot(2);

/// Slot layout of the metering endpoint
pub static METER_CATALOGUE: SlotCatalogue = SlotCatalogue {
    specs: [
        spec(
            SlotName::DevicePrivateKey,
            0,
            32,
            KeyKind::EccPrivate { auth: Some(AUTH_KEY) },
            Access::Never,
            Access::Never,
        ),
        spec(SlotName::AuthKey, 1, 32, KeyKind::Secret, Access::Never, Access::Encrypted(WRITE_KEY)),
        spec(SlotName::WriteKey, 2, 32, KeyKind::Secret, Access::Never, Access::Encrypted(WRITE_KEY)),
        spec(
            SlotName::MeterKey,
            3,
            32,
            KeyKind::Secret,
            Access::Encrypted(WRITE_KEY),
            Access::Encrypted(WRITE_KEY),
        ),
        spec(
            SlotName::NetworkKey,
            4,
            32,
            KeyKind::Secret,
            Access::Encrypted(WRITE_KEY),
            Access::Encrypted(WRITE_KEY),
        ),
        spec(SlotName::Certificates, 8, 416, KeyKind::Data, Access::Clear, Access::Clear),
        spec(SlotName::RootPublicKey, 9, 64, KeyKind::EccPublic, Access::Clear, Access::Never),
        spec(SlotName::SignerPublicKey, 10, 64, KeyKind::EccPublic, Access::Clear, Access::Never),
        spec(SlotName::DevicePublicKey, 11, 64, KeyKind::EccPublic, Access::Clear, Access::Never),
    ],
};

impl SlotCatalogue {
    /// Build a catalogue; specs must be given in [`SlotName::ALL`] order
    pub fn new(specs: [SlotSpec; 9]) -> Result<Self> {
        for (spec, name) in specs.iter().zip(SlotName::ALL) {
            if spec.name != name {
                return Err(Error::InvalidInput("catalogue entries out of order"));
            }
            if spec.size > spec.slot.capacity() {
                return Err(Error::InvalidInput("slot size exceeds capacity"));
            }
        }
        Ok(Self { specs })
    }

    /// Typed view of a named slot
    pub const fn get(&self, name: SlotName) -> &SlotSpec {
        &self.specs[name.index()]
    }

    /// Typed view of a device slot, if catalogued
    pub fn by_slot(&self, slot: Slot) -> Result<&SlotSpec> {
        self.specs
            .iter()
            .find(|spec| spec.slot == slot)
            .ok_or(Error::UnknownSlot(slot.id()))
    }

    /// Iterate over all specs
    pub fn iter(&self) -> impl Iterator<Item = &SlotSpec> {
        self.specs.iter()
    }

    /// Compare the device configuration zone against the catalogue.
    ///
    /// Any difference is fatal: the policies the host relies on would not be
    /// enforced by the device.
    pub fn check(&self, zone: &ConfigZone) -> Result<()> {
        for spec in &self.specs {
            let found = zone.slot_config(spec.slot);
            if found != spec.slot_config() {
                return Err(Error::Configuration {
                    slot: spec.slot,
                    field: "SlotConfig",
                    expected: spec.slot_config(),
                    found,
                });
            }
            let found = zone.key_config(spec.slot);
            if found != spec.key_config() {
                return Err(Error::Configuration {
                    slot: spec.slot,
                    field: "KeyConfig",
                    expected: spec.key_config(),
                    found,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SerialNumber;

    #[test]
    fn test_catalogue_lookup() {
        let spec = METER_CATALOGUE.get(SlotName::DevicePrivateKey);
        assert_eq!(spec.slot, Slot(0));
        assert!(spec.is_signing_key());
        assert_eq!(spec.requires_authorization(), Some(Slot(1)));

        let spec = METER_CATALOGUE.get(SlotName::Certificates);
        assert_eq!(spec.blocks(), 13);
        assert_eq!(METER_CATALOGUE.by_slot(Slot(10)).unwrap().name, SlotName::SignerPublicKey);
        assert_eq!(METER_CATALOGUE.by_slot(Slot(5)), Err(Error::UnknownSlot(5)));
    }

    #[test]
    fn test_config_words() {
        let private = METER_CATALOGUE.get(SlotName::DevicePrivateKey);
        assert_eq!(private.slot_config(), 0x8080);
        assert_eq!(private.key_config(), 0x0193);

        let meter = METER_CATALOGUE.get(SlotName::MeterKey);
        assert_eq!(meter.slot_config(), 0x42C2);
        assert_eq!(meter.key_config(), 0x001C);

        let root = METER_CATALOGUE.get(SlotName::RootPublicKey);
        assert_eq!(root.slot_config(), 0x8000);
        assert_eq!(root.key_config(), 0x0010);
    }

    #[test]
    fn test_check_detects_mismatch() {
        let serial = SerialNumber::default();
        let mut zone = ConfigZone::for_catalogue(&METER_CATALOGUE, &serial);
        METER_CATALOGUE.check(&zone).unwrap();

        zone.set_slot_config(Slot(3), 0x0000);
        assert_eq!(
            METER_CATALOGUE.check(&zone),
            Err(Error::Configuration {
                slot: Slot(3),
                field: "SlotConfig",
                expected: 0x42C2,
                found: 0x0000,
            })
        );
    }

    #[test]
    fn test_catalogue_order_is_validated() {
        let mut specs = METER_CATALOGUE.specs;
        specs.swap(0, 1);
        assert!(SlotCatalogue::new(specs).is_err());
        assert!(SlotCatalogue::new(METER_CATALOGUE.specs).is_ok());
    }

    #[test]
    fn test_slot_range() {
        assert_eq!(Slot::new(15).map(Slot::id), Some(15));
        assert_eq!(Slot::new(16), None);
        assert_eq!(Slot(8).to_string(), "slot 8");
    }
}
