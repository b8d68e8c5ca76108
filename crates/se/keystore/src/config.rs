//! Configuration of the key material manager

use meterid_protocol::{METER_CATALOGUE, SlotCatalogue, SlotName};
use zeroize::Zeroizing;

use crate::record::KEY_LEN;

/// Factory default value of a managed slot
#[derive(Clone)]
pub struct FactoryKey {
    /// Slot
    pub name: SlotName,
    /// Value seeded when no authoritative copy survives
    pub value: Zeroizing<[u8; KEY_LEN]>,
}

impl std::fmt::Debug for FactoryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryKey").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Key store configuration
#[derive(Debug, Clone)]
pub struct KeyStoreConfig {
    /// Slot layout of the device
    pub catalogue: &'static SlotCatalogue,

    /// Managed slots with their factory defaults, in storage order
    pub defaults: Vec<FactoryKey>,

    /// Rotation attempts before a transient failure is surfaced
    pub rotation_attempts: u32,

    /// Offset of the first record in the storage region
    pub base_offset: usize,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            catalogue: &METER_CATALOGUE,
            defaults: Vec::new(),
            rotation_attempts: 3,
            base_offset: 0,
        }
    }
}

impl KeyStoreConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Manage `name`, seeding it with `value` when needed
    pub fn with_default(mut self, name: SlotName, value: [u8; KEY_LEN]) -> Self {
        self.defaults.push(FactoryKey {
            name,
            value: Zeroizing::new(value),
        });
        self
    }

    /// Set the number of rotation attempts
    pub const fn with_rotation_attempts(mut self, rotation_attempts: u32) -> Self {
        self.rotation_attempts = rotation_attempts;
        self
    }

    /// Set where the records start
    pub const fn with_base_offset(mut self, base_offset: usize) -> Self {
        self.base_offset = base_offset;
        self
    }

    /// Use a different slot catalogue
    pub const fn with_catalogue(mut self, catalogue: &'static SlotCatalogue) -> Self {
        self.catalogue = catalogue;
        self
    }
}
