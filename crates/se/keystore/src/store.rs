//! The key material manager
//!
//! Every managed slot has exactly one authoritative source at any time: the
//! persisted copy when its CRC holds, otherwise the factory default, which
//! is then persisted. Rotation goes through the staging record:
//!
//! 1. stage the candidate with an invalidated CRC
//! 2. write the device slot
//! 3. validate the staging CRC
//! 4. promote the staging copy to authoritative
//!
//! A crash before step 3 leaves the authoritative copy untouched; a crash
//! between 3 and 4 is finished by the next startup.

use meterid_protocol::{Access, Device, KeyRef, Session, SlotName, SlotSpec, Transport};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use crate::config::{FactoryKey, KeyStoreConfig};
use crate::error::{Error, Result, ResultExt};
use crate::record::{KEY_LEN, KeyRecord, RecordKind, RecordLocation, SLOT_STRIDE, Validity, invalidated_crc};
use crate::seal;
use crate::storage::Storage;

/// Where a slot's authoritative value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum KeySource {
    /// The persisted copy was intact
    #[display("persisted")]
    Persisted,
    /// The persisted copy was blank or torn and the default was seeded
    #[display("factory default")]
    FactoryDefault,
}

/// Lifecycle of a managed slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum SlotState {
    /// Not examined yet
    #[display("unknown")]
    Unknown,
    /// Authoritative copy established
    #[display("validated ({_0})")]
    Validated(KeySource),
    /// Handed out to a protocol operation
    #[display("in use ({_0})")]
    InUse(KeySource),
    /// A rotation staged a candidate but never confirmed the device write
    #[display("rotation pending")]
    RotationPending,
}

#[derive(Debug)]
struct ManagedSlot {
    spec: SlotSpec,
    location: RecordLocation,
    default: FactoryKey,
    source: KeySource,
    state: SlotState,
    key: Zeroizing<[u8; KEY_LEN]>,
}

#[derive(Debug)]
struct Inner<S> {
    storage: S,
    slots: Vec<ManagedSlot>,
}

/// Persisted key copies and crash-safe rotation
#[derive(Debug)]
pub struct KeyStore<S> {
    inner: Mutex<Inner<S>>,
    config: KeyStoreConfig,
}

impl<S: Storage> KeyStore<S> {
    /// Validate or seed every managed slot and finish rotations that
    /// confirmed their device write before a crash
    #[instrument(level = "debug", skip_all, fields(slots = config.defaults.len()))]
    pub fn open(storage: S, config: KeyStoreConfig) -> Result<Self> {
        let needed = config.base_offset + config.defaults.len() * SLOT_STRIDE;
        if storage.size() < needed {
            return Err(Error::OutOfBounds {
                offset: config.base_offset,
                len: config.defaults.len() * SLOT_STRIDE,
                size: storage.size(),
            });
        }

        let mut slots = Vec::with_capacity(config.defaults.len());
        for (index, default) in config.defaults.iter().enumerate() {
            let spec = *config.catalogue.get(default.name);
            check_manageable(&spec)?;
            if slots.iter().any(|s: &ManagedSlot| s.spec.name == spec.name) {
                return Err(Error::Unmanageable {
                    slot: spec.name,
                    reason: "listed twice",
                });
            }
            slots.push(ManagedSlot {
                spec,
                location: RecordLocation::new(config.base_offset, index),
                default: default.clone(),
                source: KeySource::FactoryDefault,
                state: SlotState::Unknown,
                key: default.value.clone(),
            });
        }

        let mut inner = Inner { storage, slots };
        for index in 0..inner.slots.len() {
            inner.startup(index)?;
        }
        Ok(Self {
            inner: Mutex::new(inner),
            config,
        })
    }

    /// Configuration
    pub const fn config(&self) -> &KeyStoreConfig {
        &self.config
    }

    /// State of a managed slot
    pub fn state(&self, name: SlotName) -> Result<SlotState> {
        let inner = self.inner.lock();
        Ok(inner.slots[inner.index(name)?].state)
    }

    /// States of all managed slots, in storage order
    pub fn states(&self) -> Vec<(SlotName, SlotState)> {
        self.inner
            .lock()
            .slots
            .iter()
            .map(|slot| (slot.spec.name, slot.state))
            .collect()
    }

    /// Whether the persisted copy of a slot is unset: its CRC does not match
    /// its value. Only used to decide on seeding, never as a security check.
    pub fn is_blank(&self, name: SlotName) -> Result<bool> {
        let inner = self.inner.lock();
        let slot = &inner.slots[inner.index(name)?];
        Ok(!slot
            .location
            .load(&inner.storage, RecordKind::Authoritative)?
            .is_valid())
    }

    /// Authoritative value of a slot
    pub fn key(&self, name: SlotName) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let mut inner = self.inner.lock();
        let index = inner.index(name)?;
        let slot = &mut inner.slots[index];
        slot.mark_in_use();
        Ok(slot.key.clone())
    }

    /// Prove to the device that the authoritative copy of a slot is the value
    /// it holds
    pub fn authorize<T: Transport>(
        &self,
        device: &mut Device<T>,
        session: &mut Session,
        name: SlotName,
    ) -> Result<bool> {
        let mut inner = self.inner.lock();
        let index = inner.index(name)?;
        let slot = &mut inner.slots[index];
        slot.mark_in_use();
        device
            .key_authorization(session, KeyRef::new(slot.spec.slot, &slot.key))
            .map_err(Error::from)
            .context(format!("authorizing {name}"))
    }

    /// Read a slot back from the device through its encrypted read policy
    pub fn read_device<T: Transport>(
        &self,
        device: &mut Device<T>,
        session: &mut Session,
        name: SlotName,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let inner = self.inner.lock();
        let spec = inner.slots[inner.index(name)?].spec;
        let authority = match spec.read {
            Access::Encrypted(key_slot) => Some(inner.authority(key_slot)?),
            _ => None,
        };
        let authority = authority.as_ref().map(|(slot, key)| KeyRef::new(*slot, key));
        Ok(device.read(session, spec.slot, spec.size, authority)?)
    }

    /// Replace a slot's key on the device and in storage.
    ///
    /// Runs under the store lock, so no reader sees the slot between
    /// staging and promotion. Transient device failures restart the whole
    /// sequence on a fresh session, up to the configured attempts.
    #[instrument(level = "info", skip(self, device, session, value))]
    pub fn replace<T: Transport>(
        &self,
        device: &mut Device<T>,
        session: &mut Session,
        name: SlotName,
        value: &[u8; KEY_LEN],
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let index = inner.index(name)?;
        let attempts = self.config.rotation_attempts.max(1);

        let mut attempt = 1;
        loop {
            match inner.rotate_once(index, device, session, value) {
                Ok(()) => {
                    info!(attempt, "key rotated");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(attempt, error = %e, "rotation interrupted, retrying");
                    *session = device.open_session()?;
                }
                Err(e) => return Err(e),
            }
            attempt += 1;
        }
    }

    /// Finish a rotation interrupted before its device write was confirmed,
    /// using the staged candidate
    #[instrument(level = "info", skip(self, device, session))]
    pub fn resume_rotation<T: Transport>(
        &self,
        device: &mut Device<T>,
        session: &mut Session,
        name: SlotName,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let index = inner.index(name)?;
        let slot = &inner.slots[index];
        if slot.state != SlotState::RotationPending {
            return Err(Error::NoPendingRotation(name));
        }
        let staged = slot.location.load(&inner.storage, RecordKind::Staging)?;
        if staged.validity() != Validity::Invalidated {
            return Err(Error::NoPendingRotation(name));
        }
        let value = Zeroizing::new(*staged.value());

        match inner.write_device(index, device, session, &value) {
            Ok(()) => {}
            // A slot that authorizes its own writes may already hold the
            // candidate, in which case only the candidate opens it
            Err(e)
                if matches!(e.root(), Error::Protocol(p) if !p.is_retryable())
                    && inner.self_authorized(index) =>
            {
                debug!(error = %e, "retrying with the staged value as authority");
                *session = device.open_session()?;
                let spec = inner.slots[index].spec;
                device.write(session, spec.slot, &value[..], Some(KeyRef::new(spec.slot, &value)))?;
            }
            Err(e) => return Err(e),
        }
        inner.commit(index, &value)?;
        info!("interrupted rotation completed");
        Ok(())
    }

    /// Seal a password for local caching under a managed slot's key
    pub fn seal_password(&self, name: SlotName, password: &[u8]) -> Result<Vec<u8>> {
        seal::seal(&*self.key(name)?, password)
    }

    /// Open a password sealed with [`Self::seal_password`]
    pub fn open_password(&self, name: SlotName, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        seal::open(&*self.key(name)?, sealed)
    }
}

impl ManagedSlot {
    const fn mark_in_use(&mut self) {
        if let SlotState::Validated(source) = self.state {
            self.state = SlotState::InUse(source);
        }
    }
}

fn check_manageable(spec: &SlotSpec) -> Result<()> {
    if spec.size != KEY_LEN {
        return Err(Error::Unmanageable {
            slot: spec.name,
            reason: "not a 32-byte key",
        });
    }
    if !matches!(spec.write, Access::Encrypted(_)) {
        return Err(Error::Unmanageable {
            slot: spec.name,
            reason: "writes are not MAC protected",
        });
    }
    Ok(())
}

impl<S: Storage> Inner<S> {
    fn index(&self, name: SlotName) -> Result<usize> {
        self.slots
            .iter()
            .position(|slot| slot.spec.name == name)
            .ok_or(Error::NotManaged(name))
    }

    /// Key proving authority over `key_slot`, from its managed copy
    fn authority(&self, key_slot: meterid_protocol::Slot) -> Result<(meterid_protocol::Slot, Zeroizing<[u8; KEY_LEN]>)> {
        self.slots
            .iter()
            .find(|slot| slot.spec.slot == key_slot)
            .map(|slot| (key_slot, slot.key.clone()))
            .ok_or(Error::Protocol(meterid_protocol::Error::Policy(
                "authorizing key is not managed",
            )))
    }

    fn self_authorized(&self, index: usize) -> bool {
        let spec = &self.slots[index].spec;
        spec.write == Access::Encrypted(spec.slot)
    }

    fn startup(&mut self, index: usize) -> Result<()> {
        let slot = &self.slots[index];
        let name = slot.spec.name;
        let location = slot.location;
        let authoritative = location.load(&self.storage, RecordKind::Authoritative)?;
        let staging = location.load(&self.storage, RecordKind::Staging)?;

        let source = if authoritative.is_valid() {
            if staging.is_valid() && staging.value() != authoritative.value() {
                // The device write was confirmed, promotion was not
                location.store(&mut self.storage, RecordKind::Authoritative, &staging)?;
                self.slots[index].key = Zeroizing::new(*staging.value());
                info!(slot = %name, "promoted confirmed rotation");
            } else {
                self.slots[index].key = Zeroizing::new(*authoritative.value());
            }
            KeySource::Persisted
        } else if staging.is_valid() {
            location.store(&mut self.storage, RecordKind::Authoritative, &staging)?;
            self.slots[index].key = Zeroizing::new(*staging.value());
            info!(slot = %name, "promoted confirmed rotation over torn copy");
            KeySource::Persisted
        } else {
            let seeded = KeyRecord::valid(&self.slots[index].default.value);
            location.store(&mut self.storage, RecordKind::Authoritative, &seeded)?;
            self.slots[index].key = Zeroizing::new(*seeded.value());
            warn!(slot = %name, "persisted copy blank, seeded factory default");
            KeySource::FactoryDefault
        };

        let slot = &mut self.slots[index];
        slot.source = source;
        slot.state = if staging.validity() == Validity::Invalidated {
            warn!(slot = %name, "rotation was interrupted");
            SlotState::RotationPending
        } else {
            SlotState::Validated(source)
        };
        debug!(slot = %name, state = %slot.state, "slot validated");
        Ok(())
    }

    fn rotate_once<T: Transport>(
        &mut self,
        index: usize,
        device: &mut Device<T>,
        session: &mut Session,
        value: &[u8; KEY_LEN],
    ) -> Result<()> {
        self.stage(index, value)?;
        self.write_device(index, device, session, value)?;
        self.commit(index, value)
    }

    /// Step 1: CRC invalidated first, then the candidate value
    fn stage(&mut self, index: usize, value: &[u8; KEY_LEN]) -> Result<()> {
        let location = self.slots[index].location;
        location.store_crc(&mut self.storage, RecordKind::Staging, invalidated_crc(value))?;
        self.slots[index].state = SlotState::RotationPending;
        location.store_value(&mut self.storage, RecordKind::Staging, value)
    }

    /// Step 2: encrypted, MAC-authorized write of the device slot
    fn write_device<T: Transport>(
        &self,
        index: usize,
        device: &mut Device<T>,
        session: &mut Session,
        value: &[u8; KEY_LEN],
    ) -> Result<()> {
        let spec = self.slots[index].spec;
        let Access::Encrypted(key_slot) = spec.write else {
            return Err(Error::Unmanageable {
                slot: spec.name,
                reason: "writes are not MAC protected",
            });
        };
        let (authority_slot, authority_key) = self.authority(key_slot)?;
        device
            .write(
                session,
                spec.slot,
                value,
                Some(KeyRef::new(authority_slot, &authority_key)),
            )
            .map_err(Error::from)
            .context(format!("writing {} to the device", spec.name))
    }

    /// Steps 3 and 4: validate the staging CRC, then promote
    fn commit(&mut self, index: usize, value: &[u8; KEY_LEN]) -> Result<()> {
        let location = self.slots[index].location;
        let record = KeyRecord::valid(value);
        location.store_crc(&mut self.storage, RecordKind::Staging, record.crc())?;
        location.store(&mut self.storage, RecordKind::Authoritative, &record)?;

        let slot = &mut self.slots[index];
        slot.key = Zeroizing::new(*value);
        slot.source = KeySource::Persisted;
        slot.state = SlotState::Validated(KeySource::Persisted);
        Ok(())
    }
}
