//! Protocol engine: the device command set on top of the framing layer
//!
//! Every operation that depends on TempKey takes the [`Session`] mirroring it.
//! When the framing layer had to wake the device to recover the link, that
//! mirror is void: the session is rebound to the new epoch and the operation
//! fails with [`Error::SessionLost`] instead of producing a digest that can
//! never match.

use bytes::Bytes;
use meterid_frame::{Framer, Packet, Response, Status, Transport};
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use crate::config::ProtocolConfig;
use crate::digest::{self, MacMode, MacRequest, OtherData, TempKey, TempKeySource};
use crate::error::{Error, Result, ResultExt};
use crate::opcode::*;
use crate::session::Session;
use crate::slot::{Access, KeyRef, Slot, SlotCatalogue};
use crate::types::{PublicKey, Signature};
use crate::zone::{CONFIG_ZONE_SIZE, ConfigZone, Zone, config_address, data_address};

/// Public key a signature is verified against
#[derive(Debug, Clone, Copy)]
pub enum VerifyKey<'a> {
    /// Key stored in a device slot
    Stored(Slot),
    /// Key supplied by the host
    External(&'a PublicKey),
}

/// A secure element reached through a framed transport
#[derive(Debug)]
pub struct Device<T> {
    framer: Framer<T>,
    config: ProtocolConfig,
}

impl<T: Transport> Device<T> {
    /// Create a device handle over a transport
    pub fn new(transport: T, config: ProtocolConfig) -> Self {
        Self {
            framer: Framer::new(transport, config.retry.clone()),
            config,
        }
    }

    /// Protocol configuration
    pub const fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Slot catalogue the device is checked against
    pub const fn catalogue(&self) -> &'static SlotCatalogue {
        self.config.catalogue
    }

    /// Framing layer
    pub const fn framer(&self) -> &Framer<T> {
        &self.framer
    }

    /// Get a reference to the underlying transport
    pub const fn transport(&self) -> &T {
        self.framer.transport()
    }

    /// Get a mutable reference to the underlying transport
    pub const fn transport_mut(&mut self) -> &mut T {
        self.framer.transport_mut()
    }

    /// Give back the transport
    pub fn into_transport(self) -> T {
        self.framer.into_inner()
    }

    /// Wake the device and start a session bound to the current link epoch
    #[instrument(level = "debug", skip(self))]
    pub fn open_session(&mut self) -> Result<Session> {
        self.framer.wake()?;
        let zone = self.read_config_zone().context("reading configuration zone")?;
        let session = Session::new(zone.serial(), self.framer.epoch());
        info!(serial = %session.serial(), epoch = session.epoch(), "session opened");
        Ok(session)
    }

    /// Put the device to sleep, ending any session
    pub fn sleep(&mut self) -> Result<()> {
        Ok(self.framer.sleep()?)
    }

    /// Read the full configuration zone
    pub fn read_config_zone(&mut self) -> Result<ConfigZone> {
        let mut bytes = Vec::with_capacity(CONFIG_ZONE_SIZE);
        for block in 0..(CONFIG_ZONE_SIZE / BLOCK_SIZE) as u8 {
            bytes.extend_from_slice(&self.read_block(Zone::Config, config_address(block))?);
        }
        ConfigZone::from_bytes(&bytes)
    }

    /// Read the configuration zone and compare it with the slot catalogue.
    ///
    /// A mismatch is a configuration error, never retried.
    #[instrument(level = "debug", skip(self))]
    pub fn check_configuration(&mut self) -> Result<ConfigZone> {
        let zone = self.read_config_zone()?;
        if !zone.is_locked() {
            return Err(Error::Policy("configuration zone is not locked"));
        }
        self.config.catalogue.check(&zone)?;
        debug!("configuration zone matches catalogue");
        Ok(zone)
    }

    /// Establish TempKey from device randomness.
    ///
    /// The host input is twenty zero bytes; TempKey is
    /// `SHA256(RandOut ‖ NumIn ‖ opcode ‖ mode ‖ 0)`.
    #[instrument(level = "debug", skip(self, session))]
    pub fn nonce(&mut self, session: &mut Session, seed_update: bool) -> Result<()> {
        let mode = if seed_update {
            NONCE_MODE_SEED_UPDATE
        } else {
            NONCE_MODE_NO_SEED_UPDATE
        };
        let num_in = [0u8; NONCE_NUM_IN_SIZE];

        session.clear_temp_key();
        let response = self.transact(session, Opcode::Nonce, mode, 0, num_in.to_vec(), false)?;
        let rand_out: [u8; 32] = data_array(&response, "nonce")?;
        session.set_temp_key(digest::nonce_temp_key(&rand_out, &num_in, mode));
        Ok(())
    }

    /// Load a 32-byte value, typically a message digest, straight into TempKey
    #[instrument(level = "debug", skip_all)]
    pub fn nonce_pass_through(&mut self, session: &mut Session, value: &[u8; 32]) -> Result<()> {
        session.clear_temp_key();
        let response = self.transact(
            session,
            Opcode::Nonce,
            NONCE_MODE_PASS_THROUGH,
            0,
            value.to_vec(),
            false,
        )?;
        expect_success(&response, "nonce pass-through")?;
        session.set_temp_key(TempKey::new(*value, TempKeySource::Input));
        Ok(())
    }

    /// Fold a slot key into TempKey, binding it to that slot's authority
    #[instrument(level = "debug", skip_all, fields(slot = %key.slot))]
    pub fn gen_dig(&mut self, session: &mut Session, key: KeyRef<'_>) -> Result<()> {
        let zone = Zone::Data.code();
        let response = self.transact(session, Opcode::GenDig, zone, key.slot.key_id(), Bytes::new(), true)?;
        expect_success(&response, "gendig")?;

        let next = digest::gen_dig(
            session.temp_key()?,
            key.value,
            zone,
            key.slot.key_id(),
            session.serial(),
        );
        session.set_temp_key(next);
        Ok(())
    }

    /// Run MAC on the device and return its response.
    ///
    /// A TempKey used as either block is consumed.
    #[instrument(level = "debug", skip(self, session, challenge))]
    pub fn mac(
        &mut self,
        session: &mut Session,
        mode: MacMode,
        slot: Slot,
        challenge: &[u8; 32],
    ) -> Result<[u8; 32]> {
        let source = if mode.uses_temp_key() {
            Some(session.temp_key()?.source())
        } else {
            None
        };
        let data = if mode.uses_challenge() {
            challenge.to_vec()
        } else {
            Vec::new()
        };

        let response = self.transact(
            session,
            Opcode::Mac,
            mode.mode_byte(source),
            slot.key_id(),
            data,
            mode.uses_temp_key(),
        );
        if mode.uses_temp_key() {
            session.clear_temp_key();
        }
        data_array(&response?, "mac")
    }

    /// Challenge the device and compare its MAC with the host's own computation
    pub fn verify_device_mac(&mut self, session: &mut Session, request: MacRequest<'_>) -> Result<()> {
        let expected = if request.mode.uses_temp_key() {
            request.digest(Some(session.temp_key()?), session.serial())?
        } else {
            request.digest(None, session.serial())?
        };

        let actual = self.mac(session, request.mode, request.slot, request.challenge)?;
        if actual != expected {
            warn!(slot = %request.slot, "device MAC does not match host computation");
            return Err(Error::AuthenticationFailed("device MAC mismatch"));
        }
        Ok(())
    }

    /// Have the device recompute a MAC over TempKey and compare it with `response`.
    ///
    /// Returns `false` on miscompare. TempKey is consumed either way.
    #[instrument(level = "debug", skip_all, fields(slot = %slot))]
    pub fn check_mac(
        &mut self,
        session: &mut Session,
        slot: Slot,
        response: &[u8; 32],
        other_data: &OtherData,
    ) -> Result<bool> {
        let source = session.temp_key()?.source();
        let mode = MacMode::KeyAndTempKey.mode_byte(Some(source));

        let mut data = Vec::with_capacity(CHECKMAC_DATA_SIZE);
        // Client challenge, unused when block 2 is TempKey
        data.extend_from_slice(&[0u8; 32]);
        data.extend_from_slice(response);
        data.extend_from_slice(other_data.as_bytes());

        let reply = self.transact(session, Opcode::CheckMac, mode, slot.key_id(), data, true);
        session.clear_temp_key();
        match reply?.status() {
            Some(Status::Success) => Ok(true),
            Some(Status::Miscompare) => Ok(false),
            _ => Err(Error::InvalidResponse("checkmac")),
        }
    }

    /// Prove knowledge of a slot key to the device.
    ///
    /// Nonce, then the host computes the MAC the device would compute over the
    /// key and TempKey, and CheckMac lets the device confirm it. On success the
    /// device treats the key as authorized until it sleeps.
    #[instrument(level = "debug", skip_all, fields(slot = %key.slot))]
    pub fn key_authorization(&mut self, session: &mut Session, key: KeyRef<'_>) -> Result<bool> {
        self.nonce(session, true)?;
        let temp_key = session.temp_key()?;
        let request = MacRequest {
            mode: MacMode::KeyAndTempKey,
            slot: key.slot,
            key: key.value,
            challenge: &[0u8; 32],
        };
        let mode_byte = request.mode_byte(Some(temp_key));
        let response = request.digest(Some(temp_key), session.serial())?;
        let other_data = OtherData::for_mac(mode_byte, key.slot.key_id());

        let authorized = self.check_mac(session, key.slot, &response, &other_data)?;
        if authorized {
            session.set_authorized(key.slot);
            debug!("key authorized");
        } else {
            warn!("key authorization refused");
        }
        Ok(authorized)
    }

    /// Fetch 32 bytes of device randomness
    pub fn random(&mut self, session: &mut Session, seed_update: bool) -> Result<[u8; 32]> {
        let mode = if seed_update {
            RANDOM_SEED_UPDATE
        } else {
            RANDOM_NO_SEED_UPDATE
        };
        let response = self.transact(session, Opcode::Random, mode, 0, Bytes::new(), false)?;
        let random = data_array(&response, "random")?;
        session.set_last_random(random);
        Ok(random)
    }

    /// Read one 32-byte block in the clear
    pub fn read_block(&mut self, zone: Zone, address: u16) -> Result<[u8; 32]> {
        let packet = Packet::new(Opcode::Read.code(), zone.code() | ZONE_SIZE_32, address)
            .with_execution_time(Opcode::Read.execution_time());
        let reply = self.framer.exchange(&packet)?;
        data_array(&reply.response, "read")
    }

    /// Read `len` bytes of a slot, block by block, following the slot's read policy.
    ///
    /// Encrypted slots need the key named by the policy as `authority`.
    #[instrument(level = "debug", skip(self, session, authority))]
    pub fn read(
        &mut self,
        session: &mut Session,
        slot: Slot,
        len: usize,
        authority: Option<KeyRef<'_>>,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let spec = *self.config.catalogue.by_slot(slot)?;
        if len > spec.size {
            return Err(Error::InvalidInput("read beyond slot size"));
        }
        let authority = match spec.read {
            Access::Never => return Err(Error::Policy("slot is not readable")),
            Access::Clear => None,
            Access::Encrypted(key_slot) => Some(require_authority(authority, key_slot)?),
        };

        let mut out = Zeroizing::new(Vec::with_capacity(len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE));
        for block in 0..len.div_ceil(BLOCK_SIZE) {
            let block = block as u8;
            let data = match authority {
                Some(key) => Zeroizing::new(self.read_encrypted(session, slot, block, key)?),
                None => Zeroizing::new(self.read_clear(session, slot, block)?),
            };
            out.extend_from_slice(&data[..]);
        }
        out.truncate(len);
        Ok(out)
    }

    /// Read a block of an encrypt-read slot: Nonce, GenDig over the read key,
    /// Read, then strip the TempKey mask
    pub fn read_encrypted(
        &mut self,
        session: &mut Session,
        slot: Slot,
        block: u8,
        authority: KeyRef<'_>,
    ) -> Result<[u8; 32]> {
        self.nonce(session, true)?;
        self.gen_dig(session, authority)?;

        let response = self.transact(
            session,
            Opcode::Read,
            Zone::Data.code() | ZONE_SIZE_32,
            data_address(slot, block),
            Bytes::new(),
            true,
        );
        let temp_key = session.take_temp_key()?;
        let cipher: [u8; 32] = data_array(&response?, "encrypted read")?;
        Ok(digest::xor_with_temp_key(&cipher, &temp_key))
    }

    /// Write `data` to a slot, block by block, following the slot's write policy.
    ///
    /// The last block is zero padded. Encrypted slots need the key named by the
    /// policy as `authority`.
    #[instrument(level = "debug", skip(self, session, data, authority), fields(len = data.len()))]
    pub fn write(
        &mut self,
        session: &mut Session,
        slot: Slot,
        data: &[u8],
        authority: Option<KeyRef<'_>>,
    ) -> Result<()> {
        let spec = *self.config.catalogue.by_slot(slot)?;
        if data.len() > spec.size {
            return Err(Error::InvalidInput("write beyond slot size"));
        }
        let authority = match spec.write {
            Access::Never => return Err(Error::Policy("slot is not writable")),
            Access::Clear => None,
            Access::Encrypted(key_slot) => Some(require_authority(authority, key_slot)?),
        };

        for (index, chunk) in data.chunks(BLOCK_SIZE).enumerate() {
            let mut block = Zeroizing::new([0u8; BLOCK_SIZE]);
            block[..chunk.len()].copy_from_slice(chunk);
            match authority {
                Some(key) => self.write_encrypted(session, slot, index as u8, &block, key)?,
                None => self.write_clear(session, slot, index as u8, &block)?,
            }
        }
        Ok(())
    }

    /// Write a block of an encrypt-write slot: Nonce, GenDig over the write key,
    /// then Write with the block masked by TempKey and the write MAC appended
    pub fn write_encrypted(
        &mut self,
        session: &mut Session,
        slot: Slot,
        block: u8,
        plaintext: &[u8; 32],
        authority: KeyRef<'_>,
    ) -> Result<()> {
        self.nonce(session, true)?;
        self.gen_dig(session, authority)?;
        let temp_key = session.temp_key()?;

        let param1 = Zone::Data.code() | ZONE_SIZE_32;
        let address = data_address(slot, block);
        let cipher = digest::xor_with_temp_key(plaintext, temp_key);
        let mac = digest::write_mac(temp_key, param1, address, plaintext, session.serial());

        let mut data = Vec::with_capacity(2 * BLOCK_SIZE);
        data.extend_from_slice(&cipher);
        data.extend_from_slice(&mac);

        let response = self.transact(session, Opcode::Write, param1, address, data, true);
        session.clear_temp_key();
        expect_success(&response?, "encrypted write")
    }

    /// Sign a message with a private key slot.
    ///
    /// Authorizes the slot's authority key when its policy asks for one,
    /// refreshes device randomness, loads the digest through a pass-through
    /// Nonce and signs it.
    #[instrument(level = "debug", skip(self, session, authority, message))]
    pub fn sign(
        &mut self,
        session: &mut Session,
        slot: Slot,
        authority: Option<KeyRef<'_>>,
        message: &[u8],
        already_hashed: bool,
    ) -> Result<Signature> {
        let spec = *self.config.catalogue.by_slot(slot)?;
        if !spec.is_signing_key() {
            return Err(Error::Policy("slot does not hold a signing key"));
        }
        let digest = message_digest(message, already_hashed)?;

        if let Some(auth_slot) = spec.requires_authorization() {
            let key = require_authority(authority, auth_slot)?;
            if !self.key_authorization(session, key).context("authorizing signing key")? {
                return Err(Error::AuthenticationFailed("signing key authorization refused"));
            }
        }
        self.random(session, true)?;

        for attempt in 1..=self.config.max_sign_attempts {
            self.nonce_pass_through(session, &digest)?;
            let response = self.transact(
                session,
                Opcode::Sign,
                SIGN_MODE_EXTERNAL,
                slot.key_id(),
                Bytes::new(),
                true,
            );
            session.clear_temp_key();

            match response? {
                Response::Data(bytes) if bytes.len() == 64 => return Signature::from_slice(&bytes),
                // Device quirk: Sign sometimes answers with a truncated signature.
                // The digest must be loaded again before the next attempt.
                Response::Data(bytes) => {
                    warn!(attempt, len = bytes.len(), "short signature from device, retrying")
                }
                Response::Status(_) => return Err(Error::InvalidResponse("sign returned a status")),
            }
        }

        Err(Error::SignatureIncomplete(self.config.max_sign_attempts))
    }

    /// Verify a signature on the device.
    ///
    /// Returns `false` when the device rejects the signature. When it accepts,
    /// a MAC over TempKey with a zero challenge must match the host's
    /// computation, proving the device verified the digest the host loaded;
    /// a mismatch is an authentication failure.
    #[instrument(level = "debug", skip(self, session, message, signature))]
    pub fn verify(
        &mut self,
        session: &mut Session,
        key: VerifyKey<'_>,
        message: &[u8],
        already_hashed: bool,
        signature: &Signature,
    ) -> Result<bool> {
        let digest = message_digest(message, already_hashed)?;
        let (mode, param2, data, mac_slot) = match key {
            VerifyKey::Stored(slot) => {
                if !self.config.catalogue.by_slot(slot)?.is_verify_key() {
                    return Err(Error::Policy("slot does not hold a public key"));
                }
                (VERIFY_MODE_STORED, slot.key_id(), signature.as_bytes().to_vec(), slot)
            }
            VerifyKey::External(public_key) => {
                let mut data = Vec::with_capacity(128);
                data.extend_from_slice(signature.as_bytes());
                data.extend_from_slice(public_key.as_bytes());
                (VERIFY_MODE_EXTERNAL, VERIFY_KEY_P256, data, Slot::default())
            }
        };

        self.nonce_pass_through(session, &digest)?;
        let response = self.transact(session, Opcode::Verify, mode, param2, data, true)?;
        match response.status() {
            Some(Status::Success) => {}
            Some(Status::Miscompare) => {
                session.clear_temp_key();
                debug!("signature rejected by device");
                return Ok(false);
            }
            _ => return Err(Error::InvalidResponse("verify")),
        }

        self.verify_device_mac(
            session,
            MacRequest {
                mode: MacMode::TempKeyAndChallenge,
                slot: mac_slot,
                key: &[0u8; 32],
                challenge: &[0u8; 32],
            },
        )?;
        Ok(true)
    }

    /// Read the public key stored in a slot
    pub fn public_key(&mut self, session: &mut Session, slot: Slot) -> Result<PublicKey> {
        let bytes = self.read(session, slot, 64, None)?;
        PublicKey::from_slice(&bytes)
    }

    fn read_clear(&mut self, session: &mut Session, slot: Slot, block: u8) -> Result<[u8; 32]> {
        let response = self.transact(
            session,
            Opcode::Read,
            Zone::Data.code() | ZONE_SIZE_32,
            data_address(slot, block),
            Bytes::new(),
            false,
        )?;
        data_array(&response, "read")
    }

    fn write_clear(&mut self, session: &mut Session, slot: Slot, block: u8, data: &[u8; 32]) -> Result<()> {
        let response = self.transact(
            session,
            Opcode::Write,
            Zone::Data.code() | ZONE_SIZE_32,
            data_address(slot, block),
            data.to_vec(),
            false,
        )?;
        expect_success(&response, "write")
    }

    /// Exchange one command, keeping the session consistent with the link epoch
    fn transact(
        &mut self,
        session: &mut Session,
        opcode: Opcode,
        param1: u8,
        param2: u16,
        data: impl Into<Bytes>,
        needs_temp_key: bool,
    ) -> Result<Response> {
        // Authorization and TempKey both die with the epoch they were made in
        let in_sequence = needs_temp_key || session.in_sequence();
        if in_sequence && session.epoch() != self.framer.epoch() {
            session.reset(self.framer.epoch());
            return Err(Error::SessionLost);
        }
        if needs_temp_key && !session.has_temp_key() {
            return Err(Error::NoTempKey);
        }

        let packet = Packet::new(opcode.code(), param1, param2)
            .with_data(data)
            .with_execution_time(opcode.execution_time());
        let reply = self.framer.exchange(&packet);

        // A failure after a wake is a consequence of the lost state, not its cause
        if session.epoch() != self.framer.epoch() {
            warn!(%opcode, "device state reset during exchange");
            session.reset(self.framer.epoch());
            if in_sequence {
                return Err(Error::SessionLost);
            }
        }
        Ok(reply?.response)
    }
}

fn require_authority<'a>(authority: Option<KeyRef<'a>>, slot: Slot) -> Result<KeyRef<'a>> {
    match authority {
        Some(key) if key.slot == slot => Ok(key),
        Some(_) => Err(Error::Policy("wrong authorizing key")),
        None => Err(Error::Policy("slot requires an authorizing key")),
    }
}

fn message_digest(message: &[u8], already_hashed: bool) -> Result<[u8; 32]> {
    if already_hashed {
        message
            .try_into()
            .map_err(|_| Error::InvalidInput("digest must be 32 bytes"))
    } else {
        Ok(digest::sha256(message))
    }
}

fn data_array<const N: usize>(response: &Response, what: &'static str) -> Result<[u8; N]> {
    response
        .data()
        .and_then(|data| <[u8; N]>::try_from(&data[..]).ok())
        .ok_or(Error::InvalidResponse(what))
}

fn expect_success(response: &Response, what: &'static str) -> Result<()> {
    match response.status() {
        Some(Status::Success) => Ok(()),
        _ => Err(Error::InvalidResponse(what)),
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use meterid_frame::RetryConfig;

    use super::*;
    use crate::sim::{SimulatedDevice, SoftwareKey};
    use crate::slot::{METER_CATALOGUE, SlotName};
    use crate::types::SerialNumber;

    const AUTH_KEY: [u8; 32] = [0x31; 32];
    const WRITE_KEY: [u8; 32] = [0x5A; 32];
    const DEVICE_SCALAR: [u8; 32] = [0x11; 32];

    fn slot(name: SlotName) -> Slot {
        METER_CATALOGUE.get(name).slot
    }

    fn device_over(sim: SimulatedDevice) -> Device<SimulatedDevice> {
        let retry = RetryConfig::default().with_receive_polls(2);
        Device::new(sim, ProtocolConfig::default().with_retry(retry))
    }

    /// A provisioned device: secrets loaded, key pair generated, public key exported
    fn provisioned() -> (Device<SimulatedDevice>, Session, PublicKey) {
        let mut sim = SimulatedDevice::new(SerialNumber::new(hex!("0123456789abcdefee")), 1);
        sim.load_slot(slot(SlotName::AuthKey), &AUTH_KEY).unwrap();
        sim.load_slot(slot(SlotName::WriteKey), &WRITE_KEY).unwrap();
        let public_key = sim
            .load_private_key(slot(SlotName::DevicePrivateKey), &DEVICE_SCALAR)
            .unwrap();
        sim.load_slot(slot(SlotName::DevicePublicKey), public_key.as_bytes())
            .unwrap();

        let mut device = device_over(sim);
        let session = device.open_session().unwrap();
        (device, session, public_key)
    }

    fn auth_key() -> KeyRef<'static> {
        KeyRef::new(slot(SlotName::AuthKey), &AUTH_KEY)
    }

    fn write_key() -> KeyRef<'static> {
        KeyRef::new(slot(SlotName::WriteKey), &WRITE_KEY)
    }

    #[test]
    fn test_nonce_gendig_mac_known_answer() {
        let sim = SimulatedDevice::new(SerialNumber::default(), 0).with_zero_randomness();
        let mut device = device_over(sim);
        let mut session = device.open_session().unwrap();

        device.nonce(&mut session, true).unwrap();
        assert_eq!(
            session.temp_key().unwrap().as_bytes(),
            &hex!("8ebe42a075cfbd1b2024a69e000c4fd0152e91c79340ac358baec623e740d46f")
        );

        let write_slot = slot(SlotName::WriteKey);
        device
            .gen_dig(&mut session, KeyRef::new(write_slot, &[0u8; 32]))
            .unwrap();
        assert_eq!(
            session.temp_key().unwrap().as_bytes(),
            &hex!("4d897bc1bdbda18084b9966f0286075bc41fc44de1fa07f5d2129889825c561a")
        );

        let mac = device
            .mac(&mut session, MacMode::KeyAndTempKey, write_slot, &[0u8; 32])
            .unwrap();
        assert_eq!(
            mac,
            hex!("9a86e928c635baa9f35ea1febe263207b107171e858146b8d826dfb8a18e295b")
        );
        assert!(!session.has_temp_key());
    }

    #[test]
    fn test_open_session_reads_serial() {
        let (device, session, _) = provisioned();
        assert_eq!(session.serial(), &SerialNumber::new(hex!("0123456789abcdefee")));
        assert_eq!(session.epoch(), device.framer().epoch());
    }

    #[test]
    fn test_check_configuration() {
        let (mut device, _, _) = provisioned();
        device.check_configuration().unwrap();

        let meter = slot(SlotName::MeterKey);
        device.transport_mut().config_zone_mut().set_key_config(meter, 0x0000);
        assert!(matches!(
            device.check_configuration(),
            Err(Error::Configuration { slot, field: "KeyConfig", .. }) if slot == meter
        ));
    }

    #[test]
    fn test_device_mac_matches_host() {
        let (mut device, mut session, _) = provisioned();
        let request = MacRequest {
            mode: MacMode::KeyAndChallenge,
            slot: slot(SlotName::WriteKey),
            key: &WRITE_KEY,
            challenge: &[0x09; 32],
        };
        device.verify_device_mac(&mut session, request).unwrap();

        let wrong = MacRequest {
            key: &AUTH_KEY,
            ..request
        };
        let err = device.verify_device_mac(&mut session, wrong).unwrap_err();
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_mac_with_temp_key_needs_nonce() {
        let (mut device, mut session, _) = provisioned();
        let err = device
            .mac(&mut session, MacMode::KeyAndTempKey, slot(SlotName::WriteKey), &[0; 32])
            .unwrap_err();
        assert_eq!(err, Error::NoTempKey);
        assert_eq!(device.transport().commands(), 4);
    }

    #[test]
    fn test_key_authorization() {
        let (mut device, mut session, _) = provisioned();
        assert!(device.key_authorization(&mut session, auth_key()).unwrap());
        assert_eq!(device.transport().auth_valid(), Some(slot(SlotName::AuthKey)));

        let forged = KeyRef::new(slot(SlotName::AuthKey), &[0x32; 32]);
        assert!(!device.key_authorization(&mut session, forged).unwrap());
        assert_eq!(device.transport().auth_valid(), None);
    }

    #[test]
    fn test_encrypted_write_then_read() {
        let (mut device, mut session, _) = provisioned();
        let meter = slot(SlotName::MeterKey);
        let secret = [0xC3; 32];

        device
            .write(&mut session, meter, &secret, Some(write_key()))
            .unwrap();
        assert_eq!(&device.transport().slot_data(meter)[..32], &secret);

        let value = device
            .read(&mut session, meter, 32, Some(write_key()))
            .unwrap();
        assert_eq!(&value[..], &secret);
    }

    #[test]
    fn test_encrypted_write_with_wrong_key_is_refused() {
        let (mut device, mut session, _) = provisioned();
        let meter = slot(SlotName::MeterKey);
        let wrong = KeyRef::new(slot(SlotName::WriteKey), &[0x5B; 32]);

        let err = device
            .write(&mut session, meter, &[0xC3; 32], Some(wrong))
            .unwrap_err();
        assert_eq!(err, Error::Frame(meterid_frame::Error::DeviceExecution));
        assert_eq!(&device.transport().slot_data(meter)[..32], &[0u8; 32]);
    }

    #[test]
    fn test_policy_is_checked_before_sending() {
        let (mut device, mut session, _) = provisioned();
        let sent = device.transport().commands();

        let err = device
            .write(&mut session, slot(SlotName::MeterKey), &[1; 32], None)
            .unwrap_err();
        assert_eq!(err, Error::Policy("slot requires an authorizing key"));

        let err = device
            .write(&mut session, slot(SlotName::MeterKey), &[1; 32], Some(auth_key()))
            .unwrap_err();
        assert_eq!(err, Error::Policy("wrong authorizing key"));

        let err = device
            .read(&mut session, slot(SlotName::DevicePrivateKey), 32, None)
            .unwrap_err();
        assert_eq!(err, Error::Policy("slot is not readable"));

        let err = device
            .write(&mut session, slot(SlotName::RootPublicKey), &[1; 64], None)
            .unwrap_err();
        assert_eq!(err, Error::Policy("slot is not writable"));

        assert_eq!(device.transport().commands(), sent);
    }

    #[test]
    fn test_clear_write_spans_blocks() {
        let (mut device, mut session, _) = provisioned();
        let certs = slot(SlotName::Certificates);
        let data: Vec<u8> = (0..72u8).collect();

        device.write(&mut session, certs, &data, None).unwrap();
        let read = device.read(&mut session, certs, 72, None).unwrap();
        assert_eq!(&read[..], &data[..]);
        // Tail of the last block is zero padded
        assert_eq!(&device.transport().slot_data(certs)[72..96], &[0u8; 24]);
    }

    #[test]
    fn test_sign_and_verify() {
        let (mut device, mut session, public_key) = provisioned();
        let message = b"meter reading 000123 kWh";

        let signature = device
            .sign(&mut session, slot(SlotName::DevicePrivateKey), Some(auth_key()), message, false)
            .unwrap();
        assert!(SoftwareKey::verify_digest(&public_key, &digest::sha256(message), &signature));
        assert!(session.last_random().is_some());

        let stored = VerifyKey::Stored(slot(SlotName::DevicePublicKey));
        assert!(device.verify(&mut session, stored, message, false, &signature).unwrap());
        assert!(device
            .verify(&mut session, VerifyKey::External(&public_key), message, false, &signature)
            .unwrap());

        let mut tampered = *signature.as_bytes();
        tampered[10] ^= 0x01;
        let tampered = Signature::new(tampered);
        assert!(!device.verify(&mut session, stored, message, false, &tampered).unwrap());
    }

    #[test]
    fn test_sign_prehashed_digest() {
        let (mut device, mut session, public_key) = provisioned();
        let digest = digest::sha256(b"already hashed");

        let signature = device
            .sign(&mut session, slot(SlotName::DevicePrivateKey), Some(auth_key()), &digest, true)
            .unwrap();
        assert!(SoftwareKey::verify_digest(&public_key, &digest, &signature));

        let err = device
            .sign(&mut session, slot(SlotName::DevicePrivateKey), Some(auth_key()), &digest[..31], true)
            .unwrap_err();
        assert_eq!(err, Error::InvalidInput("digest must be 32 bytes"));
    }

    #[test]
    fn test_sign_without_authority_is_refused() {
        let (mut device, mut session, _) = provisioned();
        let forged = KeyRef::new(slot(SlotName::AuthKey), &[0; 32]);
        let err = device
            .sign(&mut session, slot(SlotName::DevicePrivateKey), Some(forged), b"m", false)
            .unwrap_err();
        assert!(err.is_authentication_failure());

        let err = device
            .sign(&mut session, slot(SlotName::MeterKey), None, b"m", false)
            .unwrap_err();
        assert_eq!(err, Error::Policy("slot does not hold a signing key"));
    }

    #[test]
    fn test_short_signatures_are_retried() {
        let (mut device, mut session, public_key) = provisioned();
        device.transport_mut().faults_mut().short_signatures = 2;

        let signature = device
            .sign(&mut session, slot(SlotName::DevicePrivateKey), Some(auth_key()), b"m", false)
            .unwrap();
        assert!(SoftwareKey::verify_digest(&public_key, &digest::sha256(b"m"), &signature));

        device.transport_mut().faults_mut().short_signatures = 3;
        let err = device
            .sign(&mut session, slot(SlotName::DevicePrivateKey), Some(auth_key()), b"m", false)
            .unwrap_err();
        assert_eq!(err, Error::SignatureIncomplete(3));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_wake_mid_sequence_loses_session() {
        let (mut device, mut session, _) = provisioned();
        device.nonce(&mut session, true).unwrap();
        device.transport_mut().faults_mut().fall_asleep = 1;

        let err = device.gen_dig(&mut session, write_key()).unwrap_err();
        assert_eq!(err, Error::SessionLost);
        assert!(err.is_retryable());
        assert!(!session.has_temp_key());
        assert_eq!(session.epoch(), device.framer().epoch());

        // A fresh sequence on the new epoch works
        let meter = slot(SlotName::MeterKey);
        device
            .write(&mut session, meter, &[0x77; 32], Some(write_key()))
            .unwrap();
        assert_eq!(&device.transport().slot_data(meter)[..32], &[0x77; 32]);
    }

    #[test]
    fn test_wake_after_authorization_loses_session() {
        let (mut device, mut session, public_key) = provisioned();
        assert!(device.key_authorization(&mut session, auth_key()).unwrap());
        assert_eq!(session.authorized(), Some(slot(SlotName::AuthKey)));
        device.transport_mut().faults_mut().fall_asleep = 1;

        // Random needs no TempKey, but the device forgot the authorization
        let err = device.random(&mut session, true).unwrap_err();
        assert_eq!(err, Error::SessionLost);
        assert!(err.is_retryable());
        assert_eq!(session.authorized(), None);
        assert_eq!(device.transport().auth_valid(), None);

        // Outside a sequence a wake is harmless
        device.transport_mut().faults_mut().fall_asleep = 1;
        device.random(&mut session, false).unwrap();

        let signature = device
            .sign(&mut session, slot(SlotName::DevicePrivateKey), Some(auth_key()), b"m", false)
            .unwrap();
        assert!(SoftwareKey::verify_digest(&public_key, &digest::sha256(b"m"), &signature));
    }

    #[test]
    fn test_unreachable_device_fails_session_with_context() {
        let (mut device, _, _) = provisioned();
        device.sleep().unwrap();
        device.transport_mut().faults_mut().drop_responses = u32::MAX;

        let err = device.open_session().unwrap_err();
        assert!(err.to_string().starts_with("reading configuration zone: "));
        assert!(matches!(err.root(), Error::Frame(meterid_frame::Error::CommunicationFailure { .. })));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_stale_session_is_rejected() {
        let (mut device, mut session, _) = provisioned();
        device.nonce(&mut session, true).unwrap();
        device.sleep().unwrap();
        device.framer.wake().unwrap();

        let err = device.gen_dig(&mut session, write_key()).unwrap_err();
        assert_eq!(err, Error::SessionLost);
        assert!(!session.has_temp_key());
    }

    #[test]
    fn test_lost_response_recovered_in_sync() {
        let (mut device, mut session, _) = provisioned();
        let epoch = session.epoch();
        device.transport_mut().faults_mut().drop_responses = 1;
        device.transport_mut().faults_mut().corrupt_responses = 1;

        device.random(&mut session, false).unwrap();
        assert_eq!(session.epoch(), epoch);
        assert_eq!(device.framer().epoch(), epoch);
    }

    #[test]
    fn test_public_key_read_back() {
        let (mut device, mut session, public_key) = provisioned();
        let read = device
            .public_key(&mut session, slot(SlotName::DevicePublicKey))
            .unwrap();
        assert_eq!(read, public_key);
    }
}
