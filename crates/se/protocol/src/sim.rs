//! In-memory secure element answering frames the way the chip does
//!
//! The simulator parses command frames, enforces slot policy from the
//! SlotConfig and KeyConfig words of its own configuration zone, keeps its
//! own TempKey, and signs with real P-256 keys. [`Faults`] inject the bus and
//! device misbehaviour the framing and protocol layers must recover from.

use std::time::Duration;

use bytes::Bytes;
use meterid_frame::{Packet, Response, Status, Transport, TransportError};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::trace;

use crate::digest::{self, MacMode, OtherData, TempKey, TempKeySource};
use crate::error::{Error, Result};
use crate::opcode::*;
use crate::slot::{SLOT_COUNT, Slot, SlotCatalogue};
use crate::types::{PublicKey, SerialNumber, Signature};
use crate::zone::{ConfigZone, Zone, split_data_address};

/// Misbehaviour to inject, each counter covering that many upcoming events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Faults {
    /// Responses whose checksum is corrupted after the command executed
    pub corrupt_responses: u32,
    /// Commands lost on the bus, never executed and never answered
    pub drop_responses: u32,
    /// Sign commands answered with a truncated signature
    pub short_signatures: u32,
    /// Writes rejected with a communication error, nothing stored
    pub failed_writes: u32,
    /// Commands arriving while the device had dozed off; they only wake it
    pub fall_asleep: u32,
}

/// Take one event off a fault counter
fn trip(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[derive(Debug)]
struct SimTempKey {
    key: TempKey,
    gen_dig_slot: Option<u8>,
}

type Answer = std::result::Result<Response, Status>;

/// Simulated secure element
#[derive(Debug)]
pub struct SimulatedDevice {
    config: ConfigZone,
    slots: Vec<Vec<u8>>,
    temp_key: Option<SimTempKey>,
    auth_valid: Option<u8>,
    rng: StdRng,
    zero_random: bool,
    awake: bool,
    supports_reset_io: bool,
    pending: Option<Bytes>,
    faults: Faults,
    commands: u32,
}

impl SimulatedDevice {
    /// A locked device configured for the meter catalogue
    pub fn new(serial: SerialNumber, seed: u64) -> Self {
        Self::with_catalogue(&crate::slot::METER_CATALOGUE, serial, seed)
    }

    /// A locked device configured for `catalogue`
    pub fn with_catalogue(catalogue: &SlotCatalogue, serial: SerialNumber, seed: u64) -> Self {
        let slots = (0..SLOT_COUNT)
            .filter_map(Slot::new)
            .map(|slot| vec![0u8; slot.capacity().div_ceil(BLOCK_SIZE) * BLOCK_SIZE])
            .collect();
        Self {
            config: ConfigZone::for_catalogue(catalogue, &serial),
            slots,
            temp_key: None,
            auth_valid: None,
            rng: StdRng::seed_from_u64(seed),
            zero_random: false,
            awake: false,
            supports_reset_io: true,
            pending: None,
            faults: Faults::default(),
            commands: 0,
        }
    }

    /// Answer Nonce and Random with zeros, making every digest reproducible
    pub const fn with_zero_randomness(mut self) -> Self {
        self.zero_random = true;
        self
    }

    /// Remove the I/O reset primitive; resync must go through a wake
    pub const fn without_reset_io(mut self) -> Self {
        self.supports_reset_io = false;
        self
    }

    /// Configuration zone, for tampering in tests
    pub const fn config_zone_mut(&mut self) -> &mut ConfigZone {
        &mut self.config
    }

    /// Fault counters
    pub const fn faults_mut(&mut self) -> &mut Faults {
        &mut self.faults
    }

    /// Provision a slot directly, bypassing its write policy
    pub fn load_slot(&mut self, slot: Slot, data: &[u8]) -> Result<()> {
        let storage = &mut self.slots[slot.id() as usize];
        if data.len() > storage.len() {
            return Err(Error::InvalidInput("data exceeds slot capacity"));
        }
        storage[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Contents of a slot
    pub fn slot_data(&self, slot: Slot) -> &[u8] {
        &self.slots[slot.id() as usize]
    }

    /// Provision a P-256 private key and return its public key
    pub fn load_private_key(&mut self, slot: Slot, scalar: &[u8; 32]) -> Result<PublicKey> {
        let key = SoftwareKey::from_scalar(scalar)?;
        self.load_slot(slot, scalar)?;
        key.public_key()
    }

    /// Slot whose key was last proven through CheckMac
    pub fn auth_valid(&self) -> Option<Slot> {
        self.auth_valid.and_then(Slot::new)
    }

    /// Whether the device is awake
    pub const fn is_awake(&self) -> bool {
        self.awake
    }

    /// Number of commands executed
    pub const fn commands(&self) -> u32 {
        self.commands
    }

    fn clear_volatile(&mut self) {
        self.temp_key = None;
        self.auth_valid = None;
    }

    fn serial(&self) -> SerialNumber {
        self.config.serial()
    }

    fn random_bytes(&mut self) -> [u8; 32] {
        let mut out = [0u8; 32];
        if !self.zero_random {
            self.rng.fill_bytes(&mut out);
        }
        out
    }

    fn key_block(&self, slot: u16) -> std::result::Result<[u8; 32], Status> {
        let slot = Slot::new(slot as u8).filter(|_| slot < SLOT_COUNT as u16).ok_or(Status::ParseError)?;
        let mut key = [0u8; 32];
        key.copy_from_slice(&self.slots[slot.id() as usize][..32]);
        Ok(key)
    }

    fn temp_key(&self, source: Option<TempKeySource>) -> std::result::Result<&SimTempKey, Status> {
        match &self.temp_key {
            Some(tk) if source.is_none_or(|s| s == tk.key.source()) => Ok(tk),
            _ => Err(Status::ExecutionError),
        }
    }

    fn execute(&mut self, packet: &Packet) -> Answer {
        let opcode = Opcode::from_code(packet.opcode()).ok_or(Status::ParseError)?;
        self.commands += 1;
        trace!(%opcode, "simulated device executing");
        match opcode {
            Opcode::Nonce => self.nonce(packet),
            Opcode::Random => Ok(Response::Data(Bytes::copy_from_slice(&self.random_bytes()))),
            Opcode::GenDig => self.gen_dig(packet),
            Opcode::Mac => self.mac(packet),
            Opcode::CheckMac => self.check_mac(packet),
            Opcode::Read => self.read(packet),
            Opcode::Write => self.write(packet),
            Opcode::Sign => self.sign(packet),
            Opcode::Verify => self.verify(packet),
        }
    }

    fn nonce(&mut self, packet: &Packet) -> Answer {
        let mode = packet.param1();
        match mode {
            NONCE_MODE_SEED_UPDATE | NONCE_MODE_NO_SEED_UPDATE => {
                let num_in: [u8; NONCE_NUM_IN_SIZE] =
                    packet.data()[..].try_into().map_err(|_| Status::ParseError)?;
                let rand_out = self.random_bytes();
                self.temp_key = Some(SimTempKey {
                    key: digest::nonce_temp_key(&rand_out, &num_in, mode),
                    gen_dig_slot: None,
                });
                Ok(Response::Data(Bytes::copy_from_slice(&rand_out)))
            }
            NONCE_MODE_PASS_THROUGH => {
                let value: [u8; 32] = packet.data()[..].try_into().map_err(|_| Status::ParseError)?;
                self.temp_key = Some(SimTempKey {
                    key: TempKey::new(value, TempKeySource::Input),
                    gen_dig_slot: None,
                });
                Ok(Response::Status(Status::Success))
            }
            _ => Err(Status::ParseError),
        }
    }

    fn gen_dig(&mut self, packet: &Packet) -> Answer {
        if packet.param1() != Zone::Data.code() {
            return Err(Status::ParseError);
        }
        let key = self.key_block(packet.param2())?;
        let serial = self.serial();
        let current = self.temp_key(None)?;
        let next = digest::gen_dig(&current.key, &key, packet.param1(), packet.param2(), &serial);
        self.temp_key = Some(SimTempKey {
            key: next,
            gen_dig_slot: Some(packet.param2() as u8),
        });
        Ok(Response::Status(Status::Success))
    }

    fn mac(&mut self, packet: &Packet) -> Answer {
        let (mode, source) = MacMode::from_mode_byte(packet.param1()).map_err(|_| Status::ParseError)?;
        let key = self.key_block(packet.param2())?;
        let challenge: [u8; 32] = if mode.uses_challenge() {
            packet.data()[..].try_into().map_err(|_| Status::ParseError)?
        } else {
            [0u8; 32]
        };

        let temp_key = if mode.uses_temp_key() {
            Some(*self.temp_key(source)?.key.as_bytes())
        } else {
            None
        };
        let (block1, block2) = match (mode, &temp_key) {
            (MacMode::KeyAndChallenge, _) => (&key, &challenge),
            (MacMode::KeyAndTempKey, Some(tk)) => (&key, tk),
            (MacMode::TempKeyAndChallenge, Some(tk)) => (tk, &challenge),
            _ => return Err(Status::ExecutionError),
        };
        let other = OtherData::for_mac(packet.param1(), packet.param2());
        let mac = digest::mac_digest(block1, block2, &other, &self.serial());

        if mode.uses_temp_key() {
            self.temp_key = None;
        }
        Ok(Response::Data(Bytes::copy_from_slice(&mac)))
    }

    fn check_mac(&mut self, packet: &Packet) -> Answer {
        let (mode, source) = MacMode::from_mode_byte(packet.param1()).map_err(|_| Status::ParseError)?;
        if mode != MacMode::KeyAndTempKey || packet.data().len() != CHECKMAC_DATA_SIZE {
            return Err(Status::ParseError);
        }
        let key = self.key_block(packet.param2())?;
        let temp_key = *self.temp_key(source)?.key.as_bytes();

        let data = packet.data();
        let mut other = [0u8; 13];
        other.copy_from_slice(&data[64..]);
        let expected = digest::mac_digest(&key, &temp_key, &OtherData::new(other), &self.serial());

        self.temp_key = None;
        if expected[..] == data[32..64] {
            self.auth_valid = Some(packet.param2() as u8);
            Ok(Response::Status(Status::Success))
        } else {
            self.auth_valid = None;
            Ok(Response::Status(Status::Miscompare))
        }
    }

    fn read(&mut self, packet: &Packet) -> Answer {
        if packet.param1() & ZONE_SIZE_32 == 0 {
            return Err(Status::ParseError);
        }
        match Zone::from_param(packet.param1()) {
            Some(Zone::Config) => {
                let block = (packet.param2() >> 3) as u8;
                let data = self.config.block(block).ok_or(Status::ParseError)?;
                Ok(Response::Data(Bytes::copy_from_slice(data)))
            }
            Some(Zone::Data) => {
                let (slot, block) = split_data_address(packet.param2());
                let slot = Slot::new(slot).ok_or(Status::ParseError)?;
                let start = block as usize * BLOCK_SIZE;
                let mut data: [u8; 32] = self.slots[slot.id() as usize]
                    .get(start..start + BLOCK_SIZE)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(Status::ParseError)?;

                let config = self.config.slot_config(slot);
                if config & 0x0080 != 0 {
                    if config & 0x0040 == 0 {
                        return Err(Status::ExecutionError);
                    }
                    let read_key = (config & 0x000F) as u8;
                    let tk = self.temp_key(None)?;
                    if tk.gen_dig_slot != Some(read_key) {
                        return Err(Status::ExecutionError);
                    }
                    data = digest::xor_with_temp_key(&data, &tk.key);
                    self.temp_key = None;
                }
                Ok(Response::Data(Bytes::copy_from_slice(&data)))
            }
            _ => Err(Status::ExecutionError),
        }
    }

    fn write(&mut self, packet: &Packet) -> Answer {
        if trip(&mut self.faults.failed_writes) {
            return Err(Status::CommunicationError);
        }
        if Zone::from_param(packet.param1()) != Some(Zone::Data) || packet.param1() & ZONE_SIZE_32 == 0 {
            return Err(Status::ExecutionError);
        }
        let (slot, block) = split_data_address(packet.param2());
        let slot = Slot::new(slot).ok_or(Status::ParseError)?;
        let start = block as usize * BLOCK_SIZE;
        if start + BLOCK_SIZE > self.slots[slot.id() as usize].len() {
            return Err(Status::ParseError);
        }

        let config = self.config.slot_config(slot);
        let plaintext: [u8; 32] = match config >> 12 {
            0x0 => packet.data()[..].try_into().map_err(|_| Status::ParseError)?,
            0x4 => {
                if packet.data().len() != 2 * BLOCK_SIZE {
                    return Err(Status::ParseError);
                }
                let write_key = ((config >> 8) & 0x0F) as u8;
                let tk = self.temp_key(None)?;
                if tk.gen_dig_slot != Some(write_key) {
                    return Err(Status::ExecutionError);
                }
                let mut cipher = [0u8; 32];
                cipher.copy_from_slice(&packet.data()[..32]);
                let plaintext = digest::xor_with_temp_key(&cipher, &tk.key);
                let expected = digest::write_mac(
                    &tk.key,
                    packet.param1(),
                    packet.param2(),
                    &plaintext,
                    &self.serial(),
                );
                self.temp_key = None;
                if expected[..] != packet.data()[32..] {
                    return Err(Status::ExecutionError);
                }
                plaintext
            }
            _ => return Err(Status::ExecutionError),
        };

        self.slots[slot.id() as usize][start..start + BLOCK_SIZE].copy_from_slice(&plaintext);
        Ok(Response::Status(Status::Success))
    }

    fn sign(&mut self, packet: &Packet) -> Answer {
        if packet.param1() != SIGN_MODE_EXTERNAL {
            return Err(Status::ParseError);
        }
        let slot = Slot::new(packet.param2() as u8).ok_or(Status::ParseError)?;
        let key_config = self.config.key_config(slot);
        if key_config & 0x0001 == 0 {
            return Err(Status::ExecutionError);
        }
        if key_config & 0x0080 != 0 && self.auth_valid != Some(((key_config >> 8) & 0x0F) as u8) {
            return Err(Status::ExecutionError);
        }

        let digest = *self.temp_key(Some(TempKeySource::Input))?.key.as_bytes();
        self.temp_key = None;
        let scalar = self.key_block(packet.param2())?;
        let key = SoftwareKey::from_scalar(&scalar).map_err(|_| Status::ExecutionError)?;
        let signature = key.sign_digest(&digest).map_err(|_| Status::EccFault)?;

        let len = if trip(&mut self.faults.short_signatures) {
            BLOCK_SIZE
        } else {
            signature.as_bytes().len()
        };
        Ok(Response::Data(Bytes::copy_from_slice(&signature.as_bytes()[..len])))
    }

    fn verify(&mut self, packet: &Packet) -> Answer {
        let data = packet.data();
        let public_key = match packet.param1() {
            VERIFY_MODE_STORED if data.len() == 64 => {
                let slot = Slot::new(packet.param2() as u8).ok_or(Status::ParseError)?;
                let key_config = self.config.key_config(slot);
                if key_config & 0x0001 != 0 || (key_config >> 2) & 0x07 != 4 {
                    return Err(Status::ExecutionError);
                }
                PublicKey::from_slice(&self.slots[slot.id() as usize][..64])
                    .map_err(|_| Status::ExecutionError)?
            }
            VERIFY_MODE_EXTERNAL if packet.param2() == VERIFY_KEY_P256 && data.len() == 128 => {
                PublicKey::from_slice(&data[64..]).map_err(|_| Status::ParseError)?
            }
            _ => return Err(Status::ParseError),
        };
        let digest = *self.temp_key(Some(TempKeySource::Input))?.key.as_bytes();

        let verifying_key = VerifyingKey::from_sec1_bytes(&public_key.to_uncompressed())
            .map_err(|_| Status::ExecutionError)?;
        let valid = EcdsaSignature::from_slice(&data[..64])
            .map(|signature| verifying_key.verify_prehash(&digest, &signature).is_ok())
            .unwrap_or(false);

        // TempKey stays loaded so the host can confirm the result with a MAC
        if valid {
            Ok(Response::Status(Status::Success))
        } else {
            self.temp_key = None;
            Ok(Response::Status(Status::Miscompare))
        }
    }
}

impl Transport for SimulatedDevice {
    fn do_send(&mut self, frame: &[u8]) -> std::result::Result<(), TransportError> {
        if !self.awake || trip(&mut self.faults.drop_responses) {
            return Ok(());
        }
        if trip(&mut self.faults.fall_asleep) {
            self.clear_volatile();
            self.pending = Some(Response::status_frame(Status::AfterWake));
            return Ok(());
        }

        let answer = match Packet::from_bytes(frame) {
            Ok(packet) => self.execute(&packet),
            Err(_) => Err(Status::CommunicationError),
        };
        let mut reply = match answer {
            Ok(Response::Data(data)) => Response::data_frame(&data).to_vec(),
            Ok(Response::Status(status)) | Err(status) => Response::status_frame(status).to_vec(),
        };
        if trip(&mut self.faults.corrupt_responses) {
            if let Some(last) = reply.last_mut() {
                *last ^= 0xFF;
            }
        }
        self.pending = Some(reply.into());
        Ok(())
    }

    fn do_receive(&mut self, max_len: usize) -> std::result::Result<Bytes, TransportError> {
        match self.pending.take() {
            Some(mut reply) => {
                reply.truncate(max_len);
                Ok(reply)
            }
            None => Ok(Bytes::new()),
        }
    }

    fn wake_pulse(&mut self) -> std::result::Result<(), TransportError> {
        let status = if self.awake {
            Status::Success
        } else {
            self.awake = true;
            self.clear_volatile();
            Status::AfterWake
        };
        self.pending = Some(Response::status_frame(status));
        Ok(())
    }

    fn delay(&mut self, _duration: Duration) {}

    fn reset_io(&mut self) -> std::result::Result<bool, TransportError> {
        if self.supports_reset_io {
            self.pending = None;
        }
        Ok(self.supports_reset_io)
    }

    fn sleep(&mut self) -> std::result::Result<(), TransportError> {
        self.awake = false;
        self.pending = None;
        self.clear_volatile();
        Ok(())
    }
}

/// P-256 key held in host memory, standing in for a certificate authority
#[derive(Debug, Clone)]
pub struct SoftwareKey(SigningKey);

impl SoftwareKey {
    /// Key from a 32-byte scalar
    pub fn from_scalar(scalar: &[u8; 32]) -> Result<Self> {
        SigningKey::from_slice(scalar)
            .map(Self)
            .map_err(|_| Error::InvalidInput("invalid private key scalar"))
    }

    /// Public key
    pub fn public_key(&self) -> Result<PublicKey> {
        let point = self.0.verifying_key().to_encoded_point(false);
        PublicKey::from_slice(&point.as_bytes()[1..])
    }

    /// Sign a 32-byte digest
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<Signature> {
        let signature: EcdsaSignature = self
            .0
            .sign_prehash(digest)
            .map_err(|_| Error::InvalidInput("digest cannot be signed"))?;
        Signature::from_slice(&signature.to_bytes())
    }

    /// Verify a signature over a 32-byte digest
    pub fn verify_digest(public_key: &PublicKey, digest: &[u8; 32], signature: &Signature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(&public_key.to_uncompressed()) else {
            return false;
        };
        EcdsaSignature::from_slice(signature.as_bytes())
            .map(|signature| verifying_key.verify_prehash(digest, &signature).is_ok())
            .unwrap_or(false)
    }
}
